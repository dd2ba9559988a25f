//! 结构化输出契约：VisionAssessment 与 NutritionRecord
//!
//! 两者都在模型边界完成解码与校验，下游只接触已经合法的值。

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 感知模型的判定结果：合法时只有 report，不合法时只有 reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "AssessmentWire", try_from = "AssessmentWire")]
pub enum VisionAssessment {
    Valid { report: String },
    Invalid { reason: String },
}

impl VisionAssessment {
    pub fn valid(report: impl Into<String>) -> Self {
        Self::Valid {
            report: report.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    pub fn report(&self) -> Option<&str> {
        match self {
            Self::Valid { report } => Some(report),
            Self::Invalid { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Invalid { reason } => Some(reason),
            Self::Valid { .. } => None,
        }
    }
}

/// 感知模型的线上格式 `{is_valid, reason, report}`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AssessmentWire {
    /// 图片是否清晰且包含食物
    pub is_valid: bool,
    /// 如果不合法，说明原因（如：图片模糊、非食物、无图片）
    #[serde(default)]
    pub reason: String,
    /// 识别到的食材详细报告，若不合法则为空
    #[serde(default)]
    pub report: String,
}

impl From<VisionAssessment> for AssessmentWire {
    fn from(a: VisionAssessment) -> Self {
        match a {
            VisionAssessment::Valid { report } => Self {
                is_valid: true,
                reason: String::new(),
                report,
            },
            VisionAssessment::Invalid { reason } => Self {
                is_valid: false,
                reason,
                report: String::new(),
            },
        }
    }
}

impl TryFrom<AssessmentWire> for VisionAssessment {
    type Error = String;

    /// 互斥约束：合法时 report 必须非空、reason 被丢弃；不合法时 reason 必须非空、report 被丢弃
    fn try_from(w: AssessmentWire) -> Result<Self, Self::Error> {
        if w.is_valid {
            let report = w.report.trim();
            if report.is_empty() {
                return Err("is_valid=true but report is empty".to_string());
            }
            Ok(Self::valid(report))
        } else {
            let reason = w.reason.trim();
            if reason.is_empty() {
                return Err("is_valid=false but reason is empty".to_string());
            }
            Ok(Self::invalid(reason))
        }
    }
}

/// L1-L4 某一层的量化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LevelQuantity {
    /// 该层总克数
    pub total_value: f64,
    #[serde(default)]
    pub ingredients: Vec<String>,
    /// 细分项（如 vegetables / fruits），值通常为克数
    #[serde(default)]
    pub details: BTreeMap<String, Value>,
}

/// L5：油、盐
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OilSalt {
    pub oil: f64,
    pub salt: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingredients: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
}

/// 膳食宝塔五层向量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NutritionVector {
    #[serde(rename = "L1")]
    pub l1: LevelQuantity,
    #[serde(rename = "L2")]
    pub l2: LevelQuantity,
    #[serde(rename = "L3")]
    pub l3: LevelQuantity,
    #[serde(rename = "L4")]
    pub l4: LevelQuantity,
    #[serde(rename = "L5")]
    pub l5: OilSalt,
}

impl NutritionVector {
    /// 六维向量 [L1, L2, L3, L4, oil, salt]
    pub fn as_array(&self) -> [f64; 6] {
        [
            self.l1.total_value,
            self.l2.total_value,
            self.l3.total_value,
            self.l4.total_value,
            self.l5.oil,
            self.l5.salt,
        ]
    }

    /// (层名, 层数据) 列表，L5 单独处理
    pub fn levels(&self) -> [(&'static str, &LevelQuantity); 4] {
        [
            ("L1", &self.l1),
            ("L2", &self.l2),
            ("L3", &self.l3),
            ("L4", &self.l4),
        ]
    }
}

/// 标准化菜品营养记录；一次成功运行只产出一次，之后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NutritionRecord {
    pub dish_name: String,
    #[serde(default)]
    pub main_ingredients: Vec<String>,
    #[serde(default)]
    pub seasonings: Vec<String>,
    #[serde(default)]
    pub feature_tags: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "pagoda_nutrition_vector", alias = "nutrition_vector")]
    pub nutrition_vector: NutritionVector,
}

impl NutritionRecord {
    /// 语义校验：菜名非空，所有数量为非负有限数
    pub fn validate(&self) -> Result<(), String> {
        if self.dish_name.trim().is_empty() {
            return Err("dish_name is empty".to_string());
        }
        for (name, q) in self.nutrition_vector.levels() {
            check_quantity(name, q.total_value)?;
        }
        check_quantity("L5.oil", self.nutrition_vector.l5.oil)?;
        check_quantity("L5.salt", self.nutrition_vector.l5.salt)?;
        Ok(())
    }
}

fn check_quantity(name: &str, v: f64) -> Result<(), String> {
    if !v.is_finite() || v < 0.0 {
        return Err(format!("{} has invalid quantity {}", name, v));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record_json() -> Value {
        json!({
            "dish_name": "西红柿炒鸡蛋",
            "main_ingredients": ["西红柿", "鸡蛋"],
            "seasonings": ["盐", "植物油"],
            "feature_tags": ["家常味", "快炒"],
            "description": "酸甜家常快手菜",
            "pagoda_nutrition_vector": {
                "L1": {"total_value": 0, "ingredients": [], "details": {"grains": 0, "tubers": 0}},
                "L2": {"total_value": 200, "ingredients": ["西红柿"], "details": {"vegetables": 200}},
                "L3": {"total_value": 100, "ingredients": ["鸡蛋"], "details": {"eggs": 100}},
                "L4": {"total_value": 0},
                "L5": {"oil": 15, "salt": 3}
            }
        })
    }

    #[test]
    fn test_assessment_valid_drops_reason() {
        let a: VisionAssessment = serde_json::from_value(json!({
            "is_valid": true, "reason": "清晰", "report": "鸡蛋,西红柿"
        }))
        .unwrap();
        assert_eq!(a, VisionAssessment::valid("鸡蛋,西红柿"));
        assert_eq!(a.reason(), None);
    }

    #[test]
    fn test_assessment_invalid_requires_reason() {
        let err = serde_json::from_value::<VisionAssessment>(json!({
            "is_valid": false, "reason": "", "report": ""
        }));
        assert!(err.is_err());

        let a: VisionAssessment = serde_json::from_value(json!({
            "is_valid": false, "reason": "图片模糊"
        }))
        .unwrap();
        assert_eq!(a.reason(), Some("图片模糊"));
        assert!(a.report().is_none());
    }

    #[test]
    fn test_assessment_serializes_wire_shape() {
        let v = serde_json::to_value(VisionAssessment::invalid("非食物")).unwrap();
        assert_eq!(v, json!({"is_valid": false, "reason": "非食物", "report": ""}));
    }

    #[test]
    fn test_record_decodes_and_validates() {
        let r: NutritionRecord = serde_json::from_value(sample_record_json()).unwrap();
        assert!(r.validate().is_ok());
        assert_eq!(r.nutrition_vector.l5.oil, 15.0);
        assert_eq!(r.nutrition_vector.as_array(), [0.0, 200.0, 100.0, 0.0, 15.0, 3.0]);
        assert!(r.nutrition_vector.l4.ingredients.is_empty());
    }

    #[test]
    fn test_record_missing_level_is_rejected() {
        let mut v = sample_record_json();
        v["pagoda_nutrition_vector"]
            .as_object_mut()
            .unwrap()
            .remove("L3");
        assert!(serde_json::from_value::<NutritionRecord>(v).is_err());
    }

    #[test]
    fn test_record_negative_quantity_fails_validation() {
        let mut v = sample_record_json();
        v["pagoda_nutrition_vector"]["L5"]["salt"] = json!(-1);
        let r: NutritionRecord = serde_json::from_value(v).unwrap();
        assert!(r.validate().is_err());
    }
}
