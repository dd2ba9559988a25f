//! 结构化输出 JSON Schema 生成（schemars）
//!
//! 将 VisionAssessment / NutritionRecord 的线上格式注入固定指令，减少模型输出格式错误。

use schemars::{schema_for, JsonSchema};

use crate::pipeline::record::{AssessmentWire, NutritionRecord};

fn schema_json<T: JsonSchema>() -> String {
    let schema = schema_for!(T);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

/// 感知模型输出 `{is_valid, reason, report}` 的 JSON Schema
pub fn vision_assessment_schema_json() -> String {
    schema_json::<AssessmentWire>()
}

/// Summarizer 输出 NutritionRecord 的 JSON Schema
pub fn nutrition_record_schema_json() -> String {
    schema_json::<NutritionRecord>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schemas_name_contract_fields() {
        let vision = vision_assessment_schema_json();
        assert!(vision.contains("is_valid"));
        assert!(vision.contains("report"));

        let record = nutrition_record_schema_json();
        assert!(record.contains("pagoda_nutrition_vector"));
        assert!(record.contains("L5"));
        assert!(record.contains("dish_name"));
    }
}
