//! 视觉阶段：编码图片 → 单次感知模型调用 → 按 VisionAssessment 契约解码
//!
//! 本层不重试；无法解码或违反互斥约束的输出一律视为 SchemaViolation，不降级为默认值。

use std::path::Path;
use std::sync::Arc;

use crate::core::PipelineError;
use crate::llm::VisionModel;
use crate::pipeline::prompts::vision_instruction;
use crate::pipeline::summarizer::strip_code_fence;
use crate::pipeline::{encode_image, VisionAssessment};

pub struct VisionStage {
    model: Arc<dyn VisionModel>,
    instruction: String,
}

impl VisionStage {
    pub fn new(model: Arc<dyn VisionModel>) -> Self {
        Self {
            model,
            instruction: vision_instruction(),
        }
    }

    pub async fn analyze_image(&self, image_ref: &Path) -> Result<VisionAssessment, PipelineError> {
        let image = encode_image(image_ref).await?;
        tracing::debug!(mime = %image.mime, "image encoded");
        let raw = self.model.assess(&image, &self.instruction).await?;
        decode_assessment(&raw)
    }
}

/// 把感知模型原始输出解码为 VisionAssessment
pub fn decode_assessment(raw: &str) -> Result<VisionAssessment, PipelineError> {
    let body = strip_code_fence(raw);
    serde_json::from_str::<VisionAssessment>(body)
        .map_err(|e| PipelineError::schema("vision", format!("{}: {}", e, body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StaticVisionModel;
    use tempfile::TempDir;

    #[test]
    fn test_decode_fenced_assessment() {
        let raw = "```json\n{\"is_valid\": true, \"reason\": \"\", \"report\": \"鸡蛋,西红柿\"}\n```";
        assert_eq!(
            decode_assessment(raw).unwrap(),
            VisionAssessment::valid("鸡蛋,西红柿")
        );
    }

    #[test]
    fn test_missing_required_field_is_schema_violation() {
        let err = decode_assessment("{\"reason\": \"x\"}").unwrap_err();
        assert!(matches!(err, PipelineError::SchemaViolation { boundary: "vision", .. }));
        let err = decode_assessment("我看到了一盘菜").unwrap_err();
        assert!(matches!(err, PipelineError::SchemaViolation { .. }));
        let err = decode_assessment("{\"is_valid\": true, \"report\": \"\"}").unwrap_err();
        assert!(matches!(err, PipelineError::SchemaViolation { .. }));
    }

    #[tokio::test]
    async fn test_analyze_image_single_call() {
        let dir = TempDir::new().unwrap();
        let img = dir.path().join("meal.jpg");
        std::fs::write(&img, [0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10]).unwrap();

        let model = Arc::new(StaticVisionModel::invalid("图片模糊"));
        let stage = VisionStage::new(model.clone());
        let a = stage.analyze_image(&img).await.unwrap();
        assert_eq!(a.reason(), Some("图片模糊"));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_image_makes_no_model_call() {
        let model = Arc::new(StaticVisionModel::valid("鸡蛋"));
        let stage = VisionStage::new(model.clone());
        let err = stage.analyze_image(Path::new("/nonexistent/meal.jpg")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Image(_)));
        assert_eq!(model.calls(), 0);
    }
}
