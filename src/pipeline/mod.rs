//! 流水线各阶段：视觉 → 研究循环 → Summarizer → Persister
//!
//! 每个阶段只与自己的外部协作者交互；阶段顺序与状态合并由 core::Orchestrator 负责。

pub mod events;
pub mod image;
pub mod persister;
pub mod prompts;
pub mod record;
pub mod research;
pub mod schema;
pub mod summarizer;
pub mod vision;

pub use events::{send_event, PipelineEvent};
pub use image::{encode_image, EncodedImage};
pub use persister::{PersistOutcome, Persister};
pub use record::{
    AssessmentWire, LevelQuantity, NutritionRecord, NutritionVector, OilSalt, VisionAssessment,
};
pub use research::{ResearchLoop, DEFAULT_MAX_RESEARCH_ITERATIONS};
pub use summarizer::{decode_record, strip_code_fence, Summarizer};
pub use vision::{decode_assessment, VisionStage};
