//! LLM 层：模型网关抽象与实现（async-openai 文本补全 / OpenAI 兼容 HTTP / Mock）

pub mod compat;
pub mod mock;
pub mod openai;
pub mod traits;
mod wire;

pub use compat::{CompatClient, RetryConfig};
pub use mock::{ScriptedLlmClient, ScriptedResearchModel, StaticVisionModel};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError, ModelTurn, ResearchModel, VisionModel};
