//! 核心编排层：状态机、运行状态与补丁合并、错误分类、编排器与构建器

pub mod builder;
pub mod error;
pub mod machine;
pub mod orchestrator;
pub mod run_store;
pub mod state;

pub use builder::{Models, OrchestratorBuilder};
pub use error::{FailureKind, PipelineError, RunError};
pub use machine::{transition, Event, Stage};
pub use orchestrator::Orchestrator;
pub use run_store::{RunStore, RunTicket};
pub use state::{RunState, StatePatch};
