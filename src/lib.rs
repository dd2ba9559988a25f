//! Nutri - Rust 膳食营养分析智能体
//!
//! 一张餐食照片 → 视觉判定与菜品报告 → 联网检索油盐用量 → 映射为膳食宝塔 L1-L5 → 写入用户膳食库。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 流水线状态机、RunState 补丁合并、错误分类、编排器与构建器
//! - **llm**: 模型网关抽象与实现（async-openai / OpenAI 兼容 HTTP / Mock）
//! - **memory**: 研究循环消息日志与对话消息
//! - **observability**: 日志初始化
//! - **pipeline**: 视觉阶段、研究循环、Summarizer、Persister 与结构化输出契约
//! - **storage**: 用户膳食库（SQLite / 内存）
//! - **tools**: 工具注册、并发执行与 Tavily 搜索

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod pipeline;
pub mod storage;
pub mod tools;

pub use crate::core::{Orchestrator, OrchestratorBuilder, PipelineError, RunState};
pub use crate::pipeline::{NutritionRecord, VisionAssessment};
