//! 消息层：纯文本对话消息与研究循环的只追加日志

pub mod conversation;
pub mod log;

pub use conversation::{Message, Role};
pub use log::{LogEntry, MessageLog};
