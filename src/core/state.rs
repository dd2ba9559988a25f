//! 单次运行的聚合状态 RunState 与阶段补丁 StatePatch
//!
//! 各阶段只返回补丁，由 Orchestrator 合并：Option 字段后写覆盖，errors 与 messages 只拼接不替换。

use std::path::PathBuf;

use serde::Serialize;

use crate::core::RunError;
use crate::memory::{LogEntry, MessageLog};
use crate::pipeline::{NutritionRecord, VisionAssessment};

/// 以 thread_id 标识的一次运行；在 `run()` 入口创建，返回后不做隐式持久化
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub thread_id: String,
    pub username: String,
    pub image_ref: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision_assessment: Option<VisionAssessment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_record: Option<NutritionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    pub save_status: Option<bool>,
    pub errors: Vec<RunError>,
    pub messages: MessageLog,
}

impl RunState {
    pub fn new(
        thread_id: impl Into<String>,
        username: impl Into<String>,
        image_ref: impl Into<PathBuf>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            username: username.into(),
            image_ref: image_ref.into(),
            ..Self::default()
        }
    }

    /// 合并阶段补丁
    pub fn merge(&mut self, patch: StatePatch) {
        if let Some(v) = patch.vision_assessment {
            self.vision_assessment = Some(v);
        }
        if let Some(v) = patch.extracted_info {
            self.extracted_info = Some(v);
        }
        if let Some(v) = patch.final_record {
            self.final_record = Some(v);
        }
        if let Some(v) = patch.error_reason {
            self.error_reason = Some(v);
        }
        if let Some(v) = patch.save_status {
            self.save_status = Some(v);
        }
        self.errors.extend(patch.errors);
        self.messages.extend(patch.messages);
    }

    /// 视觉判定为不合法的图片
    pub fn is_invalid_image(&self) -> bool {
        self.error_reason.is_some()
    }
}

/// 阶段返回的部分状态
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub vision_assessment: Option<VisionAssessment>,
    pub extracted_info: Option<String>,
    pub final_record: Option<NutritionRecord>,
    pub error_reason: Option<String>,
    pub save_status: Option<bool>,
    pub errors: Vec<RunError>,
    pub messages: Vec<LogEntry>,
}

impl StatePatch {
    pub fn vision(assessment: VisionAssessment) -> Self {
        Self {
            vision_assessment: Some(assessment),
            ..Self::default()
        }
    }

    pub fn messages(messages: Vec<LogEntry>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn error(error: RunError) -> Self {
        Self {
            errors: vec![error],
            ..Self::default()
        }
    }

    pub fn with_save_status(mut self, status: bool) -> Self {
        self.save_status = Some(status);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FailureKind;

    #[test]
    fn test_merge_overwrites_options_and_concatenates_lists() {
        let mut state = RunState::new("t1", "alice", "meal.jpg");
        state.merge(StatePatch::messages(vec![LogEntry::system("s"), LogEntry::user("u")]));
        state.merge(StatePatch {
            extracted_info: Some("first".to_string()),
            ..StatePatch::default()
        });
        state.merge(StatePatch {
            extracted_info: Some("second".to_string()),
            messages: vec![LogEntry::model("done", vec![])],
            ..StatePatch::default()
        });
        state.merge(StatePatch::error(RunError::new(FailureKind::MalformedRecord, "a")));
        state.merge(StatePatch::error(RunError::new(FailureKind::PersistenceFailure, "b")).with_save_status(false));

        assert_eq!(state.extracted_info.as_deref(), Some("second"));
        assert_eq!(state.messages.len(), 3);
        assert_eq!(state.errors.len(), 2);
        assert_eq!(state.save_status, Some(false));
    }

    #[test]
    fn test_empty_patch_keeps_fields() {
        let mut state = RunState::new("t1", "alice", "meal.jpg");
        state.merge(StatePatch::default().with_save_status(true));
        state.merge(StatePatch::default());
        assert_eq!(state.save_status, Some(true));
    }

    #[test]
    fn test_serializes_camel_case() {
        let state = RunState::new("t1", "alice", "meal.jpg");
        let v = serde_json::to_value(&state).unwrap();
        assert_eq!(v["threadId"], "t1");
        assert!(v.get("finalRecord").is_none());
        assert!(v["saveStatus"].is_null());
    }
}
