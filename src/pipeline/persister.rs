//! Persister：把标准化记录交给存储协作者，恰好一次，不重试

use std::sync::Arc;

use crate::core::{FailureKind, RunError};
use crate::pipeline::NutritionRecord;
use crate::storage::ReportStore;

/// 持久化结果；save_status 总是确定的
#[derive(Debug, Clone, PartialEq)]
pub struct PersistOutcome {
    pub save_status: bool,
    pub errors: Vec<RunError>,
}

pub struct Persister {
    store: Arc<dyn ReportStore>,
}

impl Persister {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self { store }
    }

    pub async fn persist(&self, username: &str, record: &NutritionRecord) -> PersistOutcome {
        match self.store.save_analysis_report(username, record).await {
            Ok(msg) => {
                tracing::info!(username = %username, "{}", msg);
                PersistOutcome {
                    save_status: true,
                    errors: Vec::new(),
                }
            }
            Err(e) => {
                tracing::warn!(username = %username, error = %e, "save analysis report failed");
                PersistOutcome {
                    save_status: false,
                    errors: vec![RunError::new(
                        FailureKind::PersistenceFailure,
                        format!("保存失败 ({}): {}", record.dish_name, e),
                    )],
                }
            }
        }
    }
}
