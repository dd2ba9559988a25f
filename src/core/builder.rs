//! 编排器构建器：由 AppConfig 组装模型、工具、存储与各阶段
//!
//! 未配置 API Key（或 provider = mock）时退回本地 Mock 模型，便于离线演示。

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::core::{Orchestrator, PipelineError};
use crate::llm::mock::demo_record_json;
use crate::llm::{
    CompatClient, LlmClient, ModelTurn, OpenAiClient, ResearchModel, ScriptedLlmClient,
    ScriptedResearchModel, StaticVisionModel, VisionModel,
};
use crate::pipeline::{Persister, PipelineEvent, ResearchLoop, Summarizer, VisionStage};
use crate::storage::{ReportStore, SqliteReportStore};
use crate::tools::{SearchTool, ToolExecutor, ToolRegistry};

const DEMO_REPORT: &str = "家常菜：西红柿炒鸡蛋；西红柿约200克，鸡蛋约100克，油亮，有葱花";
const DEMO_FINDINGS: &str = "西红柿炒鸡蛋：西红柿200克，鸡蛋100克；常见做法用油约15克、盐约3克。oil:15 salt:3";

/// 三类模型协作者
pub struct Models {
    pub vision: Arc<dyn VisionModel>,
    pub research: Arc<dyn ResearchModel>,
    pub summarize: Arc<dyn LlmClient>,
}

pub struct OrchestratorBuilder {
    config: AppConfig,
    store: Option<Arc<dyn ReportStore>>,
    models: Option<Models>,
    registry: Option<ToolRegistry>,
    event_tx: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            store: None,
            models: None,
            registry: None,
            event_tx: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ReportStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_models(mut self, models: Models) -> Self {
        self.models = Some(models);
        self
    }

    pub fn with_tools(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_event_sender(mut self, tx: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// 默认工具集：Tavily 搜索
    pub fn build_tool_registry(&self) -> ToolRegistry {
        let search = &self.config.tools.search;
        let mut tools = ToolRegistry::new();
        tools.register(SearchTool::new(
            search.endpoint.clone(),
            None,
            search.max_results,
            search.timeout_secs,
            search.max_result_chars,
        ));
        tools
    }

    /// 根据配置与环境变量创建模型；无 Key 时使用 Mock
    pub fn build_models(&self) -> Models {
        let llm = &self.config.llm;
        match llm.api_key() {
            Some(key) => {
                tracing::info!(
                    provider = %llm.provider,
                    vision = %llm.vision_model,
                    research = %llm.research_model,
                    "Using OpenAI-compatible models"
                );
                let vision = CompatClient::new(&llm.base_url, &llm.vision_model, &key, llm.request_timeout_secs)
                    .with_temperature(llm.vision_temperature);
                let research = CompatClient::new(&llm.base_url, &llm.research_model, &key, llm.request_timeout_secs)
                    .with_temperature(llm.text_temperature);
                let summarize = OpenAiClient::new(Some(llm.base_url.as_str()), &llm.summarize_model, Some(key.as_str()))
                    .with_temperature(llm.text_temperature);
                Models {
                    vision: Arc::new(vision),
                    research: Arc::new(research),
                    summarize: Arc::new(summarize),
                }
            }
            None => {
                tracing::warn!("No API key set or provider is mock, using Mock models");
                Models {
                    vision: Arc::new(StaticVisionModel::valid(DEMO_REPORT)),
                    research: Arc::new(ScriptedResearchModel::new(vec![ModelTurn::content(
                        DEMO_FINDINGS,
                    )])),
                    summarize: Arc::new(ScriptedLlmClient::single(demo_record_json())),
                }
            }
        }
    }

    /// 默认存储：配置中的 SQLite 文件
    pub async fn build_store(&self) -> Result<Arc<dyn ReportStore>, PipelineError> {
        let path = &self.config.storage.db_path;
        let store = SqliteReportStore::new(path)
            .await
            .map_err(|e| PipelineError::Config(format!("open {}: {}", path.display(), e)))?;
        Ok(Arc::new(store))
    }

    pub async fn build(mut self) -> Result<Orchestrator, PipelineError> {
        let store = match self.store.take() {
            Some(store) => store,
            None => self.build_store().await?,
        };
        let registry = match self.registry.take() {
            Some(registry) => registry,
            None => self.build_tool_registry(),
        };
        let models = match self.models.take() {
            Some(models) => models,
            None => self.build_models(),
        };
        let config = &self.config;

        let executor = Arc::new(ToolExecutor::new(registry, config.pipeline.tool_timeout_secs));
        let research = ResearchLoop::new(models.research, executor)
            .with_max_iterations(config.pipeline.max_research_iterations);
        let orchestrator = Orchestrator::new(
            VisionStage::new(models.vision),
            research,
            Summarizer::new(models.summarize),
            Persister::new(store),
        );
        Ok(match self.event_tx.take() {
            Some(tx) => orchestrator.with_event_sender(tx),
            None => orchestrator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryReportStore;

    #[tokio::test]
    async fn test_mock_fallback_builds() {
        let mut config = AppConfig::default();
        config.llm.provider = "mock".to_string();
        config.pipeline.max_research_iterations = 3;
        let orchestrator = OrchestratorBuilder::new(config)
            .with_store(Arc::new(InMemoryReportStore::new()))
            .build()
            .await
            .unwrap();
        assert_eq!(orchestrator.max_research_iterations(), 3);
    }

    #[test]
    fn test_default_tools_are_search_only() {
        let names = OrchestratorBuilder::new(AppConfig::default())
            .build_tool_registry()
            .tool_names();
        assert_eq!(names, vec![crate::tools::SEARCH_TOOL_NAME.to_string()]);
    }
}
