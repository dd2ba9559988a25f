//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `NUTRI__*` 覆盖（双下划线表示嵌套，如 `NUTRI__PIPELINE__MAX_RESEARCH_ITERATIONS=3`）。
//! API Key 不写进配置文件：`DASHSCOPE_API_KEY`（回退 `OPENAI_API_KEY`）与 `TAVILY_API_KEY`。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub pipeline: PipelineSection,
    pub tools: ToolsSection,
    pub storage: StorageSection,
}

/// [app] 段：应用名、上传目录、nutri-web 端口与运行状态保留时长
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// nutri-web 保存上传图片的目录
    pub upload_dir: PathBuf,
    pub web_port: u16,
    /// 已结束运行在 RunStore 中保留的秒数
    pub run_retention_secs: u64,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            upload_dir: PathBuf::from("uploads"),
            web_port: 8000,
            run_retention_secs: 600,
        }
    }
}

/// [llm] 段：OpenAI 兼容端点与三个模型
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// dashscope / openai / mock
    pub provider: String,
    pub base_url: String,
    /// 多模态识别模型
    pub vision_model: String,
    /// 可调用工具的研究模型
    pub research_model: String,
    pub summarize_model: String,
    pub vision_temperature: f32,
    pub text_temperature: f32,
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "dashscope".to_string(),
            base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            vision_model: "qwen3-vl-plus".to_string(),
            research_model: "qwen-plus".to_string(),
            summarize_model: "qwen-plus".to_string(),
            vision_temperature: 0.1,
            text_temperature: 0.0,
            request_timeout_secs: 60,
        }
    }
}

impl LlmSection {
    /// 按 provider 读取 API Key；dashscope 回退到 OPENAI_API_KEY
    pub fn api_key(&self) -> Option<String> {
        let from_env = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        match self.provider.to_lowercase().as_str() {
            "mock" => None,
            "openai" => from_env("OPENAI_API_KEY"),
            _ => from_env("DASHSCOPE_API_KEY").or_else(|| from_env("OPENAI_API_KEY")),
        }
    }
}

/// [pipeline] 段：研究循环上限、单次工具超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// 研究模型最多调用次数
    pub max_research_iterations: usize,
    pub tool_timeout_secs: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_research_iterations: 5,
            tool_timeout_secs: 30,
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub search: SearchSection,
}

/// [tools.search] 段：Tavily 端点、返回条数、超时、最大字符数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub endpoint: String,
    pub max_results: usize,
    pub timeout_secs: u64,
    pub max_result_chars: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            endpoint: "https://api.tavily.com/search".to_string(),
            max_results: 3,
            timeout_secs: 15,
            max_result_chars: 8000,
        }
    }
}

/// [storage] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub db_path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("user_diet.db"),
        }
    }
}

/// 从 config 目录加载配置，环境变量 NUTRI__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 NUTRI__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("NUTRI")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.pipeline.max_research_iterations, 5);
        assert_eq!(cfg.tools.search.max_results, 3);
        assert_eq!(cfg.llm.vision_model, "qwen3-vl-plus");
        assert_eq!(cfg.storage.db_path, PathBuf::from("user_diet.db"));
        assert_eq!(cfg.app.run_retention_secs, 600);
    }

    #[test]
    fn test_explicit_file_overrides_and_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nutri.toml");
        std::fs::write(
            &path,
            "[pipeline]\nmax_research_iterations = 3\n\n[tools.search]\nmax_results = 5\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.pipeline.max_research_iterations, 3);
        assert_eq!(cfg.pipeline.tool_timeout_secs, 30);
        assert_eq!(cfg.tools.search.max_results, 5);
        assert_eq!(cfg.tools.search.timeout_secs, 15);
    }

    #[test]
    fn test_mock_provider_has_no_key() {
        let llm = LlmSection {
            provider: "mock".to_string(),
            ..LlmSection::default()
        };
        assert!(llm.api_key().is_none());
    }
}
