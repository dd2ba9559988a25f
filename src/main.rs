//! Nutri 命令行
//!
//! 入口：初始化日志、加载配置，分发到 analyze / history / vector / forget / reset 子命令。

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use nutri::config::{load_config, AppConfig};
use nutri::core::OrchestratorBuilder;
use nutri::storage::{local_today, MealTime, ReportStore, SqliteReportStore};

/// 膳食营养分析
#[derive(Parser)]
#[command(name = "nutri")]
#[command(about = "Nutri - 拍照识菜、检索油盐、宝塔 L1-L5 量化入库", long_about = None)]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 分析一张餐食照片并打印 RunState（JSON）
    Analyze {
        #[arg(long)]
        user: String,
        #[arg(long)]
        image: PathBuf,
        /// 会话 id，缺省时随机生成
        #[arg(long)]
        thread: Option<String>,
    },

    /// 最近的历史菜单
    History {
        #[arg(long)]
        user: String,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// 今日某餐次的六维营养向量 [L1, L2, L3, L4, oil, salt]
    Vector {
        #[arg(long)]
        user: String,
        /// breakfast / lunch / dinner
        #[arg(long)]
        meal: MealTime,
    },

    /// 删除用户全部历史
    Forget {
        #[arg(long)]
        user: String,
    },

    /// 清空整个膳食库（所有用户）
    Reset {
        /// 确认执行
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nutri::observability::init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    match cli.command {
        Commands::Analyze { user, image, thread } => analyze(cfg, &user, image, thread).await,
        Commands::History { user, limit } => {
            let store = open_store(&cfg).await?;
            let mut out = Vec::new();
            for entry in store.user_history(&user, limit).await? {
                let totals = store.nutrition_summary(entry.id).await?;
                let ingredients = store.ingredient_counts(entry.id).await?;
                out.push(serde_json::json!({
                    "id": entry.id,
                    "dish_name": entry.dish_name,
                    "created_at": entry.created_at,
                    "nutrition": totals,
                    "ingredients": ingredients,
                }));
            }
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
        Commands::Vector { user, meal } => {
            let store = open_store(&cfg).await?;
            let v = store.meal_vector(&user, meal, local_today()).await?;
            println!("{}", serde_json::to_string(&v)?);
            Ok(())
        }
        Commands::Forget { user } => {
            let store = open_store(&cfg).await?;
            let n = store.delete_user_history(&user).await?;
            println!("已清除用户 {} 的 {} 条历史菜单", user, n);
            Ok(())
        }
        Commands::Reset { yes } => {
            if !yes {
                anyhow::bail!("reset 会删除所有用户数据，确认请加 --yes");
            }
            let store = open_store(&cfg).await?;
            store.clear().await?;
            println!("膳食库已清空");
            Ok(())
        }
    }
}

async fn open_store(cfg: &AppConfig) -> anyhow::Result<SqliteReportStore> {
    SqliteReportStore::new(&cfg.storage.db_path)
        .await
        .with_context(|| format!("Failed to open {}", cfg.storage.db_path.display()))
}

async fn analyze(
    cfg: AppConfig,
    user: &str,
    image: PathBuf,
    thread: Option<String>,
) -> anyhow::Result<()> {
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let progress = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let Ok(line) = serde_json::to_string(&event) {
                tracing::info!(event = %line, "progress");
            }
        }
    });

    let orchestrator = OrchestratorBuilder::new(cfg)
        .with_event_sender(event_tx)
        .build()
        .await
        .context("Failed to build orchestrator")?;

    let thread_id = thread.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let result = orchestrator.run(user, &image, &thread_id).await;
    drop(orchestrator);
    let _ = progress.await;

    let state = result.with_context(|| format!("Analysis failed for {}", image.display()))?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
