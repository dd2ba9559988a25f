//! Nutri Web 上传入口
//!
//! 启动: cargo run --bin nutri-web --features web
//! POST /analyze (multipart: username, image)，端口见 [app] web_port 或 NUTRI_WEB_PORT
//! 运行状态在结束后保留 [app] run_retention_secs 秒，也可 DELETE /runs/{thread_id} 提前移除

#![cfg(feature = "web")]

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use nutri::config::{load_config, AppConfig};
use nutri::core::{Orchestrator, OrchestratorBuilder, RunStore};
use nutri::storage::{ReportStore, SqliteReportStore};

/// 上传图片大小上限
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// 过期运行的清扫间隔
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

struct AppState {
    orchestrator: Orchestrator,
    store: Arc<dyn ReportStore>,
    runs: RunStore,
    upload_dir: PathBuf,
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(json!({ "status": "error", "message": message.into() })),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nutri::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    tokio::fs::create_dir_all(&cfg.app.upload_dir).await?;
    let store: Arc<dyn ReportStore> = Arc::new(SqliteReportStore::new(&cfg.storage.db_path).await?);
    let orchestrator = OrchestratorBuilder::new(cfg.clone())
        .with_store(Arc::clone(&store))
        .build()
        .await?;

    let state = Arc::new(AppState {
        orchestrator,
        store,
        runs: RunStore::with_retention(Duration::from_secs(cfg.app.run_retention_secs)),
        upload_dir: cfg.app.upload_dir.clone(),
    });

    let sweeper = Arc::clone(&state);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            sweeper.runs.prune().await;
        }
    });

    let app = Router::new()
        .route("/analyze", post(analyze))
        .route("/history", get(history).delete(forget))
        .route("/runs/:thread_id", get(get_run).delete(delete_run))
        .route("/runs/:thread_id/cancel", post(cancel_run))
        .route("/api/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(Arc::clone(&state));

    let port = std::env::var("NUTRI_WEB_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(cfg.app.web_port);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Nutri Web: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

/// 上传文件名的扩展名，缺省 jpg
fn upload_extension(file_name: Option<&str>) -> String {
    file_name
        .and_then(|n| FsPath::new(n).extension())
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "jpg".to_string())
}

async fn analyze(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut username: Option<String> = None;
    let mut image: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("username") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
                username = Some(text.trim().to_string());
            }
            Some("image") => {
                let ext = upload_extension(field.file_name());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
                image = Some((ext, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let username = username
        .filter(|u| !u.is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "username is required"))?;
    let (ext, bytes) =
        image.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "image is required"))?;

    let thread_id = uuid::Uuid::new_v4().to_string();
    let image_path = state.upload_dir.join(format!("{}.{}", thread_id, ext));
    tokio::fs::write(&image_path, &bytes)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    tracing::info!(thread_id = %thread_id, user = %username, path = %image_path.display(), "image uploaded");

    let result = state
        .orchestrator
        .run_tracked(&state.runs, &username, &image_path, &thread_id)
        .await;

    match result {
        Ok(run) => {
            if let Some(reason) = run.error_reason.as_deref() {
                return Ok(Json(json!({
                    "status": "invalid_image",
                    "thread_id": thread_id,
                    "message": reason,
                })));
            }
            match run.final_record {
                Some(ref record) => Ok(Json(json!({
                    "status": "success",
                    "thread_id": thread_id,
                    "data": record,
                    "save_status": run.save_status,
                    "errors": run.errors,
                }))),
                None => Ok(Json(json!({
                    "status": "error",
                    "thread_id": thread_id,
                    "message": "未生成营养记录",
                    "errors": run.errors,
                }))),
            }
        }
        Err(e) => {
            tracing::warn!(thread_id = %thread_id, "analysis failed: {}", e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

#[derive(Deserialize)]
struct HistoryQuery {
    username: String,
    k: Option<usize>,
}

async fn history(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let internal = |e: nutri::storage::StoreError| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    let entries = state
        .store
        .user_history(&q.username, q.k)
        .await
        .map_err(internal)?;
    let mut data = Vec::with_capacity(entries.len());
    for entry in entries {
        let nutrition = state
            .store
            .nutrition_summary(entry.id)
            .await
            .map_err(internal)?;
        let ingredients = state
            .store
            .ingredient_counts(entry.id)
            .await
            .map_err(internal)?;
        data.push(json!({
            "id": entry.id,
            "dish_name": entry.dish_name,
            "created_at": entry.created_at,
            "nutrition": nutrition,
            "ingredients": ingredients,
        }));
    }
    Ok(Json(json!({ "status": "success", "data": data })))
}

#[derive(Deserialize)]
struct ForgetQuery {
    username: String,
}

async fn forget(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ForgetQuery>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state
        .store
        .delete_user_history(&q.username)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(json!({ "status": "success", "deleted": deleted })))
}

async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let run = state
        .runs
        .get(&thread_id)
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "run not found"))?;
    Ok(Json(json!({ "status": "success", "data": run })))
}

/// 删除运行记录；进行中的运行会被取消
async fn delete_run(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.runs.discard(&thread_id).await {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(api_error(StatusCode::NOT_FOUND, "run not found")),
    }
}

async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.runs.cancel(&thread_id).await {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(api_error(StatusCode::NOT_FOUND, "run not found"))
    }
}
