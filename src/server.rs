//! HTTP server receiving telemetry from the editor and serving results.
//!
//! This module provides an HTTP server that:
//! - Accepts periodic and final telemetry reports via POST /api/telemetry
//! - Recomputes the submission's score from its full session history
//! - Serves the latest result of each submission to review tools
//!
//! # Architecture
//!
//! ```text
//! Editor ──→ POST /api/telemetry ──→ [Session] ──→ [Score] ──→ Result Store
//!                                                                  ↓
//! Review UI ←── GET /api/activities/:activity_id/submissions/:student_id
//! ```

use crate::config::Config;
use crate::core::{ScoringResult, SessionKey};
use crate::error::{IngestError, StoreError};
use crate::events::TelemetryReport;
use crate::service::IngestionService;
use crate::store::{FileResultStore, MemoryResultStore, ResultStore, SubmissionRecord};
use crate::transparency::{
    create_shared_log, create_shared_log_with_persistence, TransparencyStats,
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Ingestion counters plus live session count.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    #[serde(flatten)]
    pub ingestion: TransparencyStats,
    pub active_sessions: usize,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

fn storage_error(e: StoreError) -> ApiError {
    tracing::error!("Result store failure: {e}");
    api_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "STORAGE_UNAVAILABLE",
        e.to_string(),
    )
}

impl From<IngestError> for ErrorResponse {
    fn from(e: IngestError) -> Self {
        let code = match e {
            IngestError::InvalidReport(_) => "INVALID_REPORT",
            IngestError::Storage(_) => "STORAGE_UNAVAILABLE",
            IngestError::Task(_) => "INGESTION_FAILED",
        };
        Self {
            error: e.to_string(),
            code: code.to_string(),
        }
    }
}

/// Open the configured result store and build the service.
pub fn build_service(config: &Config) -> anyhow::Result<IngestionService> {
    config.ensure_directories()?;

    let store: Arc<dyn ResultStore> = if config.persist_results {
        Arc::new(FileResultStore::open(config.results_path())?)
    } else {
        Arc::new(MemoryResultStore::new())
    };
    let stats = if config.persist_results {
        create_shared_log_with_persistence(config.stats_path())
    } else {
        create_shared_log()
    };

    Ok(IngestionService::from_config(config, store, stats))
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /api/telemetry
///
/// Always answers with a result for a well-formed report; a 503 means the
/// client should retry the same report.
async fn telemetry(
    State(service): State<Arc<IngestionService>>,
    payload: Result<Json<TelemetryReport>, JsonRejection>,
) -> Result<Json<ScoringResult>, ApiError> {
    let Json(report) = payload.map_err(|e| {
        tracing::warn!("Rejected telemetry report: {e}");
        api_error(StatusCode::BAD_REQUEST, "INVALID_REPORT", e.body_text())
    })?;

    // Session locks and store writes block; keep them off the async workers.
    let result = tokio::task::spawn_blocking(move || service.ingest(report))
        .await
        .map_err(|e| IngestError::Task(e.to_string()))
        .and_then(|r| r);

    match result {
        Ok(result) => Ok(Json(result)),
        Err(e @ IngestError::InvalidReport(_)) => {
            tracing::warn!("Rejected telemetry report: {e}");
            Err((StatusCode::BAD_REQUEST, Json(e.into())))
        }
        Err(e) => {
            tracing::error!("Telemetry ingestion failed: {e}");
            Err((StatusCode::SERVICE_UNAVAILABLE, Json(e.into())))
        }
    }
}

/// GET /api/activities/:activity_id/submissions/:student_id
async fn submission_result(
    State(service): State<Arc<IngestionService>>,
    Path((activity_id, student_id)): Path<(u64, u64)>,
) -> Result<Json<SubmissionRecord>, ApiError> {
    let key = SessionKey::new(activity_id, student_id);
    match service.submission_result(key).map_err(storage_error)? {
        Some(record) => Ok(Json(record)),
        None => Err(api_error(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("No result for submission {key}"),
        )),
    }
}

/// GET /api/activities/:activity_id/submissions
async fn list_submissions(
    State(service): State<Arc<IngestionService>>,
    Path(activity_id): Path<u64>,
) -> Result<Json<Vec<SubmissionRecord>>, ApiError> {
    service
        .list_activity(activity_id)
        .map(Json)
        .map_err(storage_error)
}

/// GET /api/stats
async fn stats(State(service): State<Arc<IngestionService>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        ingestion: service.stats().stats(),
        active_sessions: service.session_count(),
    })
}

/// Routes over a shared service.
pub fn router(service: Arc<IngestionService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/telemetry", post(telemetry))
        .route("/api/stats", get(stats))
        .route(
            "/api/activities/:activity_id/submissions",
            get(list_submissions),
        )
        .route(
            "/api/activities/:activity_id/submissions/:student_id",
            get(submission_result),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(service)
}

/// A server started by [`run`].
pub struct RunningServer {
    pub addr: SocketAddr,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl RunningServer {
    /// Stop accepting requests and wait until stats are saved.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            tracing::error!("Server task failed: {}", e);
        }
    }
}

/// Run the HTTP server
pub async fn run(config: Config) -> anyhow::Result<RunningServer> {
    let service = Arc::new(build_service(&config)?);
    let app = router(Arc::clone(&service));

    let listener = TcpListener::bind(config.server.bind_address()).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Authorship engine listening on http://{}", actual_addr);

    let sweeper = {
        let service = Arc::clone(&service);
        let every = config.sweep_interval.max(std::time::Duration::from_secs(1));
        let max_idle = chrono::Duration::from_std(config.session_idle_timeout)
            .unwrap_or_else(|_| chrono::Duration::hours(4));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                service.evict_idle(chrono::Utc::now(), max_idle);
            }
        })
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }

        sweeper.abort();
        if let Err(e) = service.stats().save() {
            tracing::warn!("Failed to save ingestion stats: {}", e);
        }
        tracing::info!("{}", service.stats().summary());
    });

    Ok(RunningServer {
        addr: actual_addr,
        shutdown_tx,
        task,
    })
}
