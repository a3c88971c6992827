//! Thin HTTP surface: start crawls, poll them, read results and reports.

use crate::browser::BrowserLauncher;
use crate::config::{CrawlerConfig, ServerConfig};
use crate::crawlers::CrawlEngine;
use crate::error::CrawlError;
use crate::results::CrawlSummary;
use crate::store::{ResultStore, SqliteStore, run_blocking};
use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const DEFAULT_REPORT_LIMIT: usize = 50;
const MAX_REPORT_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Done,
    Failed,
}

/// Progress of one crawl started over HTTP
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub run_id: u64,
    pub url: String,
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<CrawlSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Crawl runs started over HTTP. Running entries are always kept; only the
/// newest `keep_finished` finished ones are.
#[derive(Debug)]
pub struct RunRegistry {
    next_id: u64,
    keep_finished: usize,
    runs: BTreeMap<u64, RunStatus>,
}

impl RunRegistry {
    pub fn new(keep_finished: usize) -> Self {
        Self {
            next_id: 0,
            keep_finished,
            runs: BTreeMap::new(),
        }
    }

    fn register(&mut self, url: &str) -> u64 {
        self.next_id += 1;
        let run_id = self.next_id;
        self.runs.insert(
            run_id,
            RunStatus {
                run_id,
                url: url.to_string(),
                state: RunState::Running,
                summary: None,
                error: None,
            },
        );
        run_id
    }

    fn finish(&mut self, run_id: u64, outcome: Result<CrawlSummary, CrawlError>) {
        if let Some(status) = self.runs.get_mut(&run_id) {
            match outcome {
                Ok(summary) => {
                    status.state = RunState::Done;
                    status.summary = Some(summary);
                }
                Err(e) => {
                    status.state = RunState::Failed;
                    status.error = Some(e.to_string());
                }
            }
        }
        self.evict_finished();
    }

    /// Ids ascend with start order, so the oldest finished runs go first
    fn evict_finished(&mut self) {
        let finished: Vec<u64> = self
            .runs
            .values()
            .filter(|run| run.state != RunState::Running)
            .map(|run| run.run_id)
            .collect();
        let excess = finished.len().saturating_sub(self.keep_finished);
        for run_id in &finished[..excess] {
            self.runs.remove(run_id);
        }
    }

    fn get(&self, run_id: u64) -> Option<RunStatus> {
        self.runs.get(&run_id).cloned()
    }
}

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub launcher: Arc<dyn BrowserLauncher>,
    pub crawler: CrawlerConfig,
    pub limits: ServerConfig,
    pub runs: Arc<RwLock<RunRegistry>>,
}

impl AppState {
    pub fn new(
        store: Arc<SqliteStore>,
        launcher: Arc<dyn BrowserLauncher>,
        crawler: CrawlerConfig,
        limits: ServerConfig,
    ) -> Self {
        let runs = RunRegistry::new(limits.finished_runs_kept);
        Self {
            store,
            launcher,
            crawler,
            limits,
            runs: Arc::new(RwLock::new(runs)),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/crawl/start", post(start_crawl))
        .route("/crawl/runs/:run_id", get(run_status))
        .route("/crawl/results", get(crawl_results))
        .route("/reports", get(list_reports))
        .with_state(state)
}

/// Start the web server.
pub async fn serve(state: AppState, bind: &str) -> std::io::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    ::log::info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Launches the browser before answering, so launch failures surface as 500.
/// The crawl itself continues in the background.
async fn start_crawl(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid request body: {}", rejection.body_text()),
            );
        }
    };
    let Some(url) = body.get("url").and_then(Value::as_str).filter(|u| !u.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing or invalid url");
    };

    let store: Arc<dyn ResultStore> = state.store.clone();
    let engine = match CrawlEngine::new(
        url,
        state.crawler.clone(),
        Arc::clone(&state.launcher),
        store,
    ) {
        Ok(engine) => engine,
        Err(e @ (CrawlError::MissingUrl | CrawlError::InvalidUrl(_))) => {
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let run = match engine.start().await {
        Ok(run) => run,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let seed = run.seed().to_string();
    let run_id = state.runs.write().await.register(&seed);
    let runs = Arc::clone(&state.runs);
    tokio::spawn(async move {
        let outcome = run.wait().await;
        runs.write().await.finish(run_id, outcome);
    });

    Json(json!({
        "message": "Crawl started",
        "url": seed,
        "run_id": run_id,
    }))
    .into_response()
}

async fn run_status(State(state): State<AppState>, Path(run_id): Path<u64>) -> Response {
    match state.runs.read().await.get(run_id) {
        Some(status) => Json(status).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("Unknown run {}", run_id)),
    }
}

async fn crawl_results(State(state): State<AppState>) -> Response {
    let (pages_limit, links_limit) = (state.limits.recent_pages_limit, state.limits.links_limit);
    let results = run_blocking(&state.store, move |store| {
        Ok((store.list_recent_pages(pages_limit)?, store.list_links(links_limit)?))
    })
    .await;
    match results {
        Ok((pages, links)) => Json(json!({ "pages": pages, "links": links })).into_response(),
        Err(e) => {
            ::log::error!("Failed to read crawl results: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReportParams {
    pub kind: Option<String>,
    pub limit: Option<usize>,
}

async fn list_reports(
    State(state): State<AppState>,
    Query(params): Query<ReportParams>,
) -> Response {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_REPORT_LIMIT)
        .min(MAX_REPORT_LIMIT);
    let kind = params.kind;
    match run_blocking(&state.store, move |store| store.list_reports(kind.as_deref(), limit)).await {
        Ok(reports) => Json(reports).into_response(),
        Err(e) => {
            ::log::error!("Failed to read reports: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
