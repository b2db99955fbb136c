//! Gateway HTTP server: webhook verify handshake, event ingestion, and the
//! status/health endpoints backed by the pipeline.

use crate::config::{self, Config};
use crate::gateway::webhook::{parse_envelope, WebhookEnvelope};
use crate::media::ensure_media_dirs;
use crate::pipeline::Pipeline;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared state for the gateway (pipeline + verify token).
#[derive(Clone)]
pub struct GatewayState {
    pub pipeline: Arc<Pipeline>,
    /// Token the platform echoes during the GET /webhook handshake.
    pub verify_token: Option<String>,
}

impl GatewayState {
    pub fn new(config: &Config) -> Self {
        Self {
            pipeline: Arc::new(Pipeline::from_config(config)),
            verify_token: config::resolve_verify_token(config),
        }
    }
}

/// Build the gateway router. Exposed separately from `run_gateway` so tests
/// can bind it on a free port.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        .with_state(state)
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Blocks until shutdown (Ctrl+C), then stops the pipeline and waits for the
/// queue to drain.
pub async fn run_gateway(config: Config) -> Result<()> {
    if let Err(e) = ensure_media_dirs(&config.storage.root) {
        log::warn!(
            "creating media directories under {} failed: {}",
            config.storage.root.display(),
            e
        );
    }
    if config::resolve_platform_token(&config).is_none() {
        log::warn!("no platform access token configured; media downloads will fail");
    }
    if config.docs.api_url.is_none() || config::resolve_docs_token(&config).is_none() {
        log::warn!("document service not configured; stored media will not be forwarded");
    }

    let state = GatewayState::new(&config);
    let pipeline = state.pipeline.clone();
    pipeline.clone().ensure_worker();
    let app = router(state);

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;

    // Two-phase: stop accepting, then let the worker drain in-flight tasks.
    log::info!("gateway stopping; draining pipeline");
    pipeline.shutdown().await;
    log::info!("gateway stopped");
    Ok(())
}

/// Completes when the process should shut down (SIGINT).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("listening for shutdown signal failed: {}", e);
    }
}

async fn health(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let status = state.pipeline.status();
    Json(json!({
        "status": "healthy",
        "services": {
            "webhook": "active",
            "pipeline": if status.worker_busy { "active" } else { "idle" },
            "workerRunning": status.worker_running,
        }
    }))
}

async fn status(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let status = state.pipeline.status();
    Json(json!({
        "status": "healthy",
        "mediaProcessing": {
            "queueDepth": status.queue_depth,
            "workerRunning": status.worker_running,
            "queueStatus": if status.worker_busy { "active" } else { "idle" },
        },
        "recentTasks": status.recent_tasks,
    }))
}

/// GET /webhook: the platform's subscription handshake. Echo the challenge
/// when the verify token matches.
async fn verify_webhook(
    State(state): State<GatewayState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token");
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();
    match (&state.verify_token, mode, token) {
        (Some(expected), Some("subscribe"), Some(got)) if got == expected => {
            log::info!("webhook verified");
            (StatusCode::OK, challenge)
        }
        _ => {
            log::warn!("webhook verification rejected");
            (StatusCode::FORBIDDEN, String::new())
        }
    }
}

/// POST /webhook: parse, enqueue, acknowledge. Always 200 — the platform
/// redelivers on any other status and downstream failures already land on
/// the task, not the response.
async fn receive_webhook(State(state): State<GatewayState>, body: Bytes) -> Json<serde_json::Value> {
    match serde_json::from_slice::<WebhookEnvelope>(&body) {
        Ok(envelope) => {
            for msg in parse_envelope(&envelope) {
                state.pipeline.clone().enqueue(msg);
            }
        }
        Err(e) => {
            log::warn!("unparseable webhook payload ({} bytes): {}", body.len(), e);
        }
    }
    Json(json!({ "status": "ok" }))
}
