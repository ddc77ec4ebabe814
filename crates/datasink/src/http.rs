// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Health and stats HTTP endpoints.
//!
//! - `GET /healthz`: `200 ok` while the process runs.
//! - `GET /api/v1/stats`: pipeline and writer counters as JSON.

use crate::database::{WriterStats, WriterStatsSnapshot};
use crate::stats::{PipelineStats, PipelineStatsSnapshot};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared handler state.
pub struct AppState {
    pub pipeline: Arc<PipelineStats>,
    pub writer: Arc<WriterStats>,
    pub started: Instant,
}

impl AppState {
    pub fn new(pipeline: Arc<PipelineStats>, writer: Arc<WriterStats>) -> Self {
        Self {
            pipeline,
            writer,
            started: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_secs: u64,
    pub pipeline: PipelineStatsSnapshot,
    pub writer: WriterStatsSnapshot,
}

/// Build the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        uptime_secs: state.started.elapsed().as_secs(),
        pipeline: state.pipeline.snapshot(),
        writer: state.writer.snapshot(),
    })
}

/// Bind `address` and serve until `cancel` fires.
pub async fn serve(address: &str, state: Arc<AppState>, cancel: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(address).await?;
    serve_on(listener, state, cancel).await
}

/// Serve `address` in the background until `shutdown` fires.
///
/// A failure, including a failed bind, cancels `shutdown` so the whole
/// process stops with it.
pub fn spawn(
    address: String,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> JoinHandle<std::io::Result<()>> {
    tokio::spawn(async move {
        let result = serve(&address, state, shutdown.child_token()).await;
        if let Err(e) = &result {
            tracing::error!("HTTP server on {} failed: {}", address, e);
            shutdown.cancel();
        }
        result
    })
}

/// Serve on an already bound listener until `cancel` fires.
pub async fn serve_on(
    listener: TcpListener,
    state: Arc<AppState>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    tracing::info!("HTTP server: http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
