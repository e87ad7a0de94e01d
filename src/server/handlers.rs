use super::wire::{ResultsResponse, StartRequest, StatusResponse};
use crate::core::Results;
use crate::engine::{RunBook, RunState, Runner};
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct ShardState {
    runner: Arc<Runner>,
    book: Option<Arc<RunBook>>,
}

pub fn router(runner: Arc<Runner>, book: Option<Arc<RunBook>>) -> Router {
    Router::new()
        .route("/api/start", post(start))
        .route("/api/status", get(status))
        .route("/api/results", get(results))
        .route("/api/feed-stats", get(feed_stats))
        .with_state(ShardState { runner, book })
}

/// Serve the shard API until the listener fails
pub async fn serve(listener: TcpListener, runner: Arc<Runner>, book: Option<Arc<RunBook>>) -> Result<()> {
    let addr = listener.local_addr().context("shard listener has no address")?;
    info!(%addr, pipeline = %runner.pipeline().name, "shard server listening");
    axum::serve(listener, router(runner, book))
        .await
        .context("shard server failed")
}

fn reject(code: StatusCode, message: String) -> Response {
    warn!(status = %code, "{}", message);
    (code, message).into_response()
}

async fn start(State(state): State<ShardState>, Json(req): Json<StartRequest>) -> Response {
    let current = state.runner.status();
    if current.state != RunState::Waiting {
        return reject(
            StatusCode::CONFLICT,
            format!("run already started: shard is {}", current.state.name()),
        );
    }
    if req.total_shards == 0 || req.shard >= req.total_shards {
        return reject(
            StatusCode::BAD_REQUEST,
            format!("invalid shard {} of {}", req.shard, req.total_shards),
        );
    }

    if let Err(err) = state.runner.start(req.shard, req.total_shards) {
        error!("failed to start shard: {:#}", err);
        let message = format!("{:#}", err);
        if let Some(book) = &state.book {
            let outcome: Result<Results> = Err(err);
            if let Err(err) = book.record(&outcome, state.runner.feed_stats()) {
                warn!("{:#}", err);
            }
        }
        return (StatusCode::INTERNAL_SERVER_ERROR, message).into_response();
    }

    if let Some(book) = &state.book {
        if let Err(err) = book.begin() {
            warn!("{:#}", err);
        }
    }

    spawn_wait(state);
    StatusCode::OK.into_response()
}

/// Wait for the run in the background. A worker panic takes the whole
/// process down.
fn spawn_wait(state: ShardState) {
    let run = tokio::spawn(async move {
        let outcome = state.runner.wait().await;
        if let Err(err) = &outcome {
            error!("shard run failed: {:#}", err);
        }
        if let Some(book) = &state.book {
            if let Err(err) = book.record(&outcome, state.runner.feed_stats()) {
                warn!("{:#}", err);
            }
        }
    });

    tokio::spawn(async move {
        if let Err(err) = run.await {
            if err.is_panic() {
                error!("shard run panicked, aborting");
                std::process::abort();
            }
        }
    });
}

async fn status(State(state): State<ShardState>) -> Json<StatusResponse> {
    Json(state.runner.status().into())
}

async fn results(State(state): State<ShardState>) -> Response {
    let current = state.runner.status();
    if current.err.is_none() && current.state != RunState::Finished {
        return reject(
            StatusCode::CONFLICT,
            format!("results are not available: shard is {}", current.state.name()),
        );
    }

    match state.runner.serialized_results() {
        Ok(serialized_results) => (
            StatusCode::OK,
            Json(ResultsResponse { serialized_results }),
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", err)).into_response(),
    }
}

async fn feed_stats(State(state): State<ShardState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.runner.feed_stats()))
}
