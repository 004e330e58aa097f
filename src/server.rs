use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing::get};
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::core::block::CompactBlock;
use crate::core::errors::ReadError;
use crate::runtime::block_cache::CacheView;
use crate::runtime::ingestor::IngestStatus;
use crate::runtime::reader::BlockReader;

#[derive(Clone)]
pub struct ServerState {
    pub reader: BlockReader,
    pub status: watch::Receiver<IngestStatus>,
    pub max_range_blocks: u32,
}

#[derive(Serialize)]
struct RangeResponse {
    blocks: Vec<CompactBlock>,
    error: Option<String>,
}

#[derive(Serialize)]
struct StatusResponse {
    ingest: IngestStatus,
    cache: CacheView,
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/block/{height}", get(get_block_handler))
        .route("/blocks/{start}/{end}", get(get_block_range_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

/// Serves the read API until `shutdown` fires.
pub async fn run(addr: SocketAddr, state: ServerState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let app = router(state);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "http api listening");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

fn read_error_response(err: ReadError) -> Response {
    let status = match &err {
        ReadError::BeyondTip(_) => StatusCode::NOT_FOUND,
        ReadError::Fetch(_) => StatusCode::BAD_GATEWAY,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

async fn get_block_handler(State(state): State<ServerState>, Path(height): Path<u32>) -> Response {
    match state.reader.get_block(height).await {
        Ok(block) => Json(block).into_response(),
        Err(e) => read_error_response(e),
    }
}

async fn get_block_range_handler(
    State(state): State<ServerState>,
    Path((start, end)): Path<(u32, u32)>,
) -> Response {
    let span = u64::from(end).saturating_sub(u64::from(start)) + 1;
    if end >= start && span > u64::from(state.max_range_blocks) {
        let error = format!(
            "range [{start}, {end}] spans {span} blocks, limit is {}",
            state.max_range_blocks
        );
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": error }))).into_response();
    }

    let mut stream = Box::pin(state.reader.get_block_range(start, end));
    let mut blocks = Vec::new();
    let mut error = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(block) => blocks.push(block),
            Err(e) => error = Some(e.to_string()),
        }
    }
    Json(RangeResponse { blocks, error }).into_response()
}

async fn status_handler(State(state): State<ServerState>) -> Json<StatusResponse> {
    let ingest = state.status.borrow().clone();
    Json(StatusResponse { ingest, cache: state.reader.cache().view() })
}
