use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::common::GenerationRequest;
use crate::cycle::{CycleSnapshot, GenerationCycle};
use crate::error::{CycleError, ErrorKind};

const INDEX_HTML: &str = include_str!("../assets/index.html");

pub type SharedCycle = Arc<GenerationCycle>;

/// Body of the generate and regenerate endpoints.
///
/// `notice` carries refusals that leave the cycle untouched (busy, cancelled),
/// which the snapshot alone can't show.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GenerateResponse {
    #[serde(flatten)]
    pub snapshot: CycleSnapshot,
    pub notice: Option<String>,
}

pub async fn start_server(port: u16, cycle: SharedCycle) -> Result<()> {
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;

    log::info!("Server started at http://{}", &addr);

    serve(listener, cycle).await
}

pub async fn serve(listener: TcpListener, cycle: SharedCycle) -> Result<()> {
    axum::serve(listener, router(cycle)).await?;
    Ok(())
}

pub fn router(cycle: SharedCycle) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/state", get(state))
        .route("/api/generate", post(generate))
        .route("/api/regenerate", post(regenerate))
        .route("/api/clear", post(clear))
        .route("/api/cancel", post(cancel))
        .with_state(cycle)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn state(State(cycle): State<SharedCycle>) -> Json<CycleSnapshot> {
    Json(cycle.snapshot())
}

async fn generate(
    State(cycle): State<SharedCycle>,
    Json(request): Json<GenerationRequest>,
) -> Response {
    let outcome = cycle.submit(request).await;
    respond(&cycle, outcome.err())
}

async fn regenerate(State(cycle): State<SharedCycle>) -> Response {
    let outcome = cycle.regenerate().await;
    respond(&cycle, outcome.err())
}

async fn clear(State(cycle): State<SharedCycle>) -> Json<CycleSnapshot> {
    Json(cycle.clear())
}

async fn cancel(State(cycle): State<SharedCycle>) -> Json<CycleSnapshot> {
    if cycle.cancel() {
        log::info!("Generation cancelled by client");
    }
    Json(cycle.snapshot())
}

fn respond(cycle: &GenerationCycle, err: Option<CycleError>) -> Response {
    let status = err.as_ref().map_or(StatusCode::OK, status_for);
    let notice = err
        .filter(|err| matches!(err.kind(), ErrorKind::Busy | ErrorKind::Cancelled))
        .map(|err| err.to_string());
    let body = GenerateResponse {
        snapshot: cycle.snapshot(),
        notice,
    };
    (status, Json(body)).into_response()
}

fn status_for(err: &CycleError) -> StatusCode {
    if err.is_timeout() {
        return StatusCode::GATEWAY_TIMEOUT;
    }
    match err.kind() {
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Busy | ErrorKind::Cancelled => StatusCode::CONFLICT,
        ErrorKind::EmptyResponse | ErrorKind::Transport => StatusCode::BAD_GATEWAY,
    }
}
