//! Queued query API.
//!
//! Endpoints:
//! - `POST /api/v1/query`                 - queue a message, returns `query_id`
//! - `GET  /api/v1/query_status/{id}`     - job status, plus the conversation once completed

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use dewey_agent::JobStatusView;
use dewey_core::error::StoreError;
use dewey_core::job::JobId;

use crate::SharedState;

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Who made the request: the API key, or `anonymous` when keys are off.
#[derive(Debug, Clone)]
pub struct Submitter(pub String);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Storage failures surface as a generic message; details go to the log.
fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound(_) => api_error(StatusCode::NOT_FOUND, "Query not found"),
        other => {
            error!(error = %other, "Job store failure");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

/// Build the v1 API router. Nest this under "/api/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/query", post(submit_query_handler))
        .route("/query_status/{id}", get(query_status_handler))
        .with_state(state)
}

/// Require a configured `X-API-Key` when any keys are set.
///
/// The key becomes the job's submitter.
pub async fn api_key_middleware(
    State(state): State<SharedState>,
    mut req: Request,
    next: Next,
) -> Response {
    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let submitter = if state.api_keys.is_empty() {
        provided.unwrap_or_else(|| "anonymous".into())
    } else {
        match provided {
            Some(key) if state.api_keys.contains(&key) => key,
            _ => {
                warn!("Unauthorized request to /api/v1, missing or invalid API key");
                return api_error(StatusCode::UNAUTHORIZED, "Invalid or missing API key")
                    .into_response();
            }
        }
    };

    req.extensions_mut().insert(Submitter(submitter));
    next.run(req).await
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query_id: String,
}

async fn submit_query_handler(
    State(state): State<SharedState>,
    Extension(Submitter(submitter)): Extension<Submitter>,
    Json(payload): Json<QueryRequest>,
) -> Result<(StatusCode, Json<QueryResponse>), ApiError> {
    if payload.message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "message must not be empty"));
    }

    let id = state
        .queue
        .submit(&submitter, &payload.message)
        .await
        .map_err(store_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(QueryResponse {
            query_id: id.to_string(),
        }),
    ))
}

async fn query_status_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusView>, ApiError> {
    state
        .queue
        .status(&JobId(id))
        .await
        .map(Json)
        .map_err(store_error)
}
