//! Queue API handlers.
//!
//! # Purpose
//! Queue registration, listing, inspection, and removal. Unknown queues on
//! these endpoints answer with a bare 404.
use crate::api::error::{ApiError, api_not_found_empty};
use crate::api::json_body;
use crate::api::types::{QueueCreateRequest, QueueListResponse, QueueResponse};
use crate::app::AppState;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use kairo_broker::BrokerError;

fn queue_error(err: BrokerError) -> ApiError {
    match err {
        BrokerError::QueueNotFound(_) => api_not_found_empty(),
        other => other.into(),
    }
}

#[utoipa::path(
    post,
    path = "/queues",
    tag = "queues",
    request_body = QueueCreateRequest,
    responses(
        (status = 200, description = "Queue registered (repeat creates succeed)", body = QueueResponse),
        (status = 400, description = "Invalid queue id", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn create_queue(
    State(state): State<AppState>,
    payload: Result<Json<QueueCreateRequest>, JsonRejection>,
) -> Result<Json<QueueResponse>, ApiError> {
    let body = json_body(payload)?;
    state.broker.create_queue(&body.id).await?;
    let info = state.broker.get_queue(&body.id).await.map_err(queue_error)?;
    Ok(Json(info.into()))
}

#[utoipa::path(
    get,
    path = "/queues",
    tag = "queues",
    responses(
        (status = 200, description = "Queues in creation order", body = QueueListResponse)
    )
)]
pub(crate) async fn list_queues(State(state): State<AppState>) -> Json<QueueListResponse> {
    let queues = state
        .broker
        .list_queues()
        .await
        .into_iter()
        .map(QueueResponse::from)
        .collect();
    Json(QueueListResponse { queues })
}

#[utoipa::path(
    get,
    path = "/queues/{id}",
    tag = "queues",
    params(("id" = String, Path, description = "Queue identifier")),
    responses(
        (status = 200, description = "Queue with delivery counters", body = QueueResponse),
        (status = 404, description = "Queue not found")
    )
)]
pub(crate) async fn get_queue(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<QueueResponse>, ApiError> {
    let info = state.broker.get_queue(&id).await.map_err(queue_error)?;
    Ok(Json(info.into()))
}

#[utoipa::path(
    delete,
    path = "/queues/{id}",
    tag = "queues",
    params(("id" = String, Path, description = "Queue identifier")),
    responses(
        (status = 200, description = "Queue removed; its pending rules are cancelled"),
        (status = 404, description = "Queue not found")
    )
)]
pub(crate) async fn delete_queue(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    state.broker.delete_queue(&id).await.map_err(queue_error)?;
    Ok(StatusCode::OK)
}
