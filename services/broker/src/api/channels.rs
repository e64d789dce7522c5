//! Channel API handlers.
//!
//! # Purpose
//! Channel creation, inspection, removal, and the consuming dequeue read.
//!
//! # Key invariants and assumptions
//! - Unknown channel ids answer 404 with the plain-text body
//!   `"{id} channel does not exist"`, whether or not the id parses.
//! - `GET /channels/{id}/events` empties the buffer; `GET /channels/{id}` does not.
use crate::api::error::ApiError;
use crate::api::types::{
    ChannelCreateRequest, ChannelCreatedResponse, ChannelEvent, ChannelEventsResponse,
    ChannelListResponse, ChannelResponse,
};
use crate::api::{json_body, parse_channel_id};
use crate::app::AppState;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;

#[utoipa::path(
    post,
    path = "/channels",
    tag = "channels",
    request_body = ChannelCreateRequest,
    responses(
        (status = 200, description = "Channel created", body = ChannelCreatedResponse),
        (status = 400, description = "No queues or zero size", body = crate::api::types::ErrorResponse),
        (status = 404, description = "A member queue does not exist", body = String)
    )
)]
pub(crate) async fn create_channel(
    State(state): State<AppState>,
    payload: Result<Json<ChannelCreateRequest>, JsonRejection>,
) -> Result<Json<ChannelCreatedResponse>, ApiError> {
    let body = json_body(payload)?;
    let channel_id = state
        .broker
        .create_channel(body.queues, body.buffer_options.into())
        .await?;
    Ok(Json(ChannelCreatedResponse {
        channel_id: channel_id.to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/channels",
    tag = "channels",
    responses(
        (status = 200, description = "Channel ids in creation order", body = ChannelListResponse)
    )
)]
pub(crate) async fn list_channels(State(state): State<AppState>) -> Json<ChannelListResponse> {
    let channels = state
        .broker
        .list_channels()
        .await
        .iter()
        .map(ToString::to_string)
        .collect();
    Json(ChannelListResponse { channels })
}

#[utoipa::path(
    get,
    path = "/channels/{channel_id}",
    tag = "channels",
    params(("channel_id" = String, Path, description = "Channel identifier")),
    responses(
        (status = 200, description = "Channel definition and buffer status", body = ChannelResponse),
        (status = 404, description = "Channel not found", body = String)
    )
)]
pub(crate) async fn get_channel(
    Path(channel_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ChannelResponse>, ApiError> {
    let id = parse_channel_id(&channel_id)?;
    let info = state.broker.get_channel(&id).await?;
    Ok(Json(info.into()))
}

#[utoipa::path(
    delete,
    path = "/channels/{channel_id}",
    tag = "channels",
    params(("channel_id" = String, Path, description = "Channel identifier")),
    responses(
        (status = 200, description = "Channel removed, buffered events discarded"),
        (status = 404, description = "Channel not found", body = String)
    )
)]
pub(crate) async fn delete_channel(
    Path(channel_id): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    let id = parse_channel_id(&channel_id)?;
    state.broker.delete_channel(&id).await?;
    Ok(StatusCode::OK)
}

#[utoipa::path(
    get,
    path = "/channels/{channel_id}/events",
    tag = "channels",
    params(("channel_id" = String, Path, description = "Channel identifier")),
    responses(
        (status = 200, description = "Everything buffered, in arrival order; the buffer is emptied", body = ChannelEventsResponse),
        (status = 404, description = "Channel not found", body = String)
    )
)]
pub(crate) async fn dequeue_events(
    Path(channel_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ChannelEventsResponse>, ApiError> {
    let id = parse_channel_id(&channel_id)?;
    let events = state.broker.dequeue(&id).await?;
    Ok(Json(ChannelEventsResponse {
        events: events.iter().map(ChannelEvent::from).collect(),
    }))
}
