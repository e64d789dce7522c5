//! OpenAPI schema aggregation for the broker API.
//!
//! # Purpose
//! Collects all routes and schema types into a single OpenAPI document served
//! at `/openapi.json`.
use crate::api::{
    channels, events, queues, stream, system,
    types::{
        BufferOptionsBody, ChannelCreateRequest, ChannelCreatedResponse, ChannelEvent,
        ChannelEventsResponse, ChannelListResponse, ChannelResponse, ConnectionsInfo,
        ErrorResponse, EventCreateRequest, EventCreatedResponse, QueueCreateRequest,
        QueueListResponse, QueueResponse, RecurringOptions, ScheduleRuleRequest, StreamEvent,
    },
};
use axum::Json;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "kairo-broker",
        version = "v1",
        description = "Kairo scheduling broker HTTP API"
    ),
    paths(
        system::health,
        system::connections,
        queues::create_queue,
        queues::list_queues,
        queues::get_queue,
        queues::delete_queue,
        events::schedule_event,
        channels::create_channel,
        channels::list_channels,
        channels::get_channel,
        channels::delete_channel,
        channels::dequeue_events,
        stream::stream_events
    ),
    components(schemas(
        ErrorResponse,
        QueueCreateRequest,
        QueueResponse,
        QueueListResponse,
        RecurringOptions,
        ScheduleRuleRequest,
        EventCreateRequest,
        EventCreatedResponse,
        BufferOptionsBody,
        ChannelCreateRequest,
        ChannelCreatedResponse,
        ChannelListResponse,
        ChannelResponse,
        ChannelEvent,
        ChannelEventsResponse,
        ConnectionsInfo,
        StreamEvent
    )),
    tags(
        (name = "system", description = "Health and connection info"),
        (name = "queues", description = "Queue registry"),
        (name = "events", description = "Event scheduling"),
        (name = "channels", description = "Buffered channels"),
        (name = "stream", description = "Live WebSocket push")
    )
)]
pub struct ApiDoc;

pub(crate) async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
