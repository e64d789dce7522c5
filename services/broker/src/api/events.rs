//! Event submission handler.
use crate::api::error::ApiError;
use crate::api::json_body;
use crate::api::types::{EventCreateRequest, EventCreatedResponse};
use crate::app::AppState;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use kairo_broker::{NewEvent, ScheduleRule};

#[utoipa::path(
    post,
    path = "/events",
    tag = "events",
    request_body = EventCreateRequest,
    responses(
        (status = 200, description = "Event accepted and every rule armed", body = EventCreatedResponse),
        (status = 400, description = "Empty rules or invalid recurrence", body = crate::api::types::ErrorResponse),
        (status = 404, description = "A rule names an unknown queue", body = String)
    )
)]
pub(crate) async fn schedule_event(
    State(state): State<AppState>,
    payload: Result<Json<EventCreateRequest>, JsonRejection>,
) -> Result<Json<EventCreatedResponse>, ApiError> {
    let body = json_body(payload)?;
    let rules = body
        .schedule_rules
        .into_iter()
        .map(ScheduleRule::from)
        .collect();
    let mut event = NewEvent::new(body.data, rules);
    if let Some(category) = body.category {
        event = event.with_category(category);
    }
    let event_id = state.broker.submit(event).await?;
    Ok(Json(EventCreatedResponse {
        event_id: event_id.to_string(),
    }))
}
