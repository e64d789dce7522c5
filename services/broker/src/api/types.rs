//! HTTP API request/response types.
//!
//! # Purpose
//! Defines the payload shapes of the broker REST and WebSocket surface and
//! their OpenAPI schemas, plus conversions from core broker types.
use kairo_broker::{ChannelInfo, DeliveredEvent, QueueInfo, Recurrence, ScheduleRule};
use kairo_common::BufferOptions;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct QueueCreateRequest {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct QueueResponse {
    pub id: String,
    pub pending_events: u64,
    pub delivered_events: u64,
}

impl From<QueueInfo> for QueueResponse {
    fn from(info: QueueInfo) -> Self {
        Self {
            id: info.id,
            pending_events: info.pending_events,
            delivered_events: info.delivered_events,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QueueListResponse {
    pub queues: Vec<QueueResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy)]
pub struct RecurringOptions {
    pub times: u32,
    /// Milliseconds between occurrences.
    pub delay: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ScheduleRuleRequest {
    pub queue: String,
    /// Absolute fire time in epoch milliseconds.
    #[serde(alias = "schedule_at")]
    pub schedule_for: u64,
    #[serde(default)]
    pub recurring_options: Option<RecurringOptions>,
}

impl From<ScheduleRuleRequest> for ScheduleRule {
    fn from(rule: ScheduleRuleRequest) -> Self {
        ScheduleRule {
            queue: rule.queue,
            fire_at_ms: rule.schedule_for,
            recurrence: rule.recurring_options.map(|options| Recurrence {
                times: options.times,
                delay_ms: options.delay,
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct EventCreateRequest {
    /// Opaque payload, delivered verbatim.
    pub data: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub schedule_rules: Vec<ScheduleRuleRequest>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EventCreatedResponse {
    pub event_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
pub struct BufferOptionsBody {
    /// Max milliseconds an event may sit unflushed.
    pub time: u64,
    /// Max buffered events before a forced flush.
    pub size: usize,
}

impl From<BufferOptionsBody> for BufferOptions {
    fn from(body: BufferOptionsBody) -> Self {
        BufferOptions::new(body.time, body.size)
    }
}

impl From<BufferOptions> for BufferOptionsBody {
    fn from(options: BufferOptions) -> Self {
        Self {
            time: options.time,
            size: options.size,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ChannelCreateRequest {
    pub buffer_options: BufferOptionsBody,
    #[serde(default)]
    pub queues: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChannelCreatedResponse {
    pub channel_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChannelListResponse {
    pub channels: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChannelResponse {
    pub channel_id: String,
    pub queues: Vec<String>,
    pub buffer_options: BufferOptionsBody,
    pub buffered_events: usize,
    pub ready: bool,
}

impl From<ChannelInfo> for ChannelResponse {
    fn from(info: ChannelInfo) -> Self {
        Self {
            channel_id: info.channel_id.to_string(),
            queues: info.queues,
            buffer_options: info.buffer_options.into(),
            buffered_events: info.buffered_events,
            ready: info.ready,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChannelEvent {
    pub data: String,
}

impl From<&DeliveredEvent> for ChannelEvent {
    fn from(event: &DeliveredEvent) -> Self {
        Self {
            data: String::from_utf8_lossy(&event.data).into_owned(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChannelEventsResponse {
    pub events: Vec<ChannelEvent>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionsInfo {
    pub clients_connected: usize,
}

/// One pushed WebSocket text frame.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StreamEvent {
    pub event_id: String,
    pub queue: String,
    pub category: String,
    pub data: String,
    /// Scheduled fire time, epoch milliseconds.
    pub schedule_for: u64,
    /// Actual fire time, epoch milliseconds.
    pub fired_at: u64,
}

impl From<&DeliveredEvent> for StreamEvent {
    fn from(event: &DeliveredEvent) -> Self {
        Self {
            event_id: event.event_id.to_string(),
            queue: event.queue.to_string(),
            category: event.category.to_string(),
            data: String::from_utf8_lossy(&event.data).into_owned(),
            schedule_for: event.fire_at_ms,
            fired_at: event.fired_at_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_rule_accepts_schedule_at_alias() {
        let rule: ScheduleRuleRequest = serde_json::from_value(serde_json::json!({
            "queue": "Q",
            "schedule_at": 42,
            "recurring_options": { "times": 3, "delay": 100 }
        }))
        .expect("rule");
        let rule = ScheduleRule::from(rule);
        assert_eq!(rule.fire_at_ms, 42);
        assert_eq!(
            rule.recurrence,
            Some(Recurrence {
                times: 3,
                delay_ms: 100
            })
        );
    }

    #[test]
    fn event_request_defaults_missing_rules_to_empty() {
        let event: EventCreateRequest =
            serde_json::from_value(serde_json::json!({ "data": "xyz==" })).expect("event");
        assert!(event.schedule_rules.is_empty());
        assert!(event.category.is_none());
    }
}
