//! Typed async client for the kairo broker HTTP API.
//!
//! Every call maps to one endpoint. A 404 becomes [`ClientError::NotFound`]
//! carrying the server's message (empty for queues), other non-2xx statuses
//! become [`ClientError::Status`].
use kairo_common::BufferOptions;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("invalid base url: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    pub id: String,
    #[serde(default, alias = "pending_events_count")]
    pub pending_events: u64,
    #[serde(default)]
    pub delivered_events: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringOptions {
    pub times: u32,
    pub delay: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRule {
    pub queue: String,
    /// Absolute fire time in epoch milliseconds.
    pub schedule_for: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring_options: Option<RecurringOptions>,
}

impl ScheduleRule {
    pub fn at(queue: impl Into<String>, schedule_for: u64) -> Self {
        Self {
            queue: queue.into(),
            schedule_for,
            recurring_options: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub schedule_rules: Vec<ScheduleRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: String,
    pub queues: Vec<String>,
    pub buffer_options: BufferOptions,
    #[serde(default)]
    pub buffered_events: usize,
    #[serde(default)]
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub data: String,
}

#[derive(Debug, Deserialize)]
struct QueueList {
    queues: Vec<Queue>,
}

#[derive(Debug, Deserialize)]
struct EventCreated {
    event_id: String,
}

#[derive(Debug, Serialize)]
struct ChannelCreate<'a> {
    buffer_options: BufferOptions,
    queues: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ChannelCreated {
    channel_id: String,
}

#[derive(Debug, Deserialize)]
struct ChannelList {
    channels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelEvents {
    events: Vec<ChannelEvent>,
}

#[derive(Debug, Deserialize)]
struct Connections {
    clients_connected: usize,
}

#[derive(Debug, Clone)]
pub struct KairoClient {
    base_url: Url,
    http: Client,
}

impl KairoClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .no_proxy()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(10))
            .build()?;
        Self::with_http_client(base_url, http)
    }

    pub fn with_http_client(base_url: &str, http: Client) -> Result<Self> {
        let base_url =
            Url::parse(base_url).map_err(|err| ClientError::InvalidUrl(err.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn health(&self) -> Result<String> {
        let response = self.send(Method::GET, &["health"], None::<&()>).await?;
        Ok(response.text().await?)
    }

    pub async fn create_queue(&self, id: &str) -> Result<()> {
        let body = serde_json::json!({ "id": id });
        self.send(Method::POST, &["queues"], Some(&body)).await?;
        Ok(())
    }

    pub async fn list_queues(&self) -> Result<Vec<Queue>> {
        let list: QueueList = self.get_json(&["queues"]).await?;
        Ok(list.queues)
    }

    pub async fn get_queue(&self, id: &str) -> Result<Queue> {
        self.get_json(&["queues", id]).await
    }

    pub async fn delete_queue(&self, id: &str) -> Result<()> {
        self.send(Method::DELETE, &["queues", id], None::<&()>)
            .await?;
        Ok(())
    }

    /// Submits an event and returns its server-assigned id.
    pub async fn schedule_event(&self, event: &NewEvent) -> Result<String> {
        let response = self.send(Method::POST, &["events"], Some(event)).await?;
        let created: EventCreated = response.json().await?;
        Ok(created.event_id)
    }

    pub async fn create_channel(
        &self,
        queues: &[String],
        buffer_options: BufferOptions,
    ) -> Result<String> {
        let body = ChannelCreate {
            buffer_options,
            queues,
        };
        let response = self.send(Method::POST, &["channels"], Some(&body)).await?;
        let created: ChannelCreated = response.json().await?;
        Ok(created.channel_id)
    }

    pub async fn list_channels(&self) -> Result<Vec<String>> {
        let list: ChannelList = self.get_json(&["channels"]).await?;
        Ok(list.channels)
    }

    pub async fn get_channel(&self, channel_id: &str) -> Result<Channel> {
        self.get_json(&["channels", channel_id]).await
    }

    pub async fn delete_channel(&self, channel_id: &str) -> Result<()> {
        self.send(Method::DELETE, &["channels", channel_id], None::<&()>)
            .await?;
        Ok(())
    }

    /// Drains the channel buffer. A second call with no new arrivals returns empty.
    pub async fn dequeue(&self, channel_id: &str) -> Result<Vec<ChannelEvent>> {
        let events: ChannelEvents = self.get_json(&["channels", channel_id, "events"]).await?;
        Ok(events.events)
    }

    /// Number of live streaming subscribers.
    pub async fn connections(&self) -> Result<usize> {
        let info: Connections = self.get_json(&["connections"]).await?;
        Ok(info.clients_connected)
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let response = self.send(Method::GET, segments, None::<&()>).await?;
        Ok(response.json().await?)
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        let mut request = self.http.request(method, self.url(segments)?);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(body));
        }
        Err(ClientError::Status { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_segments_are_escaped() {
        let client = KairoClient::new("http://127.0.0.1:2626/").expect("client");
        let url = client.url(&["queues", "a b/c"]).expect("url");
        assert_eq!(url.as_str(), "http://127.0.0.1:2626/queues/a%20b%2Fc");
    }

    #[test]
    fn base_path_prefix_is_kept() {
        let client = KairoClient::new("http://localhost:2626/kairo").expect("client");
        let url = client
            .url(&["channels", "abc", "events"])
            .expect("url");
        assert_eq!(url.as_str(), "http://localhost:2626/kairo/channels/abc/events");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(matches!(
            KairoClient::new("not a url"),
            Err(ClientError::InvalidUrl(_))
        ));
        assert!(matches!(
            KairoClient::new("mailto:ops@example.com"),
            Err(ClientError::InvalidUrl(_))
        ));
    }

    #[test]
    fn schedule_rule_omits_absent_recurrence() {
        let rule = ScheduleRule::at("Q", 1_000);
        let json = serde_json::to_value(&rule).expect("json");
        assert_eq!(json, serde_json::json!({ "queue": "Q", "schedule_for": 1000 }));
    }

    #[test]
    fn channel_reads_minimal_body() {
        let channel: Channel = serde_json::from_value(serde_json::json!({
            "channel_id": "c1",
            "queues": ["Q"],
            "buffer_options": { "time": 1000, "size": 10 }
        }))
        .expect("channel");
        assert_eq!(channel.buffer_options, BufferOptions::new(1000, 10));
        assert!(!channel.ready);
    }

    #[test]
    fn queue_accepts_pending_events_count_field() {
        let queue: Queue = serde_json::from_value(serde_json::json!({
            "id": "Q",
            "pending_events_count": 3
        }))
        .expect("queue");
        assert_eq!(queue.pending_events, 3);
        assert_eq!(queue.delivered_events, 0);
    }
}
