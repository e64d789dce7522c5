//! Broker HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, configures middleware, and defines the shared
//! application state injected into handlers. Also owns the background tasks
//! the service runs next to the router (timer driver, idle-channel reaper).
use crate::api;
use crate::config::BrokerConfig;
use crate::observability;
use axum::Router;
use kairo_broker::Broker;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
}

impl AppState {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }
}

/// Builds a broker sized by `config`. The timer driver is not started.
pub fn build_broker(config: &BrokerConfig) -> anyhow::Result<Arc<Broker>> {
    let broker = Broker::new()
        .with_subscriber_queue_capacity(config.subscriber_queue_capacity)?
        .with_channel_buffer_capacity(config.channel_buffer_capacity)?
        .with_max_tick(config.scheduler_max_tick());
    Ok(Arc::new(broker))
}

/// Periodically closes channels nobody has read within `timeout`.
pub fn spawn_channel_reaper(
    broker: Arc<Broker>,
    timeout: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reaped = broker.reap_idle_channels(timeout).await;
            if !reaped.is_empty() {
                tracing::debug!(count = reaped.len(), "reaped idle channels");
            }
        }
    })
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            );
            span.set_parent(parent);
            span
        });

    Router::new()
        .route("/health", axum::routing::get(api::system::health))
        .route(
            "/connections",
            axum::routing::get(api::system::connections),
        )
        .route(
            "/openapi.json",
            axum::routing::get(api::openapi::openapi_json),
        )
        .route(
            "/queues",
            axum::routing::get(api::queues::list_queues).post(api::queues::create_queue),
        )
        .route(
            "/queues/:id",
            axum::routing::get(api::queues::get_queue).delete(api::queues::delete_queue),
        )
        .route("/events", axum::routing::post(api::events::schedule_event))
        .route(
            "/channels",
            axum::routing::get(api::channels::list_channels).post(api::channels::create_channel),
        )
        .route(
            "/channels/:channel_id",
            axum::routing::get(api::channels::get_channel)
                .delete(api::channels::delete_channel),
        )
        .route(
            "/channels/:channel_id/events",
            axum::routing::get(api::channels::dequeue_events),
        )
        .route(
            "/ws/events/:category",
            axum::routing::get(api::stream::stream_events),
        )
        .layer(trace_layer)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kairo_common::BufferOptions;

    fn config() -> BrokerConfig {
        BrokerConfig {
            bind_addr: "127.0.0.1:0".parse().expect("bind"),
            metrics_bind: "127.0.0.1:0".parse().expect("metrics"),
            scheduler_max_tick_ms: 20,
            subscriber_queue_capacity: 8,
            channel_buffer_capacity: 16,
            channel_idle_timeout_ms: None,
            channel_reap_interval_ms: 10,
        }
    }

    #[test]
    fn build_broker_rejects_zero_capacity() {
        let mut config = config();
        config.channel_buffer_capacity = 0;
        assert!(build_broker(&config).is_err());
    }

    #[tokio::test]
    async fn reaper_closes_untouched_channels() {
        let broker = build_broker(&config()).expect("broker");
        broker.create_queue("Q").await.expect("queue");
        let channel = broker
            .create_channel(vec!["Q".into()], BufferOptions::new(1000, 10))
            .await
            .expect("channel");

        let reaper = spawn_channel_reaper(
            Arc::clone(&broker),
            Duration::from_millis(30),
            Duration::from_millis(10),
        );
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        // Listing does not count as a touch.
        while broker.list_channels().await.contains(&channel) {
            assert!(tokio::time::Instant::now() < deadline, "channel not reaped");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        reaper.abort();
        assert!(broker.list_channels().await.is_empty());
    }
}
