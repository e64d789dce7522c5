//! Kairo broker service entry point.
//!
//! # Purpose
//! Wires configuration, observability, the in-process broker, and the HTTP
//! router, then serves until shutdown.
use anyhow::Context;
use broker::app::{AppState, build_broker, build_router, spawn_channel_reaper};
use broker::config::BrokerConfig;
use broker::observability;
use std::future::Future;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BrokerConfig::from_env_or_yaml()?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: BrokerConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("kairo-broker");
    let broker = build_broker(&config)?;
    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let driver = broker.start();
    let reaper = config.channel_idle_timeout().map(|timeout| {
        spawn_channel_reaper(
            Arc::clone(&broker),
            timeout,
            config.channel_reap_interval(),
        )
    });
    if reaper.is_none() {
        tracing::info!("idle channel reaping disabled (KAIRO_CHANNEL_IDLE_TIMEOUT_MS not set)");
    }

    let app = build_router(AppState::new(Arc::clone(&broker)));
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "broker listening");

    tokio::pin!(shutdown);
    tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => {
            result?;
        }
        _ = &mut shutdown => {}
    }

    metrics_task.abort();
    if let Some(task) = &reaper {
        task.abort();
    }
    driver.abort();
    let _ = metrics_task.await;
    if let Some(task) = reaper {
        let _ = task.await;
    }
    let _ = driver.await;
    tracing::info!("broker stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn config(idle_timeout_ms: Option<u64>) -> BrokerConfig {
        BrokerConfig {
            bind_addr: "127.0.0.1:0".parse().expect("bind"),
            metrics_bind: "127.0.0.1:0".parse().expect("metrics"),
            scheduler_max_tick_ms: 50,
            subscriber_queue_capacity: 16,
            channel_buffer_capacity: 64,
            channel_idle_timeout_ms: idle_timeout_ms,
            channel_reap_interval_ms: 10,
        }
    }

    #[tokio::test]
    #[serial]
    async fn run_with_shutdown_starts_and_stops() {
        run_with_shutdown(config(None), async {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        })
        .await
        .expect("run should stop cleanly");
    }

    #[tokio::test]
    #[serial]
    async fn run_with_shutdown_with_reaper() {
        run_with_shutdown(config(Some(1_000)), async {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        })
        .await
        .expect("run should stop cleanly");
    }

    #[tokio::test]
    #[serial]
    async fn run_with_shutdown_rejects_zero_capacity() {
        let mut config = config(None);
        config.subscriber_queue_capacity = 0;
        assert!(run_with_shutdown(config, async {}).await.is_err());
    }
}
