use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

// Broker service configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    // HTTP + WebSocket listener bind address.
    pub bind_addr: SocketAddr,
    // Metrics HTTP listener bind address.
    pub metrics_bind: SocketAddr,
    // Longest the timer driver sleeps between wall-clock checks.
    pub scheduler_max_tick_ms: u64,
    // Per-subscriber bounded push queue depth.
    pub subscriber_queue_capacity: usize,
    // Max events held by one channel buffer before new arrivals are dropped.
    pub channel_buffer_capacity: usize,
    // Close channels untouched for this long; disabled when unset.
    pub channel_idle_timeout_ms: Option<u64>,
    // How often the idle-channel reaper runs.
    pub channel_reap_interval_ms: u64,
}

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:2626";
pub const DEFAULT_METRICS_BIND: &str = "0.0.0.0:8080";
const DEFAULT_SCHEDULER_MAX_TICK_MS: u64 = 250;
const DEFAULT_SUBSCRIBER_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_CHANNEL_BUFFER_CAPACITY: usize = 65_536;
const DEFAULT_CHANNEL_REAP_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Deserialize)]
struct BrokerConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    scheduler_max_tick_ms: Option<u64>,
    subscriber_queue_capacity: Option<usize>,
    channel_buffer_capacity: Option<usize>,
    channel_idle_timeout_ms: Option<u64>,
    channel_reap_interval_ms: Option<u64>,
}

fn env_positive<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .filter(|value| *value > T::default())
}

impl BrokerConfig {
    pub fn from_env() -> Result<Self> {
        // Environment variables provide defaults for local development.
        let bind_addr = std::env::var("KAIRO_BIND")
            .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .with_context(|| "parse KAIRO_BIND")?;
        let metrics_bind = std::env::var("KAIRO_METRICS_BIND")
            .unwrap_or_else(|_| DEFAULT_METRICS_BIND.to_string())
            .parse()
            .with_context(|| "parse KAIRO_METRICS_BIND")?;
        Ok(Self {
            bind_addr,
            metrics_bind,
            scheduler_max_tick_ms: env_positive("KAIRO_SCHEDULER_MAX_TICK_MS")
                .unwrap_or(DEFAULT_SCHEDULER_MAX_TICK_MS),
            subscriber_queue_capacity: env_positive("KAIRO_SUBSCRIBER_QUEUE_CAPACITY")
                .unwrap_or(DEFAULT_SUBSCRIBER_QUEUE_CAPACITY),
            channel_buffer_capacity: env_positive("KAIRO_CHANNEL_BUFFER_CAPACITY")
                .unwrap_or(DEFAULT_CHANNEL_BUFFER_CAPACITY),
            channel_idle_timeout_ms: env_positive("KAIRO_CHANNEL_IDLE_TIMEOUT_MS"),
            channel_reap_interval_ms: env_positive("KAIRO_CHANNEL_REAP_INTERVAL_MS")
                .unwrap_or(DEFAULT_CHANNEL_REAP_INTERVAL_MS),
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("KAIRO_BROKER_CONFIG") {
            // YAML overrides allow ops-friendly config files.
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read KAIRO_BROKER_CONFIG: {path}"))?;
            let override_cfg: BrokerConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse broker config yaml")?;
            config.apply(override_cfg)?;
        }
        Ok(config)
    }

    fn apply(&mut self, override_cfg: BrokerConfigOverride) -> Result<()> {
        if let Some(value) = override_cfg.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.scheduler_max_tick_ms
            && value > 0
        {
            self.scheduler_max_tick_ms = value;
        }
        if let Some(value) = override_cfg.subscriber_queue_capacity
            && value > 0
        {
            self.subscriber_queue_capacity = value;
        }
        if let Some(value) = override_cfg.channel_buffer_capacity
            && value > 0
        {
            self.channel_buffer_capacity = value;
        }
        if let Some(value) = override_cfg.channel_idle_timeout_ms {
            // Zero in the file switches reaping off.
            self.channel_idle_timeout_ms = (value > 0).then_some(value);
        }
        if let Some(value) = override_cfg.channel_reap_interval_ms
            && value > 0
        {
            self.channel_reap_interval_ms = value;
        }
        Ok(())
    }

    pub fn scheduler_max_tick(&self) -> Duration {
        Duration::from_millis(self.scheduler_max_tick_ms)
    }

    pub fn channel_idle_timeout(&self) -> Option<Duration> {
        self.channel_idle_timeout_ms.map(Duration::from_millis)
    }

    pub fn channel_reap_interval(&self) -> Duration {
        Duration::from_millis(self.channel_reap_interval_ms)
    }
}
