//! Event bus and broker configuration.

use serde::{Deserialize, Serialize};

/// Which broker implementation backs the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// In-process broker; queues live as long as the process.
    #[default]
    Memory,
    /// Redis lists acting as durable queues.
    Redis,
}

impl std::fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerKind::Memory => write!(f, "memory"),
            BrokerKind::Redis => write!(f, "redis"),
        }
    }
}

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Broker implementation.
    #[serde(default)]
    pub broker: BrokerKind,
    /// Redis connection URL (used when `broker = "redis"`).
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Name of the durable topic exchange.
    #[serde(default = "default_exchange")]
    pub exchange: String,
    /// Prefix for per-topic queue names.
    #[serde(default = "default_queue_prefix")]
    pub queue_prefix: String,
    /// Redeliveries allowed before a failing message is dropped.
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    /// Unacknowledged deliveries a consumer may hold.
    #[serde(default = "default_prefetch")]
    pub prefetch: u16,
    /// How long a delivery loop waits for a message before rechecking
    /// its shutdown signal, in milliseconds.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u64,
}

impl BusConfig {
    /// Queue name for a topic.
    pub fn queue_name(&self, topic: &str) -> String {
        format!("{}.{topic}", self.queue_prefix)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            broker: BrokerKind::default(),
            redis_url: default_redis_url(),
            exchange: default_exchange(),
            queue_prefix: default_queue_prefix(),
            max_retry: default_max_retry(),
            prefetch: default_prefetch(),
            poll_timeout_ms: default_poll_timeout(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_exchange() -> String {
    "keystone.events".to_string()
}

fn default_queue_prefix() -> String {
    "keystone".to_string()
}

fn default_max_retry() -> u32 {
    3
}

fn default_prefetch() -> u16 {
    1
}

fn default_poll_timeout() -> u64 {
    250
}
