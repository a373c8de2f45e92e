//! Message broker abstraction.
//!
//! The bus speaks to its transport through a small AMQP-shaped chain:
//! [`Broker`] → [`BrokerConnection`] → [`BrokerChannel`] → [`Consumer`].
//! Exchanges route by exact topic key to bound durable queues.

pub mod memory;
#[cfg(feature = "redis-broker")]
pub mod redis;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use keystone_core::AppError;
use keystone_core::config::{BrokerKind, BusConfig};
use keystone_core::result::AppResult;

pub use memory::MemoryBroker;

/// Options attached to a published message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Survive broker restarts.
    pub persistent: bool,
    /// Introspection headers.
    pub headers: BTreeMap<String, String>,
}

/// A message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Consumer-local tag used to ack, requeue or reject.
    pub tag: u64,
    /// Message body.
    pub body: Vec<u8>,
    /// Message headers.
    pub headers: BTreeMap<String, String>,
    /// Whether the message was requeued before.
    pub redelivered: bool,
}

/// Entry point: opens connections.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Short name for logs.
    fn kind(&self) -> &'static str;

    /// Establish a connection.
    async fn connect(&self) -> AppResult<Arc<dyn BrokerConnection>>;
}

/// An established broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    /// Open a channel on this connection.
    async fn open_channel(&self) -> AppResult<Arc<dyn BrokerChannel>>;

    /// Whether the connection is usable.
    fn is_open(&self) -> bool;

    /// Round-trip to the broker server.
    async fn ping(&self) -> AppResult<()>;

    /// Close the connection.
    async fn close(&self) -> AppResult<()>;
}

/// A channel for declaring topology, publishing and consuming.
#[async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    /// Declare a durable topic exchange.
    async fn declare_exchange(&self, exchange: &str) -> AppResult<()>;

    /// Declare a durable queue.
    async fn declare_queue(&self, queue: &str) -> AppResult<()>;

    /// Route messages published to `exchange` with `routing_key` into `queue`.
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> AppResult<()>;

    /// Publish a message. Returns once the broker has accepted it.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        options: PublishOptions,
    ) -> AppResult<()>;

    /// Start consuming `queue` with at most `prefetch` unacknowledged messages.
    async fn consume(&self, queue: &str, prefetch: u16) -> AppResult<Box<dyn Consumer>>;

    /// Whether the channel is usable.
    fn is_open(&self) -> bool;

    /// Close the channel.
    async fn close(&self) -> AppResult<()>;
}

/// A queue consumer.
#[async_trait]
pub trait Consumer: Send + 'static {
    /// Wait up to `timeout` for the next delivery.
    async fn next(&mut self, timeout: Duration) -> AppResult<Option<Delivery>>;

    /// Acknowledge a delivery.
    async fn ack(&mut self, tag: u64) -> AppResult<()>;

    /// Settle a delivery and append `body` to the tail of the queue.
    async fn requeue(&mut self, tag: u64, body: Vec<u8>) -> AppResult<()>;

    /// Settle a delivery and drop it.
    async fn reject(&mut self, tag: u64) -> AppResult<()>;
}

/// Build the broker selected by `config.broker`.
pub fn from_config(config: &BusConfig) -> AppResult<Arc<dyn Broker>> {
    match config.broker {
        BrokerKind::Memory => {
            info!("Initializing in-memory message broker");
            Ok(Arc::new(MemoryBroker::new()))
        }
        #[cfg(feature = "redis-broker")]
        BrokerKind::Redis => {
            info!("Initializing Redis message broker");
            Ok(Arc::new(redis::RedisBroker::new(&config.redis_url)?))
        }
        #[cfg(not(feature = "redis-broker"))]
        BrokerKind::Redis => Err(AppError::configuration(
            "Redis broker requested but keystone-bus was built without the `redis-broker` feature",
        )),
    }
}

pub(crate) fn closed(what: &str) -> AppError {
    AppError::broker_unavailable(format!("Broker {what} is closed"))
}
