//! # keystone-bus
//!
//! Topic-based publish/subscribe over a durable broker.
//!
//! - [`EventBus`] owns the broker connection, one delivery loop per
//!   subscribed topic, the retry/requeue policy and health reporting
//! - [`EventEnvelope`] is the retry-tracking wire wrapper around a
//!   [`DomainEvent`](keystone_core::events::DomainEvent)
//! - [`broker`] abstracts the transport; an in-memory broker is always
//!   available and a Redis broker is behind the `redis-broker` feature
//!
//! Delivery is at-least-once: a failed message is redelivered until its
//! retry ceiling is reached, then dropped with an error log. Handlers must
//! tolerate duplicates.

pub mod async_handler;
pub mod broker;
pub mod bus;
pub mod envelope;
pub mod handler;
pub mod registry;

pub use async_handler::AsyncHandler;
pub use bus::{BusState, BusStatus, EventBus};
pub use envelope::EventEnvelope;
pub use handler::EventHandler;
pub use registry::HandlerRegistry;
