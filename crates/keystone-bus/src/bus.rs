//! The event bus.
//!
//! State machine: `NotStarted → Started → Stopped` (terminal).
//!
//! One delivery loop runs per subscribed topic. Each loop takes one message
//! at a time (prefetch 1), invokes the topic's handlers in registration
//! order, then acks on success. On failure the message is requeued with its
//! retry counter bumped until the envelope's ceiling, after which it is
//! dropped with an error log. There is no dead-letter queue.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use keystone_core::AppError;
use keystone_core::config::BusConfig;
use keystone_core::events::{DomainEvent, Topic};
use keystone_core::result::AppResult;

use crate::broker::{Broker, BrokerChannel, BrokerConnection, Consumer, Delivery, PublishOptions};
use crate::envelope::EventEnvelope;
use crate::handler::EventHandler;
use crate::registry::HandlerRegistry;

/// Lifecycle state of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BusState {
    /// Created, not connected.
    NotStarted,
    /// Connected and consuming.
    Started,
    /// Stopped; cannot be restarted.
    Stopped,
}

/// Point-in-time view of the bus.
#[derive(Debug, Clone, Serialize)]
pub struct BusStatus {
    /// Lifecycle state.
    pub state: BusState,
    /// Topics with at least one handler.
    pub subscribed_topics: Vec<Topic>,
    /// Handlers per topic.
    pub handler_counts: BTreeMap<Topic, usize>,
    /// Delivery loops currently running.
    pub consumers_running: usize,
}

struct ConsumerTask {
    channel: Arc<dyn BrokerChannel>,
    handle: JoinHandle<()>,
}

struct BusInner {
    config: BusConfig,
    broker: Arc<dyn Broker>,
    registry: HandlerRegistry,
    state: RwLock<BusState>,
    connection: RwLock<Option<Arc<dyn BrokerConnection>>>,
    publisher: RwLock<Option<Arc<dyn BrokerChannel>>>,
    declared: RwLock<HashSet<Topic>>,
    consumers: Mutex<HashMap<Topic, ConsumerTask>>,
    lifecycle: Mutex<()>,
    shutdown: watch::Sender<bool>,
}

/// Topic-based publish/subscribe bus. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("broker", &self.inner.broker.kind())
            .field("exchange", &self.inner.config.exchange)
            .finish()
    }
}

impl EventBus {
    /// Create a bus over `broker`. Nothing is connected until [`start`](Self::start).
    pub fn new(config: BusConfig, broker: Arc<dyn Broker>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(BusInner {
                config,
                broker,
                registry: HandlerRegistry::new(),
                state: RwLock::new(BusState::NotStarted),
                connection: RwLock::new(None),
                publisher: RwLock::new(None),
                declared: RwLock::new(HashSet::new()),
                consumers: Mutex::new(HashMap::new()),
                lifecycle: Mutex::new(()),
                shutdown,
            }),
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> BusState {
        *self.inner.state.read().await
    }

    /// Bus configuration.
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Connect, declare the exchange, and start a delivery loop for every
    /// topic subscribed so far. Starting a started bus is a no-op.
    pub async fn start(&self) -> AppResult<()> {
        let _guard = self.inner.lifecycle.lock().await;
        match *self.inner.state.read().await {
            BusState::Started => return Ok(()),
            BusState::Stopped => {
                return Err(AppError::broker_unavailable(
                    "Event bus has been stopped and cannot be restarted",
                ));
            }
            BusState::NotStarted => {}
        }

        let connection = self.inner.broker.connect().await?;
        let publisher = connection.open_channel().await?;
        publisher.declare_exchange(&self.inner.config.exchange).await?;

        *self.inner.connection.write().await = Some(connection);
        *self.inner.publisher.write().await = Some(publisher);
        *self.inner.state.write().await = BusState::Started;

        let topics = self.inner.registry.topics().await;
        for topic in &topics {
            self.start_consumer(*topic).await?;
        }

        info!(
            broker = self.inner.broker.kind(),
            exchange = %self.inner.config.exchange,
            topics = topics.len(),
            "Event bus started"
        );
        Ok(())
    }

    /// Append `handler` to `topic`'s handler list. On a started bus the
    /// topic's queue and delivery loop are provisioned if missing.
    pub async fn subscribe(&self, topic: Topic, handler: Arc<dyn EventHandler>) -> AppResult<()> {
        let name = handler.name().to_string();
        self.inner.registry.register(topic, handler).await;
        if self.state().await == BusState::Started {
            self.start_consumer(topic).await?;
        }
        info!(topic = %topic, handler = %name, "Handler subscribed");
        Ok(())
    }

    /// Subscribe by topic string; unknown topics are a validation error.
    pub async fn subscribe_str(&self, topic: &str, handler: Arc<dyn EventHandler>) -> AppResult<()> {
        self.subscribe(topic.parse()?, handler).await
    }

    /// Subscribe one handler to several topics.
    pub async fn subscribe_all(
        &self,
        topics: &[Topic],
        handler: Arc<dyn EventHandler>,
    ) -> AppResult<()> {
        for topic in topics {
            self.subscribe(*topic, Arc::clone(&handler)).await?;
        }
        Ok(())
    }

    /// Remove the handler named `name` from `topic`. The delivery loop is
    /// left running; with no handlers it acks messages without effect.
    pub async fn unsubscribe(&self, topic: Topic, name: &str) -> bool {
        let removed = self.inner.registry.unregister(topic, name).await;
        if removed {
            info!(topic = %topic, handler = name, "Handler unsubscribed");
        }
        removed
    }

    /// Publish `event` with persistent delivery and `routing key = topic`.
    ///
    /// Returns once the broker accepted the message, not once handlers ran.
    /// Fails when the bus is not started or the broker rejects the write.
    pub async fn publish(&self, event: &DomainEvent) -> AppResult<()> {
        if self.state().await != BusState::Started {
            return Err(AppError::bus_not_started());
        }
        let channel = self
            .inner
            .publisher
            .read()
            .await
            .clone()
            .ok_or_else(AppError::bus_not_started)?;

        let topic = event.event_type();
        self.ensure_queue(channel.as_ref(), topic).await?;

        let envelope = EventEnvelope::new(event.clone(), self.inner.config.max_retry);
        let options = PublishOptions {
            persistent: true,
            headers: envelope.headers(),
        };
        channel
            .publish(
                &self.inner.config.exchange,
                topic.as_str(),
                envelope.encode()?,
                options,
            )
            .await
            .map_err(|e| {
                error!(topic = %topic, event_id = %event.event_id, error = %e, "Publish failed");
                e
            })?;

        debug!(topic = %topic, event_id = %event.event_id, "Event published");
        Ok(())
    }

    /// Fails if the bus is not started, the connection or publishing
    /// channel is closed, or the broker does not answer a ping.
    pub async fn health(&self) -> AppResult<()> {
        if self.state().await != BusState::Started {
            return Err(AppError::bus_not_started());
        }
        let Some(connection) = self.inner.connection.read().await.clone() else {
            return Err(AppError::broker_unavailable("Broker connection is closed"));
        };
        if !connection.is_open() {
            return Err(AppError::broker_unavailable("Broker connection is closed"));
        }
        let channel_open = self
            .inner
            .publisher
            .read()
            .await
            .as_ref()
            .is_some_and(|c| c.is_open());
        if !channel_open {
            return Err(AppError::broker_unavailable("Publishing channel is closed"));
        }
        connection.ping().await
    }

    /// Snapshot of state, subscriptions and running loops.
    pub async fn status(&self) -> BusStatus {
        let consumers_running = self
            .inner
            .consumers
            .lock()
            .await
            .values()
            .filter(|c| !c.handle.is_finished())
            .count();
        BusStatus {
            state: self.state().await,
            subscribed_topics: self.inner.registry.topics().await,
            handler_counts: self.inner.registry.counts().await,
            consumers_running,
        }
    }

    /// Names of every registered handler.
    pub async fn handler_names(&self) -> Vec<String> {
        self.inner.registry.handler_names().await
    }

    /// Signal every delivery loop, wait for them, then close consumer
    /// channels, the publishing channel and the connection, in that order.
    /// Calling it again is a no-op.
    pub async fn stop(&self) -> AppResult<()> {
        let _guard = self.inner.lifecycle.lock().await;
        let previous = {
            let mut state = self.inner.state.write().await;
            std::mem::replace(&mut *state, BusState::Stopped)
        };
        if previous != BusState::Started {
            return Ok(());
        }

        info!("Stopping event bus");
        self.inner.shutdown.send_replace(true);

        let tasks: Vec<(Topic, ConsumerTask)> =
            self.inner.consumers.lock().await.drain().collect();
        let mut channels = Vec::with_capacity(tasks.len());
        for (topic, task) in tasks {
            if let Err(e) = task.handle.await {
                error!(topic = %topic, error = %e, "Delivery loop ended abnormally");
            }
            channels.push((topic, task.channel));
        }
        for (topic, channel) in channels {
            if let Err(e) = channel.close().await {
                warn!(topic = %topic, error = %e, "Failed to close consumer channel");
            }
        }
        if let Some(publisher) = self.inner.publisher.write().await.take() {
            if let Err(e) = publisher.close().await {
                warn!(error = %e, "Failed to close publishing channel");
            }
        }
        if let Some(connection) = self.inner.connection.write().await.take() {
            if let Err(e) = connection.close().await {
                warn!(error = %e, "Failed to close broker connection");
            }
        }

        info!("Event bus stopped");
        Ok(())
    }

    /// Declare and bind the durable queue for `topic` once per bus.
    async fn ensure_queue(&self, channel: &dyn BrokerChannel, topic: Topic) -> AppResult<()> {
        if self.inner.declared.read().await.contains(&topic) {
            return Ok(());
        }
        let mut declared = self.inner.declared.write().await;
        if declared.contains(&topic) {
            return Ok(());
        }
        let queue = self.inner.config.queue_name(topic.as_str());
        channel.declare_queue(&queue).await?;
        channel
            .bind_queue(&queue, &self.inner.config.exchange, topic.as_str())
            .await?;
        declared.insert(topic);
        debug!(topic = %topic, queue = %queue, "Queue declared");
        Ok(())
    }

    async fn start_consumer(&self, topic: Topic) -> AppResult<()> {
        let mut consumers = self.inner.consumers.lock().await;
        if consumers.contains_key(&topic) || self.state().await != BusState::Started {
            return Ok(());
        }
        let connection = self
            .inner
            .connection
            .read()
            .await
            .clone()
            .ok_or_else(AppError::bus_not_started)?;

        let channel = connection.open_channel().await?;
        self.ensure_queue(channel.as_ref(), topic).await?;
        let queue = self.inner.config.queue_name(topic.as_str());
        let consumer = channel.consume(&queue, self.inner.config.prefetch).await?;

        let bus = self.clone();
        let shutdown = self.inner.shutdown.subscribe();
        let handle = tokio::spawn(async move { bus.delivery_loop(topic, consumer, shutdown).await });
        consumers.insert(topic, ConsumerTask { channel, handle });
        info!(topic = %topic, queue = %queue, "Delivery loop started");
        Ok(())
    }

    async fn delivery_loop(
        self,
        topic: Topic,
        mut consumer: Box<dyn Consumer>,
        shutdown: watch::Receiver<bool>,
    ) {
        let poll = Duration::from_millis(self.inner.config.poll_timeout_ms);
        while !stopping(&shutdown) {
            match consumer.next(poll).await {
                Ok(Some(delivery)) => self.process(topic, consumer.as_mut(), delivery).await,
                Ok(None) => {}
                Err(e) => {
                    if stopping(&shutdown) {
                        break;
                    }
                    warn!(topic = %topic, error = %e, "Failed to receive from broker");
                    tokio::time::sleep(poll).await;
                }
            }
        }
        debug!(topic = %topic, "Delivery loop exited");
    }

    async fn process(&self, topic: Topic, consumer: &mut dyn Consumer, delivery: Delivery) {
        let envelope = match EventEnvelope::decode(&delivery.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(topic = %topic, error = %e, "Dropping undecodable message");
                if let Err(e) = consumer.reject(delivery.tag).await {
                    warn!(topic = %topic, error = %e, "Failed to reject message");
                }
                return;
            }
        };
        let event = &envelope.event;

        match self.dispatch(topic, event).await {
            Ok(()) => {
                if let Err(e) = consumer.ack(delivery.tag).await {
                    warn!(topic = %topic, event_id = %event.event_id, error = %e, "Failed to ack message");
                }
                debug!(topic = %topic, event_id = %event.event_id, retry = envelope.retry, "Message handled");
            }
            Err(handler_err) if envelope.can_retry() => {
                let next = envelope.next_attempt();
                warn!(
                    topic = %topic,
                    event_id = %event.event_id,
                    retry = next.retry,
                    max_retry = next.max_retry,
                    error = %handler_err,
                    "Handler failed, requeueing message"
                );
                let requeued = match next.encode() {
                    Ok(body) => consumer.requeue(delivery.tag, body).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = requeued {
                    error!(topic = %topic, event_id = %event.event_id, error = %e, "Failed to requeue message");
                }
            }
            Err(handler_err) => {
                error!(
                    topic = %topic,
                    event_id = %event.event_id,
                    retry = envelope.retry,
                    error = %handler_err,
                    "Retries exhausted, dropping message"
                );
                if let Err(e) = consumer.reject(delivery.tag).await {
                    warn!(topic = %topic, error = %e, "Failed to reject message");
                }
            }
        }
    }

    /// Invoke every handler of the topic in order. Any failure fails the
    /// message, reported as the first error seen.
    async fn dispatch(&self, topic: Topic, event: &DomainEvent) -> AppResult<()> {
        let handlers = self.inner.registry.handlers(topic).await;
        let mut first_error: Option<AppError> = None;
        for handler in handlers {
            let outcome = AssertUnwindSafe(handler.handle(event)).catch_unwind().await;
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => {
                    let message = format!("Handler '{}' failed: {}", handler.name(), e.message);
                    e.into_internal(message)
                }
                Err(_) => AppError::internal(format!("Handler '{}' panicked", handler.name())),
            };
            warn!(topic = %topic, handler = handler.name(), error = %failure, "Handler failed");
            first_error.get_or_insert(failure);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn stopping(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}
