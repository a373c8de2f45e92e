//! In-process broker.
//!
//! Queues live in the broker, not in consumers, so messages published
//! before a consumer starts (or while it restarts) are retained. Requeued
//! messages go to the tail of their queue.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;

use keystone_core::AppError;
use keystone_core::result::AppResult;

use super::{Broker, BrokerChannel, BrokerConnection, Consumer, Delivery, PublishOptions, closed};

/// A message at rest in a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    /// Message body.
    pub body: Vec<u8>,
    /// Message headers.
    pub headers: BTreeMap<String, String>,
    /// Published with persistent delivery.
    pub persistent: bool,
    /// Requeued at least once.
    pub redelivered: bool,
}

#[derive(Debug, Default)]
struct MemoryQueue {
    messages: Mutex<VecDeque<QueuedMessage>>,
    notify: Notify,
}

impl MemoryQueue {
    fn messages(&self) -> MutexGuard<'_, VecDeque<QueuedMessage>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_back(&self, message: QueuedMessage) {
        self.messages().push_back(message);
        self.notify.notify_one();
    }
}

#[derive(Debug, Default)]
struct Topology {
    exchanges: HashSet<String>,
    /// exchange → routing key → queues
    bindings: HashMap<String, HashMap<String, HashSet<String>>>,
    queues: HashMap<String, Arc<MemoryQueue>>,
}

#[derive(Debug, Default)]
struct BrokerState {
    topology: Mutex<Topology>,
    fail_publish: AtomicBool,
    severed: AtomicBool,
    unreachable: AtomicBool,
    published: AtomicU64,
}

impl BrokerState {
    fn topology(&self) -> MutexGuard<'_, Topology> {
        self.topology.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_severed(&self) -> bool {
        self.severed.load(Ordering::SeqCst)
    }
}

/// In-process broker with fault injection for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail until cleared.
    pub fn set_publish_failure(&self, fail: bool) {
        self.state.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Drop every connection: channels report closed and calls fail.
    pub fn sever(&self) {
        self.state.severed.store(true, Ordering::SeqCst);
    }

    /// Make the server stop answering pings while connections still
    /// report open, as with a dead peer behind a live socket.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Number of messages accepted so far.
    pub fn published_count(&self) -> u64 {
        self.state.published.load(Ordering::SeqCst)
    }

    /// Number of messages waiting in `queue`.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.state
            .topology()
            .queues
            .get(queue)
            .map(|q| q.messages().len())
            .unwrap_or(0)
    }

    /// Snapshot of the messages waiting in `queue`.
    pub fn queued(&self, queue: &str) -> Vec<QueuedMessage> {
        self.state
            .topology()
            .queues
            .get(queue)
            .map(|q| q.messages().iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> AppResult<Arc<dyn BrokerConnection>> {
        if self.state.is_severed() {
            return Err(AppError::broker_unavailable("Memory broker is unreachable"));
        }
        Ok(Arc::new(MemoryConnection {
            state: Arc::clone(&self.state),
            open: Arc::new(AtomicBool::new(true)),
        }))
    }
}

struct MemoryConnection {
    state: Arc<BrokerState>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn open_channel(&self) -> AppResult<Arc<dyn BrokerChannel>> {
        if !self.is_open() {
            return Err(closed("connection"));
        }
        Ok(Arc::new(MemoryChannel {
            state: Arc::clone(&self.state),
            connection_open: Arc::clone(&self.open),
            open: AtomicBool::new(true),
        }))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.state.is_severed()
    }

    async fn ping(&self) -> AppResult<()> {
        if !self.is_open() {
            return Err(closed("connection"));
        }
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(AppError::broker_unavailable("Memory broker did not answer ping"));
        }
        Ok(())
    }

    async fn close(&self) -> AppResult<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryChannel {
    state: Arc<BrokerState>,
    connection_open: Arc<AtomicBool>,
    open: AtomicBool,
}

impl MemoryChannel {
    fn ensure_open(&self) -> AppResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(closed("channel"))
        }
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_exchange(&self, exchange: &str) -> AppResult<()> {
        self.ensure_open()?;
        self.state.topology().exchanges.insert(exchange.to_string());
        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> AppResult<()> {
        self.ensure_open()?;
        self.state
            .topology()
            .queues
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> AppResult<()> {
        self.ensure_open()?;
        let mut topology = self.state.topology();
        if !topology.exchanges.contains(exchange) {
            return Err(AppError::broker_unavailable(format!(
                "Exchange '{exchange}' is not declared"
            )));
        }
        if !topology.queues.contains_key(queue) {
            return Err(AppError::broker_unavailable(format!(
                "Queue '{queue}' is not declared"
            )));
        }
        topology
            .bindings
            .entry(exchange.to_string())
            .or_default()
            .entry(routing_key.to_string())
            .or_default()
            .insert(queue.to_string());
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        options: PublishOptions,
    ) -> AppResult<()> {
        self.ensure_open()?;
        if self.state.fail_publish.load(Ordering::SeqCst) {
            return Err(AppError::broker_unavailable("Broker rejected the publish"));
        }
        let topology = self.state.topology();
        if !topology.exchanges.contains(exchange) {
            return Err(AppError::broker_unavailable(format!(
                "Exchange '{exchange}' is not declared"
            )));
        }
        let targets: Vec<Arc<MemoryQueue>> = topology
            .bindings
            .get(exchange)
            .and_then(|keys| keys.get(routing_key))
            .into_iter()
            .flatten()
            .filter_map(|q| topology.queues.get(q).cloned())
            .collect();
        drop(topology);

        if targets.is_empty() {
            debug!(exchange, routing_key, "Message had no bound queue and was discarded");
        }
        for queue in targets {
            queue.push_back(QueuedMessage {
                body: body.clone(),
                headers: options.headers.clone(),
                persistent: options.persistent,
                redelivered: false,
            });
        }
        self.state.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> AppResult<Box<dyn Consumer>> {
        self.ensure_open()?;
        let handle = self
            .state
            .topology()
            .queues
            .get(queue)
            .cloned()
            .ok_or_else(|| AppError::broker_unavailable(format!("Queue '{queue}' is not declared")))?;
        Ok(Box::new(MemoryConsumer {
            state: Arc::clone(&self.state),
            queue: handle,
            prefetch: prefetch.max(1) as usize,
            next_tag: 0,
            unacked: BTreeMap::new(),
        }))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
            && self.connection_open.load(Ordering::SeqCst)
            && !self.state.is_severed()
    }

    async fn close(&self) -> AppResult<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryConsumer {
    state: Arc<BrokerState>,
    queue: Arc<MemoryQueue>,
    prefetch: usize,
    next_tag: u64,
    unacked: BTreeMap<u64, QueuedMessage>,
}

impl MemoryConsumer {
    fn settle(&mut self, tag: u64) -> AppResult<QueuedMessage> {
        self.unacked
            .remove(&tag)
            .ok_or_else(|| AppError::internal(format!("Unknown delivery tag {tag}")))
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn next(&mut self, timeout: Duration) -> AppResult<Option<Delivery>> {
        if self.state.is_severed() {
            return Err(closed("connection"));
        }
        if self.unacked.len() >= self.prefetch {
            return Err(AppError::internal("Prefetch window is full"));
        }
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let popped = self.queue.messages().pop_front();
            if let Some(message) = popped {
                self.next_tag += 1;
                let tag = self.next_tag;
                let delivery = Delivery {
                    tag,
                    body: message.body.clone(),
                    headers: message.headers.clone(),
                    redelivered: message.redelivered,
                };
                self.unacked.insert(tag, message);
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, self.queue.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn ack(&mut self, tag: u64) -> AppResult<()> {
        self.settle(tag).map(|_| ())
    }

    async fn requeue(&mut self, tag: u64, body: Vec<u8>) -> AppResult<()> {
        let message = self.settle(tag)?;
        self.queue.push_back(QueuedMessage {
            body,
            redelivered: true,
            ..message
        });
        Ok(())
    }

    async fn reject(&mut self, tag: u64) -> AppResult<()> {
        self.settle(tag).map(|_| ())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        // Unsettled deliveries go back to the head of the queue.
        let pending = std::mem::take(&mut self.unacked);
        if pending.is_empty() {
            return;
        }
        let mut messages = self.queue.messages();
        for (_, message) in pending.into_iter().rev() {
            messages.push_front(QueuedMessage {
                redelivered: true,
                ..message
            });
        }
        drop(messages);
        self.queue.notify.notify_one();
    }
}
