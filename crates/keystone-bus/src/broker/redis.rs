//! Redis-backed broker.
//!
//! Layout (all keys under `keystone:bus:`):
//!
//! - `exchanges` set of declared exchanges
//! - `bind:{exchange}:{routing_key}` set of bound queues
//! - `queue:{name}` list; producers `LPUSH`, consumers take from the right
//! - `queue:{name}:processing` list of unacknowledged messages
//!
//! Prefetch 1 is `BLMOVE` from the queue into the processing list; ack is
//! `LREM` from that list; requeue is an atomic `LREM`+`LPUSH`. A new
//! consumer first moves whatever a crashed predecessor left in the
//! processing list back onto the queue, so nodes sharing a queue may see
//! an in-flight message twice but never lose one.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::Client;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use keystone_core::AppError;
use keystone_core::result::AppResult;

use super::{Broker, BrokerChannel, BrokerConnection, Consumer, Delivery, PublishOptions, closed};

const KEY_PREFIX: &str = "keystone:bus:";

fn redis_error(context: &'static str) -> impl FnOnce(redis::RedisError) -> AppError {
    move |e| AppError::broker_unavailable(format!("{context}: {e}"))
}

fn queue_key(queue: &str) -> String {
    format!("{KEY_PREFIX}queue:{queue}")
}

fn processing_key(queue: &str) -> String {
    format!("{KEY_PREFIX}queue:{queue}:processing")
}

fn binding_key(exchange: &str, routing_key: &str) -> String {
    format!("{KEY_PREFIX}bind:{exchange}:{routing_key}")
}

/// What is stored in a Redis list entry.
#[derive(Debug, Serialize, Deserialize)]
struct StoredMessage {
    headers: BTreeMap<String, String>,
    persistent: bool,
    #[serde(default)]
    redelivered: bool,
    body: String,
}

impl StoredMessage {
    fn encode(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Broker backed by Redis lists and sets.
#[derive(Debug, Clone)]
pub struct RedisBroker {
    client: Client,
}

impl RedisBroker {
    /// Create a broker for `url`. No connection is made until `connect`.
    pub fn new(url: &str) -> AppResult<Self> {
        let client = Client::open(url)
            .map_err(|e| AppError::configuration(format!("Invalid Redis URL: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn connect(&self) -> AppResult<Arc<dyn BrokerConnection>> {
        let conn = ConnectionManager::new(self.client.clone())
            .await
            .map_err(redis_error("Failed to connect to Redis"))?;
        info!("Connected to Redis broker");
        Ok(Arc::new(RedisConnection {
            client: self.client.clone(),
            conn,
            open: Arc::new(AtomicBool::new(true)),
        }))
    }
}

struct RedisConnection {
    client: Client,
    conn: ConnectionManager,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerConnection for RedisConnection {
    async fn open_channel(&self) -> AppResult<Arc<dyn BrokerChannel>> {
        if !self.is_open() {
            return Err(closed("connection"));
        }
        Ok(Arc::new(RedisChannel {
            client: self.client.clone(),
            conn: self.conn.clone(),
            connection_open: Arc::clone(&self.open),
            open: AtomicBool::new(true),
        }))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> AppResult<()> {
        if !self.is_open() {
            return Err(closed("connection"));
        }
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(redis_error("Redis PING failed"))?;
        Ok(())
    }

    async fn close(&self) -> AppResult<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct RedisChannel {
    client: Client,
    conn: ConnectionManager,
    connection_open: Arc<AtomicBool>,
    open: AtomicBool,
}

impl RedisChannel {
    fn ensure_open(&self) -> AppResult<ConnectionManager> {
        if self.is_open() {
            Ok(self.conn.clone())
        } else {
            Err(closed("channel"))
        }
    }
}

#[async_trait]
impl BrokerChannel for RedisChannel {
    async fn declare_exchange(&self, exchange: &str) -> AppResult<()> {
        let mut conn = self.ensure_open()?;
        redis::cmd("SADD")
            .arg(format!("{KEY_PREFIX}exchanges"))
            .arg(exchange)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(redis_error("Redis SADD failed"))?;
        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> AppResult<()> {
        let mut conn = self.ensure_open()?;
        redis::cmd("SADD")
            .arg(format!("{KEY_PREFIX}queues"))
            .arg(queue)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(redis_error("Redis SADD failed"))?;
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> AppResult<()> {
        let mut conn = self.ensure_open()?;
        redis::cmd("SADD")
            .arg(binding_key(exchange, routing_key))
            .arg(queue)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(redis_error("Redis SADD failed"))?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        options: PublishOptions,
    ) -> AppResult<()> {
        let mut conn = self.ensure_open()?;
        let queues: Vec<String> = redis::cmd("SMEMBERS")
            .arg(binding_key(exchange, routing_key))
            .query_async(&mut conn)
            .await
            .map_err(redis_error("Redis SMEMBERS failed"))?;
        if queues.is_empty() {
            return Ok(());
        }

        let body = String::from_utf8(body)
            .map_err(|e| AppError::invalid_event_data(format!("Message body is not UTF-8: {e}")))?;
        let entry = StoredMessage {
            headers: options.headers,
            persistent: options.persistent,
            redelivered: false,
            body,
        }
        .encode()?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for queue in &queues {
            pipe.cmd("LPUSH").arg(queue_key(queue)).arg(&entry).ignore();
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(redis_error("Redis LPUSH failed"))?;
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> AppResult<Box<dyn Consumer>> {
        let mut admin = self.ensure_open()?;
        // Blocking commands need a connection of their own.
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_error("Failed to open Redis consumer connection"))?;
        let queue_key = queue_key(queue);
        let processing_key = processing_key(queue);
        let recovered = recover_unacked(&mut admin, &processing_key, &queue_key).await?;
        if recovered > 0 {
            warn!(queue = %queue, recovered, "Returned unacknowledged messages to the queue");
        }
        Ok(Box::new(RedisConsumer {
            conn,
            queue_key,
            processing_key,
            prefetch: prefetch.max(1) as usize,
            next_tag: 0,
            unacked: HashMap::new(),
        }))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.connection_open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> AppResult<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Move every entry of `processing` back to the consuming end of `queue`,
/// oldest first in line.
async fn recover_unacked(
    conn: &mut ConnectionManager,
    processing: &str,
    queue: &str,
) -> AppResult<usize> {
    let mut moved = 0;
    loop {
        let entry: Option<String> = redis::cmd("LMOVE")
            .arg(processing)
            .arg(queue)
            .arg("LEFT")
            .arg("RIGHT")
            .query_async(conn)
            .await
            .map_err(redis_error("Redis LMOVE failed"))?;
        if entry.is_none() {
            return Ok(moved);
        }
        moved += 1;
    }
}

struct RedisConsumer {
    conn: MultiplexedConnection,
    queue_key: String,
    processing_key: String,
    prefetch: usize,
    next_tag: u64,
    /// tag → raw list entry in the processing list
    unacked: HashMap<u64, String>,
}

impl RedisConsumer {
    fn settle(&mut self, tag: u64) -> AppResult<String> {
        self.unacked
            .remove(&tag)
            .ok_or_else(|| AppError::internal(format!("Unknown delivery tag {tag}")))
    }

    async fn remove_processing(&mut self, raw: &str) -> AppResult<()> {
        redis::cmd("LREM")
            .arg(&self.processing_key)
            .arg(1)
            .arg(raw)
            .query_async::<i64>(&mut self.conn)
            .await
            .map_err(redis_error("Redis LREM failed"))?;
        Ok(())
    }
}

#[async_trait]
impl Consumer for RedisConsumer {
    async fn next(&mut self, timeout: Duration) -> AppResult<Option<Delivery>> {
        if self.unacked.len() >= self.prefetch {
            return Err(AppError::internal("Prefetch window is full"));
        }
        let raw: Option<String> = redis::cmd("BLMOVE")
            .arg(&self.queue_key)
            .arg(&self.processing_key)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout.as_secs_f64())
            .query_async(&mut self.conn)
            .await
            .map_err(redis_error("Redis BLMOVE failed"))?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let stored: StoredMessage = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(queue = %self.queue_key, error = %e, "Discarding malformed broker entry");
                self.remove_processing(&raw).await?;
                return Ok(None);
            }
        };
        self.next_tag += 1;
        let tag = self.next_tag;
        self.unacked.insert(tag, raw);
        Ok(Some(Delivery {
            tag,
            body: stored.body.into_bytes(),
            headers: stored.headers,
            redelivered: stored.redelivered,
        }))
    }

    async fn ack(&mut self, tag: u64) -> AppResult<()> {
        let raw = self.settle(tag)?;
        self.remove_processing(&raw).await
    }

    async fn requeue(&mut self, tag: u64, body: Vec<u8>) -> AppResult<()> {
        let raw = self.settle(tag)?;
        let previous: StoredMessage = serde_json::from_str(&raw)?;
        let body = String::from_utf8(body)
            .map_err(|e| AppError::invalid_event_data(format!("Message body is not UTF-8: {e}")))?;
        let entry = StoredMessage {
            body,
            redelivered: true,
            ..previous
        }
        .encode()?;

        redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(&self.processing_key)
            .arg(1)
            .arg(&raw)
            .ignore()
            .cmd("LPUSH")
            .arg(&self.queue_key)
            .arg(&entry)
            .ignore()
            .query_async::<()>(&mut self.conn)
            .await
            .map_err(redis_error("Redis requeue failed"))?;
        Ok(())
    }

    async fn reject(&mut self, tag: u64) -> AppResult<()> {
        let raw = self.settle(tag)?;
        self.remove_processing(&raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(queue_key("keystone.user.created"), "keystone:bus:queue:keystone.user.created");
        assert_eq!(
            processing_key("keystone.user.created"),
            "keystone:bus:queue:keystone.user.created:processing"
        );
        assert_eq!(
            binding_key("keystone.events", "user.created"),
            "keystone:bus:bind:keystone.events:user.created"
        );
    }

    #[test]
    fn test_invalid_url_is_configuration_error() {
        let err = RedisBroker::new("not a url").unwrap_err();
        assert!(err.is(keystone_core::ErrorCode::Configuration));
    }
}
