//! Buffered, background event handler wrapper.
//!
//! [`AsyncHandler`] returns from `handle` as soon as the event is buffered,
//! so a slow handler does not hold up its topic's delivery loop. The
//! trade-off is that a failure of the wrapped handler no longer triggers a
//! redelivery; it is only logged. Cancelling the token stops the worker and
//! drops whatever is still buffered.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use keystone_core::AppError;
use keystone_core::events::DomainEvent;
use keystone_core::result::AppResult;

use crate::handler::EventHandler;

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Wraps a handler so it runs on its own task behind a bounded buffer.
pub struct AsyncHandler {
    name: String,
    sender: mpsc::Sender<DomainEvent>,
    token: CancellationToken,
    counters: Arc<Counters>,
}

impl AsyncHandler {
    /// Spawn the worker for `inner` with a buffer of `buffer` events.
    ///
    /// The worker exits when `token` is cancelled.
    pub fn new(inner: Arc<dyn EventHandler>, buffer: usize, token: CancellationToken) -> Self {
        let name = format!("async:{}", inner.name());
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let counters = Arc::new(Counters::default());
        tokio::spawn(run_worker(
            inner,
            receiver,
            token.clone(),
            Arc::clone(&counters),
        ));
        Self {
            name,
            sender,
            token,
            counters,
        }
    }

    /// Stop the worker; buffered events are dropped.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Events the wrapped handler completed successfully.
    pub fn processed(&self) -> u64 {
        self.counters.processed.load(Ordering::SeqCst)
    }

    /// Events the wrapped handler failed on.
    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::SeqCst)
    }

    /// Events dropped because of cancellation.
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for AsyncHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &DomainEvent) -> AppResult<()> {
        if self.token.is_cancelled() {
            self.counters.dropped.fetch_add(1, Ordering::SeqCst);
            debug!(handler = %self.name, event_id = %event.event_id, "Handler cancelled, event dropped");
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            sent = self.sender.send(event.clone()) => sent.map_err(|_| {
                AppError::internal(format!("Async handler '{}' worker has stopped", self.name))
            }),
        }
    }
}

async fn run_worker(
    inner: Arc<dyn EventHandler>,
    mut receiver: mpsc::Receiver<DomainEvent>,
    token: CancellationToken,
    counters: Arc<Counters>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = receiver.recv() => match next {
                Some(event) => event,
                None => return,
            },
        };
        match inner.handle(&event).await {
            Ok(()) => {
                counters.processed.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                error!(
                    handler = inner.name(),
                    event_id = %event.event_id,
                    error = %e,
                    "Async handler failed"
                );
            }
        }
    }

    receiver.close();
    let mut dropped = 0u64;
    while receiver.try_recv().is_ok() {
        dropped += 1;
    }
    counters.dropped.fetch_add(dropped, Ordering::SeqCst);
    if dropped > 0 {
        warn!(handler = inner.name(), dropped, "Async handler cancelled with buffered events");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use keystone_core::events::{AGGREGATE_SYSTEM, EventMetadata, SystemShuttingDown};
    use tokio::sync::Notify;

    use super::*;

    struct Gate {
        open: Arc<Notify>,
        seen: Arc<AtomicU64>,
    }

    #[async_trait]
    impl EventHandler for Gate {
        fn name(&self) -> &str {
            "gate"
        }

        async fn handle(&self, _event: &DomainEvent) -> AppResult<()> {
            self.open.notified().await;
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn event() -> DomainEvent {
        DomainEvent::new(
            "keystone",
            AGGREGATE_SYSTEM,
            SystemShuttingDown {
                reason: "test".to_string(),
            },
            EventMetadata::default(),
        )
    }

    #[tokio::test]
    async fn test_processes_in_background() {
        let open = Arc::new(Notify::new());
        let seen = Arc::new(AtomicU64::new(0));
        let handler = AsyncHandler::new(
            Arc::new(Gate {
                open: Arc::clone(&open),
                seen: Arc::clone(&seen),
            }),
            8,
            CancellationToken::new(),
        );
        assert_eq!(handler.name(), "async:gate");

        // Returns before the gate opens.
        handler.handle(&event()).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        open.notify_one();
        for _ in 0..50 {
            if handler.processed() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handler.processed(), 1);
    }

    #[tokio::test]
    async fn test_cancel_drops_buffered_events() {
        let open = Arc::new(Notify::new());
        let seen = Arc::new(AtomicU64::new(0));
        let handler = AsyncHandler::new(
            Arc::new(Gate {
                open: Arc::clone(&open),
                seen: Arc::clone(&seen),
            }),
            8,
            CancellationToken::new(),
        );
        handler.handle(&event()).await.unwrap();
        // Let the worker pick up the first event and block in the gate.
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        for _ in 0..2 {
            handler.handle(&event()).await.unwrap();
        }
        handler.cancel();
        handler.handle(&event()).await.unwrap();
        assert_eq!(handler.dropped(), 1);

        // Let the in-flight event finish; the two still buffered are dropped.
        open.notify_one();
        for _ in 0..50 {
            if handler.dropped() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handler.dropped(), 3);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
