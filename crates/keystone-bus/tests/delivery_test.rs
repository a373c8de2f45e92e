//! Delivery, retry and ordering behaviour of the event bus over the
//! in-memory broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use keystone_bus::broker::MemoryBroker;
use keystone_bus::{EventBus, EventHandler};
use keystone_core::AppError;
use keystone_core::config::BusConfig;
use keystone_core::events::{
    AGGREGATE_USER, DomainEvent, EventMetadata, Topic, UserCreated, UserUpdated,
};
use keystone_core::result::AppResult;
use keystone_core::types::id::UserId;

fn config() -> BusConfig {
    BusConfig {
        poll_timeout_ms: 20,
        ..BusConfig::default()
    }
}

fn user_created() -> DomainEvent {
    let user_id = UserId::new();
    DomainEvent::new(
        user_id.to_string(),
        AGGREGATE_USER,
        UserCreated {
            user_id,
            email: format!("{user_id}@x.com"),
            name: None,
            status: "active".to_string(),
        },
        EventMetadata::from_source("test"),
    )
}

fn user_updated() -> DomainEvent {
    let user_id = UserId::new();
    DomainEvent::new(
        user_id.to_string(),
        AGGREGATE_USER,
        UserUpdated {
            user_id,
            changed_fields: vec!["name".to_string()],
        },
        EventMetadata::from_source("test"),
    )
}

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

struct Counting {
    name: &'static str,
    calls: Arc<AtomicUsize>,
    fail: bool,
}

#[async_trait]
impl EventHandler for Counting {
    fn name(&self) -> &str {
        self.name
    }

    async fn handle(&self, _event: &DomainEvent) -> AppResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::internal("always fails"));
        }
        Ok(())
    }
}

/// Flags any overlap between handler invocations sharing `busy`.
struct Exclusive {
    name: &'static str,
    delay: Duration,
    busy: Arc<AtomicBool>,
    overlapped: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl EventHandler for Exclusive {
    fn name(&self) -> &str {
        self.name
    }

    async fn handle(&self, _event: &DomainEvent) -> AppResult<()> {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        tokio::time::sleep(self.delay).await;
        self.busy.store(false, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_events_published_before_subscribe_are_delivered() {
    let bus = EventBus::new(config(), Arc::new(MemoryBroker::new()));
    bus.start().await.unwrap();

    for _ in 0..5 {
        bus.publish(&user_created()).await.unwrap();
    }

    let calls = Arc::new(AtomicUsize::new(0));
    bus.subscribe(
        Topic::UserCreated,
        Arc::new(Counting {
            name: "late",
            calls: Arc::clone(&calls),
            fail: false,
        }),
    )
    .await
    .unwrap();

    assert!(wait_until(|| calls.load(Ordering::SeqCst) == 5).await);
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn test_subscriptions_before_start_get_consumers() {
    let bus = EventBus::new(config(), Arc::new(MemoryBroker::new()));
    let calls = Arc::new(AtomicUsize::new(0));
    bus.subscribe(
        Topic::UserCreated,
        Arc::new(Counting {
            name: "early",
            calls: Arc::clone(&calls),
            fail: false,
        }),
    )
    .await
    .unwrap();
    assert_eq!(bus.status().await.consumers_running, 0);

    bus.start().await.unwrap();
    assert_eq!(bus.status().await.consumers_running, 1);
    bus.publish(&user_created()).await.unwrap();

    assert!(wait_until(|| calls.load(Ordering::SeqCst) == 1).await);
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn test_failing_handler_is_retried_to_ceiling_then_dropped() {
    let broker = MemoryBroker::new();
    let config = config();
    let queue = config.queue_name("user.created");
    let bus = EventBus::new(config, Arc::new(broker.clone()));
    let calls = Arc::new(AtomicUsize::new(0));
    bus.subscribe(
        Topic::UserCreated,
        Arc::new(Counting {
            name: "broken",
            calls: Arc::clone(&calls),
            fail: true,
        }),
    )
    .await
    .unwrap();
    bus.start().await.unwrap();

    bus.publish(&user_created()).await.unwrap();

    // One initial delivery plus max_retry (3) redeliveries.
    assert!(wait_until(|| calls.load(Ordering::SeqCst) == 4).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(broker.queue_depth(&queue), 0);
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn test_one_failing_handler_fails_the_message() {
    let bus = EventBus::new(config(), Arc::new(MemoryBroker::new()));
    let good = Arc::new(AtomicUsize::new(0));
    let bad = Arc::new(AtomicUsize::new(0));
    bus.subscribe(
        Topic::UserCreated,
        Arc::new(Counting {
            name: "good",
            calls: Arc::clone(&good),
            fail: false,
        }),
    )
    .await
    .unwrap();
    bus.subscribe(
        Topic::UserCreated,
        Arc::new(Counting {
            name: "bad",
            calls: Arc::clone(&bad),
            fail: true,
        }),
    )
    .await
    .unwrap();
    bus.start().await.unwrap();
    bus.publish(&user_created()).await.unwrap();

    // The successful handler sees every redelivery too.
    assert!(wait_until(|| bad.load(Ordering::SeqCst) == 4).await);
    assert_eq!(good.load(Ordering::SeqCst), 4);
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn test_handlers_after_a_failing_one_still_run() {
    let broker = MemoryBroker::new();
    let config = config();
    let queue = config.queue_name("user.created");
    let bus = EventBus::new(config, Arc::new(broker.clone()));
    let bad = Arc::new(AtomicUsize::new(0));
    let good = Arc::new(AtomicUsize::new(0));
    bus.subscribe(
        Topic::UserCreated,
        Arc::new(Counting {
            name: "bad",
            calls: Arc::clone(&bad),
            fail: true,
        }),
    )
    .await
    .unwrap();
    bus.subscribe(
        Topic::UserCreated,
        Arc::new(Counting {
            name: "good",
            calls: Arc::clone(&good),
            fail: false,
        }),
    )
    .await
    .unwrap();
    bus.start().await.unwrap();
    bus.publish(&user_created()).await.unwrap();

    assert!(wait_until(|| good.load(Ordering::SeqCst) == 4).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(bad.load(Ordering::SeqCst), 4);
    assert_eq!(good.load(Ordering::SeqCst), 4);
    assert_eq!(broker.queue_depth(&queue), 0);
    bus.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handlers_on_one_topic_never_overlap() {
    let bus = EventBus::new(config(), Arc::new(MemoryBroker::new()));
    let busy = Arc::new(AtomicBool::new(false));
    let overlapped = Arc::new(AtomicBool::new(false));
    let slow_calls = Arc::new(AtomicUsize::new(0));
    let fast_calls = Arc::new(AtomicUsize::new(0));
    let other_calls = Arc::new(AtomicUsize::new(0));

    bus.subscribe(
        Topic::UserCreated,
        Arc::new(Exclusive {
            name: "slow",
            delay: Duration::from_millis(30),
            busy: Arc::clone(&busy),
            overlapped: Arc::clone(&overlapped),
            calls: Arc::clone(&slow_calls),
        }),
    )
    .await
    .unwrap();
    bus.subscribe(
        Topic::UserCreated,
        Arc::new(Exclusive {
            name: "fast",
            delay: Duration::from_millis(1),
            busy: Arc::clone(&busy),
            overlapped: Arc::clone(&overlapped),
            calls: Arc::clone(&fast_calls),
        }),
    )
    .await
    .unwrap();
    bus.subscribe(
        Topic::UserUpdated,
        Arc::new(Counting {
            name: "other",
            calls: Arc::clone(&other_calls),
            fail: false,
        }),
    )
    .await
    .unwrap();
    bus.start().await.unwrap();

    let mut publishers = Vec::new();
    for i in 0..8 {
        let bus = bus.clone();
        publishers.push(tokio::spawn(async move {
            let event = if i % 2 == 0 { user_created() } else { user_updated() };
            bus.publish(&event).await
        }));
    }
    for publisher in publishers {
        publisher.await.unwrap().unwrap();
    }

    assert!(wait_until(|| fast_calls.load(Ordering::SeqCst) == 4).await);
    assert!(wait_until(|| other_calls.load(Ordering::SeqCst) == 4).await);
    assert_eq!(slow_calls.load(Ordering::SeqCst), 4);
    assert!(!overlapped.load(Ordering::SeqCst));
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn test_unsubscribed_handler_is_not_invoked() {
    let bus = EventBus::new(config(), Arc::new(MemoryBroker::new()));
    let calls = Arc::new(AtomicUsize::new(0));
    bus.subscribe(
        Topic::UserCreated,
        Arc::new(Counting {
            name: "gone",
            calls: Arc::clone(&calls),
            fail: false,
        }),
    )
    .await
    .unwrap();
    bus.start().await.unwrap();
    assert!(bus.unsubscribe(Topic::UserCreated, "gone").await);

    bus.publish(&user_created()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    // The loop keeps running after the last handler is removed.
    assert_eq!(bus.status().await.consumers_running, 1);
    bus.stop().await.unwrap();
}
