//! Topic → handler list registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use keystone_core::events::Topic;

use crate::handler::EventHandler;

/// Registry of handlers by topic.
///
/// Dispatch takes the read lock and clones the list; registration and
/// removal take the write lock.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<Topic, Vec<Arc<dyn EventHandler>>>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry").finish()
    }
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. Returns `true` if it is the first for `topic`.
    pub async fn register(&self, topic: Topic, handler: Arc<dyn EventHandler>) -> bool {
        let mut map = self.handlers.write().await;
        let list = map.entry(topic).or_default();
        debug!(topic = %topic, handler = handler.name(), "Registering handler");
        list.push(handler);
        list.len() == 1
    }

    /// Remove every handler named `name` from `topic`.
    pub async fn unregister(&self, topic: Topic, name: &str) -> bool {
        let mut map = self.handlers.write().await;
        let Some(list) = map.get_mut(&topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| h.name() != name);
        let removed = list.len() != before;
        if list.is_empty() {
            map.remove(&topic);
        }
        removed
    }

    /// Snapshot of the handlers for `topic`, in registration order.
    pub async fn handlers(&self, topic: Topic) -> Vec<Arc<dyn EventHandler>> {
        self.handlers
            .read()
            .await
            .get(&topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Topics with at least one handler.
    pub async fn topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.handlers.read().await.keys().copied().collect();
        topics.sort();
        topics
    }

    /// Handler count per topic.
    pub async fn counts(&self) -> BTreeMap<Topic, usize> {
        self.handlers
            .read()
            .await
            .iter()
            .map(|(t, list)| (*t, list.len()))
            .collect()
    }

    /// Distinct handler names across all topics.
    pub async fn handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .await
            .values()
            .flatten()
            .map(|h| h.name().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use keystone_core::events::DomainEvent;
    use keystone_core::result::AppResult;

    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl EventHandler for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn handle(&self, _event: &DomainEvent) -> AppResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry = HandlerRegistry::new();
        assert!(registry.register(Topic::UserCreated, Arc::new(Named("a"))).await);
        assert!(!registry.register(Topic::UserCreated, Arc::new(Named("b"))).await);

        let names: Vec<String> = registry
            .handlers(Topic::UserCreated)
            .await
            .iter()
            .map(|h| h.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        assert!(registry.unregister(Topic::UserCreated, "a").await);
        assert!(!registry.unregister(Topic::UserCreated, "a").await);
        assert!(registry.unregister(Topic::UserCreated, "b").await);
        assert!(registry.topics().await.is_empty());
    }
}
