//! User lifecycle handler and its extension points.

use async_trait::async_trait;
use tracing::{debug, warn};

use keystone_bus::EventHandler;
use keystone_core::events::{
    DomainEvent, EventPayload, PasswordChanged, Topic, UserActivated, UserCreated,
    UserDeactivated, UserDeleted, UserEmailChanged, UserRegistered,
};
use keystone_core::result::AppResult;

/// Topics the lifecycle handler subscribes to.
pub const LIFECYCLE_TOPICS: [Topic; 7] = [
    Topic::UserCreated,
    Topic::UserActivated,
    Topic::UserDeactivated,
    Topic::UserDeleted,
    Topic::UserEmailChanged,
    Topic::UserRegistered,
    Topic::PasswordChanged,
];

/// Actions taken at points of a user's lifecycle.
///
/// Every method defaults to doing nothing. Implement the ones a
/// deployment needs (onboarding, welcome mail, data export on deletion).
#[async_trait]
pub trait LifecycleActions: Send + Sync + 'static {
    /// A user account was created.
    async fn on_user_created(&self, _event: &DomainEvent, _payload: &UserCreated) -> AppResult<()> {
        Ok(())
    }

    /// A user registered through the auth service.
    async fn on_user_registered(
        &self,
        _event: &DomainEvent,
        _payload: &UserRegistered,
    ) -> AppResult<()> {
        Ok(())
    }

    /// A user account was activated.
    async fn on_user_activated(
        &self,
        _event: &DomainEvent,
        _payload: &UserActivated,
    ) -> AppResult<()> {
        Ok(())
    }

    /// A user account was deactivated.
    async fn on_user_deactivated(
        &self,
        _event: &DomainEvent,
        _payload: &UserDeactivated,
    ) -> AppResult<()> {
        Ok(())
    }

    /// A user account was deleted.
    async fn on_user_deleted(&self, _event: &DomainEvent, _payload: &UserDeleted) -> AppResult<()> {
        Ok(())
    }

    /// A user changed their email address.
    async fn on_email_changed(
        &self,
        _event: &DomainEvent,
        _payload: &UserEmailChanged,
    ) -> AppResult<()> {
        Ok(())
    }

    /// A user changed their password.
    async fn on_password_changed(
        &self,
        _event: &DomainEvent,
        _payload: &PasswordChanged,
    ) -> AppResult<()> {
        Ok(())
    }
}

/// The default, do-nothing actions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLifecycleActions;

impl LifecycleActions for NoopLifecycleActions {}

/// Dispatches lifecycle events to [`LifecycleActions`] by event type.
///
/// Never fails a delivery: an action error is logged and swallowed.
pub struct UserLifecycleHandler {
    actions: Box<dyn LifecycleActions>,
}

impl std::fmt::Debug for UserLifecycleHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserLifecycleHandler").finish_non_exhaustive()
    }
}

impl UserLifecycleHandler {
    /// Creates a handler running `actions`.
    pub fn new(actions: impl LifecycleActions) -> Self {
        Self::from_boxed(Box::new(actions))
    }

    /// Creates a handler running already boxed `actions`.
    pub fn from_boxed(actions: Box<dyn LifecycleActions>) -> Self {
        Self { actions }
    }

    async fn dispatch(&self, event: &DomainEvent) -> AppResult<()> {
        let actions = self.actions.as_ref();
        match &event.payload {
            EventPayload::UserCreated(p) => actions.on_user_created(event, p).await,
            EventPayload::UserRegistered(p) => actions.on_user_registered(event, p).await,
            EventPayload::UserActivated(p) => actions.on_user_activated(event, p).await,
            EventPayload::UserDeactivated(p) => actions.on_user_deactivated(event, p).await,
            EventPayload::UserDeleted(p) => actions.on_user_deleted(event, p).await,
            EventPayload::UserEmailChanged(p) => actions.on_email_changed(event, p).await,
            EventPayload::PasswordChanged(p) => actions.on_password_changed(event, p).await,
            _ => {
                debug!(topic = %event.event_type(), "No lifecycle action for topic");
                Ok(())
            }
        }
    }
}

impl Default for UserLifecycleHandler {
    fn default() -> Self {
        Self::new(NoopLifecycleActions)
    }
}

#[async_trait]
impl EventHandler for UserLifecycleHandler {
    fn name(&self) -> &str {
        "user_lifecycle"
    }

    async fn handle(&self, event: &DomainEvent) -> AppResult<()> {
        if let Err(e) = self.dispatch(event).await {
            warn!(
                topic = %event.event_type(),
                event_id = %event.event_id,
                error = %e,
                "Lifecycle action failed"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use keystone_core::AppError;
    use keystone_core::events::{AGGREGATE_SYSTEM, AGGREGATE_USER, EventMetadata, SystemStarted};
    use keystone_core::types::id::UserId;

    use super::*;

    struct FailingWelcome {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LifecycleActions for FailingWelcome {
        async fn on_user_created(&self, _event: &DomainEvent, _payload: &UserCreated) -> AppResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::internal("mail server down"))
        }
    }

    fn created() -> DomainEvent {
        let user_id = UserId::new();
        DomainEvent::new(
            user_id.to_string(),
            AGGREGATE_USER,
            UserCreated {
                user_id,
                email: "a@x.com".to_string(),
                name: None,
                status: "active".to_string(),
            },
            EventMetadata::default(),
        )
    }

    #[tokio::test]
    async fn test_action_failure_does_not_fail_delivery() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = UserLifecycleHandler::new(FailingWelcome {
            calls: Arc::clone(&calls),
        });
        handler.handle(&created()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unrelated_topic_is_ignored() {
        let handler = UserLifecycleHandler::default();
        let event = DomainEvent::new(
            "keystone",
            AGGREGATE_SYSTEM,
            SystemStarted {
                version: "1".to_string(),
                components: vec![],
            },
            EventMetadata::default(),
        );
        handler.handle(&event).await.unwrap();
    }
}
