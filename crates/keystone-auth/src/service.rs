//! Authentication use cases.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use keystone_bus::EventBus;
use keystone_core::config::SessionConfig;
use keystone_core::events::{
    AGGREGATE_SESSION, AGGREGATE_USER, DomainEvent, EventMetadata, PasswordChanged,
    SessionExpired, UserLoggedIn, UserLoggedOut, UserRegistered,
};
use keystone_core::result::AppResult;
use keystone_core::traits::{
    PasswordHasher, RateLimiter, TransactionManager, TxContext, execute_in_transaction,
};
use keystone_core::types::id::{SessionId, UserId};
use keystone_core::{AppError, ErrorCode};
use keystone_database::SessionRepository;
use keystone_entity::session::Session;
use keystone_entity::user::UserSnapshot;

use crate::command::{
    ChangePasswordCommand, LoginCommand, LoginResult, LogoutCommand, RefreshSessionCommand,
    RegisterCommand, SessionValidation, ValidateSessionQuery, supplied_fingerprint,
};
use crate::user::{NewUser, UserService};
use crate::validation::CommandValidator;

const SOURCE: &str = "auth";

/// Orchestrates login, registration, logout, session validation and
/// refresh, and password change.
///
/// Every state change runs inside one transaction together with the event
/// that reports it; if persisting or publishing fails, the whole use case
/// rolls back.
#[derive(Clone)]
pub struct AuthService {
    transactions: Arc<dyn TransactionManager>,
    sessions: Arc<dyn SessionRepository>,
    users: Arc<dyn UserService>,
    rate_limiter: Arc<dyn RateLimiter>,
    hasher: Arc<dyn PasswordHasher>,
    validator: CommandValidator,
    bus: EventBus,
    session_config: SessionConfig,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("session_config", &self.session_config)
            .finish()
    }
}

impl AuthService {
    /// Creates a new auth service with all required collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transactions: Arc<dyn TransactionManager>,
        sessions: Arc<dyn SessionRepository>,
        users: Arc<dyn UserService>,
        rate_limiter: Arc<dyn RateLimiter>,
        hasher: Arc<dyn PasswordHasher>,
        validator: CommandValidator,
        bus: EventBus,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            transactions,
            sessions,
            users,
            rate_limiter,
            hasher,
            validator,
            bus,
            session_config,
        }
    }

    /// Authenticate with email and password and open a session.
    ///
    /// An unknown email and a wrong password both yield
    /// `INVALID_CREDENTIALS`; only a suspended account is reported
    /// distinctly.
    pub async fn login(&self, command: LoginCommand) -> AppResult<LoginResult> {
        self.validator.login(&command)?;
        let email = command.email.trim().to_lowercase();
        let rate_key = format!("login:{email}");
        self.check_rate_limit(&rate_key).await?;

        let user = match self.users.get_user_by_email(&email).await {
            Ok(user) => user,
            Err(e) => {
                if !e.is(ErrorCode::NotFound) {
                    warn!(error = %e, "User lookup failed during login");
                }
                return Err(AppError::invalid_credentials());
            }
        };

        if user.is_suspended() {
            warn!(user_id = %user.id, "Login attempt on suspended account");
            return Err(AppError::account_suspended());
        }
        if !user.is_active() {
            warn!(user_id = %user.id, status = %user.status, "Login attempt on inactive account");
            return Err(AppError::invalid_credentials());
        }

        if !user.check_password(self.hasher.as_ref(), &command.password)? {
            warn!(user_id = %user.id, "Login failed: wrong password");
            return Err(AppError::invalid_credentials());
        }

        self.reset_rate_limit(&rate_key).await;

        let owner = &user;
        let session = execute_in_transaction(self.transactions.as_ref(), |tx| async move {
            let session = Session::create(
                owner.id,
                command.ip_address.clone(),
                command.user_agent.clone(),
                &self.session_config,
            )?;
            self.persist_new_session(&tx, &session).await?;
            self.publish(DomainEvent::new(
                session.id.to_string(),
                AGGREGATE_SESSION,
                UserLoggedIn {
                    user_id: owner.id,
                    session_id: session.id,
                    email: owner.email.clone(),
                    ip_address: command.ip_address,
                    user_agent: command.user_agent,
                },
                EventMetadata::from_source(SOURCE).with_user_id(owner.id),
            ))
            .await?;
            Ok(session)
        })
        .await?;

        info!(user_id = %user.id, session_id = %session.id, "Login successful");
        Ok(LoginResult { user, session })
    }

    /// Create an account and its first session.
    pub async fn register(&self, command: RegisterCommand) -> AppResult<LoginResult> {
        self.validator.register(&command)?;
        let rate_key = format!("register:{}", command.ip_address);
        self.check_rate_limit(&rate_key).await?;

        let result = execute_in_transaction(self.transactions.as_ref(), |tx| async move {
            let user = self
                .users
                .create_user(
                    &tx,
                    NewUser {
                        email: command.email.clone(),
                        password: command.password,
                        name: command.name,
                    },
                )
                .await
                .map_err(|e| {
                    if e.is(ErrorCode::AlreadyExists) {
                        AppError::already_exists("An account with this email already exists")
                    } else {
                        e.into_internal("Failed to create user")
                    }
                })?;

            let session = Session::create(
                user.id,
                command.ip_address.clone(),
                command.user_agent,
                &self.session_config,
            )?;
            self.persist_new_session(&tx, &session).await?;
            self.publish(DomainEvent::new(
                user.id.to_string(),
                AGGREGATE_USER,
                UserRegistered {
                    user_id: user.id,
                    session_id: session.id,
                    email: user.email.clone(),
                    ip_address: command.ip_address,
                },
                EventMetadata::from_source(SOURCE).with_user_id(user.id),
            ))
            .await?;
            Ok(LoginResult { user, session })
        })
        .await?;

        self.reset_rate_limit(&rate_key).await;
        info!(
            user_id = %result.user.id,
            session_id = %result.session.id,
            "User registered"
        );
        Ok(result)
    }

    /// Delete a session.
    pub async fn logout(&self, command: LogoutCommand) -> AppResult<()> {
        self.validator.logout(&command)?;

        let session = execute_in_transaction(self.transactions.as_ref(), |tx| async move {
            let session = self.fetch_session(command.session_id).await?;
            self.sessions
                .delete(&tx, session.id)
                .await
                .map_err(|e| e.into_internal("Failed to delete session"))?;
            self.publish(DomainEvent::new(
                session.id.to_string(),
                AGGREGATE_SESSION,
                UserLoggedOut {
                    user_id: session.user_id,
                    session_id: session.id,
                },
                EventMetadata::from_source(SOURCE).with_user_id(session.user_id),
            ))
            .await?;
            Ok(session)
        })
        .await?;

        info!(user_id = %session.user_id, session_id = %session.id, "Logout successful");
        Ok(())
    }

    /// Check whether a session may be used.
    ///
    /// Missing, expired, deactivated and fingerprint-mismatched sessions
    /// come back as `valid = false` rather than as errors. An expired
    /// session is reported on the bus and deleted on a best-effort basis.
    pub async fn validate_session(
        &self,
        query: ValidateSessionQuery,
    ) -> AppResult<SessionValidation> {
        self.validator.validate_session(&query)?;

        let Some(session) = self.find_session(query.session_id).await? else {
            debug!(session_id = %query.session_id, "Session not found");
            return Ok(SessionValidation::invalid(None, None));
        };

        if session.is_expired() {
            self.expire(&session).await;
            return Ok(SessionValidation::invalid(Some(session), None));
        }
        if !session.active {
            return Ok(SessionValidation::invalid(Some(session), None));
        }
        if let Some((ip, ua)) = supplied_fingerprint(
            &session,
            query.ip_address.as_deref(),
            query.user_agent.as_deref(),
        ) {
            if !session.validate_security_context(ip, ua) {
                warn!(
                    session_id = %session.id,
                    user_id = %session.user_id,
                    "Session security context mismatch"
                );
                return Ok(SessionValidation::invalid(Some(session), None));
            }
        }

        let user = match self.users.get_user(session.user_id).await {
            Ok(user) => user,
            Err(e) if e.is(ErrorCode::NotFound) => {
                return Ok(SessionValidation::invalid(Some(session), None));
            }
            Err(e) => return Err(e.into_internal("Failed to load session owner")),
        };
        if !user.is_active() {
            return Ok(SessionValidation::invalid(Some(session), Some(user)));
        }

        Ok(SessionValidation {
            user: Some(user),
            session: Some(session),
            valid: true,
        })
    }

    /// Extend a valid session's expiry.
    pub async fn refresh_session(&self, command: RefreshSessionCommand) -> AppResult<Session> {
        self.validator.refresh_session(&command)?;

        let session = execute_in_transaction(self.transactions.as_ref(), |tx| async move {
            let mut session = self.fetch_session(command.session_id).await?;
            if !session.is_valid() {
                return Err(AppError::session_expired());
            }
            if let Some((ip, ua)) = supplied_fingerprint(
                &session,
                command.ip_address.as_deref(),
                command.user_agent.as_deref(),
            ) {
                if !session.validate_security_context(ip, ua) {
                    return Err(AppError::session_invalid(
                        "Session security context mismatch",
                    ));
                }
            }
            session.extend(self.session_config.default_duration());
            self.sessions
                .update(&tx, &session)
                .await
                .map_err(|e| e.into_internal("Failed to update session"))?;
            Ok(session)
        })
        .await?;

        debug!(session_id = %session.id, expires_at = %session.expires_at, "Session refreshed");
        Ok(session)
    }

    /// Replace a user's password and delete all of their sessions.
    pub async fn change_password(&self, command: ChangePasswordCommand) -> AppResult<()> {
        self.validator.change_password(&command)?;
        let user_id = command.user_id;
        let rate_key = format!("password:{user_id}");
        self.check_rate_limit(&rate_key).await?;

        let removed = execute_in_transaction(self.transactions.as_ref(), |tx| async move {
            let user = self.users.get_user(user_id).await?;
            if !user.check_password(self.hasher.as_ref(), &command.old_password)? {
                return Err(AppError::invalid_credentials());
            }
            self.users
                .change_user_password(&tx, user_id, &command.new_password)
                .await
                .map_err(|e| e.into_internal("Failed to change password"))?;
            self.publish(DomainEvent::new(
                user_id.to_string(),
                AGGREGATE_USER,
                PasswordChanged { user_id },
                EventMetadata::from_source(SOURCE).with_user_id(user_id),
            ))
            .await?;
            self.sessions
                .delete_by_user(&tx, user_id)
                .await
                .map_err(|e| e.into_internal("Failed to invalidate sessions"))
        })
        .await?;

        self.reset_rate_limit(&rate_key).await;
        info!(user_id = %user_id, sessions_invalidated = removed, "Password changed");
        Ok(())
    }

    /// Delete every expired session. Returns the number removed.
    pub async fn cleanup_expired_sessions(&self) -> AppResult<u64> {
        let removed = self
            .sessions
            .delete_expired()
            .await
            .map_err(|e| e.into_internal("Failed to delete expired sessions"))?;
        if removed > 0 {
            info!(removed, "Expired sessions cleaned up");
        } else {
            debug!("No expired sessions to clean up");
        }
        Ok(removed)
    }

    /// All sessions owned by a user, newest first.
    pub async fn get_user_sessions(&self, user_id: UserId) -> AppResult<Vec<Session>> {
        self.sessions.find_by_user(user_id).await
    }

    /// Delete every session owned by a user in its own transaction.
    /// Returns the number removed.
    pub async fn invalidate_user_sessions(&self, user_id: UserId, reason: &str) -> AppResult<u64> {
        let removed = execute_in_transaction(self.transactions.as_ref(), |tx| async move {
            self.sessions.delete_by_user(&tx, user_id).await
        })
        .await?;
        info!(user_id = %user_id, removed, reason, "User sessions invalidated");
        Ok(removed)
    }

    /// Current user snapshot.
    pub async fn get_user(&self, user_id: UserId) -> AppResult<UserSnapshot> {
        self.users.get_user(user_id).await
    }

    async fn check_rate_limit(&self, key: &str) -> AppResult<()> {
        let allowed = self
            .rate_limiter
            .allow(key)
            .await
            .map_err(|e| e.into_internal("Rate limiter unavailable"))?;
        if !allowed {
            warn!(key, "Rate limit exceeded");
            return Err(AppError::rate_limited());
        }
        Ok(())
    }

    async fn reset_rate_limit(&self, key: &str) {
        if let Err(e) = self.rate_limiter.reset(key).await {
            warn!(key, error = %e, "Failed to reset rate limiter");
        }
    }

    async fn find_session(&self, id: SessionId) -> AppResult<Option<Session>> {
        self.sessions
            .find_by_id(id)
            .await
            .map_err(|e| e.into_internal("Failed to load session"))
    }

    async fn fetch_session(&self, id: SessionId) -> AppResult<Session> {
        self.find_session(id)
            .await?
            .ok_or_else(|| AppError::not_found("Session not found"))
    }

    async fn persist_new_session(&self, tx: &TxContext, session: &Session) -> AppResult<()> {
        self.sessions
            .create(tx, session)
            .await
            .map_err(|e| e.into_internal("Failed to persist session"))
    }

    async fn publish(&self, event: DomainEvent) -> AppResult<()> {
        self.bus.publish(&event).await.map_err(|e| {
            error!(topic = %event.event_type(), error = %e, "Failed to publish auth event");
            e.into_internal(format!("Failed to publish {}", event.event_type()))
        })
    }

    /// Report an expired session and delete it; failures are only logged.
    ///
    /// The delete runs in its own transaction, so it still happens when the
    /// bus refuses the event.
    async fn expire(&self, session: &Session) {
        let reported = self
            .publish(DomainEvent::new(
                session.id.to_string(),
                AGGREGATE_SESSION,
                SessionExpired {
                    user_id: session.user_id,
                    session_id: session.id,
                    expired_at: session.expires_at,
                },
                EventMetadata::from_source(SOURCE).with_user_id(session.user_id),
            ))
            .await;
        if let Err(e) = reported {
            warn!(session_id = %session.id, error = %e, "Failed to report expired session");
        }

        let removed = execute_in_transaction(self.transactions.as_ref(), |tx| async move {
            self.sessions.delete(&tx, session.id).await
        })
        .await;
        match removed {
            Ok(_) => debug!(session_id = %session.id, "Expired session removed"),
            Err(e) => warn!(
                session_id = %session.id,
                error = %e,
                "Failed to delete expired session"
            ),
        }
    }
}
