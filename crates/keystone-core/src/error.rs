//! Unified application error types for Keystone.
//!
//! All crates map their internal errors into [`AppError`] for consistent
//! propagation through the ? operator. Every error carries a stable
//! [`ErrorCode`] and, through [`ErrorKind`], an HTTP-equivalent status for
//! whatever boundary eventually translates it.

use std::fmt;
use thiserror::Error;

/// Top-level error kind categorization used across the entire application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// Input validation failed.
    Validation,
    /// Authentication failed (bad credentials, expired or mismatched session).
    Authentication,
    /// The caller is not allowed to perform the action (suspended account).
    Authorization,
    /// The requested resource was not found.
    NotFound,
    /// A conflict occurred (duplicate entry, concurrent modification, etc.).
    Conflict,
    /// A rate limit was exceeded.
    RateLimit,
    /// A configuration error occurred.
    Configuration,
    /// A required collaborator (broker, database) is temporarily unavailable.
    ServiceUnavailable,
    /// An internal error occurred.
    Internal,
}

impl ErrorKind {
    /// HTTP status code equivalent used when translating at a boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::Authentication => 401,
            Self::Authorization => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::RateLimit => 429,
            Self::Configuration | Self::Internal => 500,
            Self::ServiceUnavailable => 503,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "VALIDATION"),
            Self::Authentication => write!(f, "AUTHENTICATION"),
            Self::Authorization => write!(f, "AUTHORIZATION"),
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::Conflict => write!(f, "CONFLICT"),
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::Configuration => write!(f, "CONFIGURATION"),
            Self::ServiceUnavailable => write!(f, "SERVICE_UNAVAILABLE"),
            Self::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// Stable, machine-readable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// A command field failed validation.
    Validation,
    /// Credentials did not match, or the account does not exist.
    InvalidCredentials,
    /// The account is suspended.
    AccountSuspended,
    /// The account is not active.
    AccountInactive,
    /// The session exists but is past its expiry.
    SessionExpired,
    /// The session failed a security-context check.
    SessionInvalid,
    /// A user or session was not found.
    NotFound,
    /// The entity already exists.
    AlreadyExists,
    /// Too many attempts for the rate-limit key.
    RateLimitExceeded,
    /// An event carried a payload that does not match its topic.
    InvalidEventData,
    /// An operation required a started event bus.
    BusNotStarted,
    /// The message broker rejected or could not accept a request.
    BrokerUnavailable,
    /// Configuration could not be loaded.
    Configuration,
    /// Unexpected or collaborator failure.
    Internal,
}

impl ErrorCode {
    /// The kind this code belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation | Self::InvalidEventData => ErrorKind::Validation,
            Self::InvalidCredentials | Self::SessionExpired | Self::SessionInvalid => {
                ErrorKind::Authentication
            }
            Self::AccountSuspended | Self::AccountInactive => ErrorKind::Authorization,
            Self::NotFound => ErrorKind::NotFound,
            Self::AlreadyExists => ErrorKind::Conflict,
            Self::RateLimitExceeded => ErrorKind::RateLimit,
            Self::Configuration => ErrorKind::Configuration,
            Self::BusNotStarted | Self::BrokerUnavailable => ErrorKind::ServiceUnavailable,
            Self::Internal => ErrorKind::Internal,
        }
    }

    /// Return the code as an upper-case string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::AccountSuspended => "ACCOUNT_SUSPENDED",
            Self::AccountInactive => "ACCOUNT_INACTIVE",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::SessionInvalid => "SESSION_INVALID",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::InvalidEventData => "INVALID_EVENT_DATA",
            Self::BusNotStarted => "BUS_NOT_STARTED",
            Self::BrokerUnavailable => "BROKER_UNAVAILABLE",
            Self::Configuration => "CONFIGURATION_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unified application error used throughout Keystone.
///
/// All crate-specific errors are mapped into `AppError` using `From` impls
/// or explicit `.map_err()` calls.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct AppError {
    /// Stable error code.
    pub code: ErrorCode,
    /// A human-readable error message.
    pub message: String,
    /// The offending field, for validation errors.
    pub field: Option<String>,
    /// Optional underlying cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new application error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            source: None,
        }
    }

    /// Create a new application error with an underlying cause.
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            source: Some(Box::new(source)),
        }
    }

    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    /// HTTP status code equivalent.
    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }

    /// Whether this error carries the given code.
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }

    /// Create a validation error tagged with the offending field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            ..Self::new(ErrorCode::Validation, message)
        }
    }

    /// Create an invalid-credentials error.
    ///
    /// The message is deliberately identical for unknown accounts and wrong
    /// secrets.
    pub fn invalid_credentials() -> Self {
        Self::new(ErrorCode::InvalidCredentials, "Invalid email or password")
    }

    /// Create an account-suspended error.
    pub fn account_suspended() -> Self {
        Self::new(ErrorCode::AccountSuspended, "Account is suspended")
    }

    /// Create an account-inactive error.
    pub fn account_inactive() -> Self {
        Self::new(ErrorCode::AccountInactive, "Account is not active")
    }

    /// Create a session-expired error.
    pub fn session_expired() -> Self {
        Self::new(ErrorCode::SessionExpired, "Session has expired")
    }

    /// Create a session-invalid error.
    pub fn session_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SessionInvalid, message)
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Create an already-exists error.
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AlreadyExists, message)
    }

    /// Create a rate-limit error.
    pub fn rate_limited() -> Self {
        Self::new(
            ErrorCode::RateLimitExceeded,
            "Too many attempts, please try again later",
        )
    }

    /// Create an invalid-event-data error.
    pub fn invalid_event_data(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidEventData, message)
    }

    /// Create a bus-not-started error.
    pub fn bus_not_started() -> Self {
        Self::new(ErrorCode::BusNotStarted, "Event bus is not started")
    }

    /// Create a broker-unavailable error.
    pub fn broker_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BrokerUnavailable, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Configuration, message)
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Wrap this error as the cause of an internal error.
    ///
    /// Used for collaborator failures that abort a transaction.
    pub fn into_internal(self, message: impl Into<String>) -> Self {
        Self::with_source(ErrorCode::Internal, message, self)
    }
}

impl Clone for AppError {
    fn clone(&self) -> Self {
        Self {
            code: self.code,
            message: self.message.clone(),
            field: self.field.clone(),
            source: None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(
            ErrorCode::Internal,
            format!("JSON serialization error: {err}"),
            err,
        )
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::with_source(
            ErrorCode::Configuration,
            format!("Configuration error: {err}"),
            err,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_map_to_http_status() {
        assert_eq!(AppError::validation("email", "bad").http_status(), 400);
        assert_eq!(AppError::invalid_credentials().http_status(), 401);
        assert_eq!(AppError::account_suspended().http_status(), 403);
        assert_eq!(AppError::not_found("session").http_status(), 404);
        assert_eq!(AppError::rate_limited().http_status(), 429);
        assert_eq!(AppError::internal("boom").http_status(), 500);
    }

    #[test]
    fn test_validation_carries_field() {
        let err = AppError::validation("password", "too short");
        assert_eq!(err.field.as_deref(), Some("password"));
        assert!(err.is(ErrorCode::Validation));
        assert_eq!(err.to_string(), "VALIDATION_ERROR: too short");
    }

    #[test]
    fn test_into_internal_keeps_cause() {
        let err = AppError::bus_not_started().into_internal("publish failed");
        assert_eq!(err.kind(), ErrorKind::Internal);
        let cause = std::error::Error::source(&err).expect("source");
        assert!(cause.to_string().contains("BUS_NOT_STARTED"));
    }
}
