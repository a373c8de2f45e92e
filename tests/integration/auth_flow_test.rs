//! Integration tests for the authentication flow with workflows running.

mod helpers;

use keystone_auth::{
    ChangePasswordCommand, LogoutCommand, RefreshSessionCommand, ValidateSessionQuery,
};
use keystone_core::ErrorCode;

use helpers::{NEW_PASSWORD, PASSWORD, TestApp};

#[tokio::test]
async fn test_full_session_lifecycle() {
    let app = TestApp::new().await;
    let registered = app.register("flow@x.com").await;
    let user_id = registered.user.id;

    let validation = app
        .auth
        .validate_session(ValidateSessionQuery {
            session_id: registered.session.id,
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: Some("firefox".to_string()),
        })
        .await
        .unwrap();
    assert!(validation.valid);
    assert_eq!(validation.user.unwrap().id, user_id);

    let refreshed = app
        .auth
        .refresh_session(RefreshSessionCommand {
            session_id: registered.session.id,
            ip_address: None,
            user_agent: None,
        })
        .await
        .unwrap();
    assert_eq!(refreshed.version, registered.session.version + 1);

    let second = app
        .auth
        .login(TestApp::login_command("flow@x.com", PASSWORD, "10.0.0.2"))
        .await
        .unwrap();
    assert_eq!(app.session_count(user_id).await, 2);

    app.auth
        .logout(LogoutCommand {
            session_id: second.session.id,
        })
        .await
        .unwrap();
    assert_eq!(app.session_count(user_id).await, 1);

    for action in ["user_created", "register", "login", "logout"] {
        let records = app.wait_for_audit(action, user_id).await;
        assert_eq!(records.len(), 1, "expected one '{action}' record");
    }

    app.shutdown().await;
}

#[tokio::test]
async fn test_password_change_ends_every_session() {
    let app = TestApp::new().await;
    let registered = app.register("pw@x.com").await;
    let user_id = registered.user.id;
    app.auth
        .login(TestApp::login_command("pw@x.com", PASSWORD, "10.0.0.2"))
        .await
        .unwrap();

    app.auth
        .change_password(ChangePasswordCommand {
            user_id,
            old_password: PASSWORD.to_string(),
            new_password: NEW_PASSWORD.to_string(),
        })
        .await
        .unwrap();
    assert_eq!(app.session_count(user_id).await, 0);

    let old = app
        .auth
        .validate_session(ValidateSessionQuery {
            session_id: registered.session.id,
            ip_address: None,
            user_agent: None,
        })
        .await
        .unwrap();
    assert!(!old.valid);

    let err = app
        .auth
        .login(TestApp::login_command("pw@x.com", PASSWORD, "10.0.0.3"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidCredentials);
    app.auth
        .login(TestApp::login_command("pw@x.com", NEW_PASSWORD, "10.0.0.3"))
        .await
        .unwrap();

    assert_eq!(app.wait_for_audit("password_changed", user_id).await.len(), 1);
    app.shutdown().await;
}

#[tokio::test]
async fn test_repeated_failures_are_rate_limited() {
    let app = TestApp::new().await;
    app.register("rl@x.com").await;

    let max = app.config.rate_limit.max_attempts;
    for _ in 0..max {
        let err = app
            .auth
            .login(TestApp::login_command("rl@x.com", "wrong", "10.0.0.9"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidCredentials);
    }
    let err = app
        .auth
        .login(TestApp::login_command("rl@x.com", PASSWORD, "10.0.0.9"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::RateLimitExceeded);

    app.shutdown().await;
}
