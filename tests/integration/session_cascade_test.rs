//! Integration tests for session cleanup cascaded through the event bus.

mod helpers;

use keystone_auth::{StatusChange, UserService};
use keystone_core::ErrorCode;
use keystone_core::traits::TxContext;
use keystone_entity::user::UserStatus;
use keystone_workflow::CLEANUP_ACTION;

use helpers::{PASSWORD, TestApp};

#[tokio::test]
async fn test_deleting_a_user_removes_every_device_session() {
    let app = TestApp::new().await;
    let registered = app.register("multi@x.com").await;
    let user_id = registered.user.id;
    for ip in ["10.0.0.2", "10.0.0.3"] {
        app.auth
            .login(TestApp::login_command("multi@x.com", PASSWORD, ip))
            .await
            .unwrap();
    }
    assert_eq!(app.session_count(user_id).await, 3);

    app.users
        .delete_user(&TxContext::new(), user_id, None, Some("account closed".to_string()))
        .await
        .unwrap();

    assert!(app.wait_for_sessions(user_id, 0).await);
    let cleanups = app.wait_for_audit(CLEANUP_ACTION, user_id).await;
    assert_eq!(cleanups.len(), 1);
    assert_eq!(cleanups[0].details["session_count"], 3);
    assert_eq!(cleanups[0].details["reason"], "account closed");

    app.shutdown().await;
}

#[tokio::test]
async fn test_suspended_user_loses_sessions_and_cannot_log_in() {
    let app = TestApp::new().await;
    let registered = app.register("susp@x.com").await;
    let user_id = registered.user.id;

    app.users
        .change_user_status(
            &TxContext::new(),
            StatusChange {
                user_id,
                status: UserStatus::Suspended,
                changed_by: None,
                reason: Some("abuse report".to_string()),
            },
        )
        .await
        .unwrap();

    assert!(app.wait_for_sessions(user_id, 0).await);
    let err = app
        .auth
        .login(TestApp::login_command("susp@x.com", PASSWORD, "10.0.0.1"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AccountSuspended);
    assert_eq!(app.session_count(user_id).await, 0);

    app.shutdown().await;
}

#[tokio::test]
async fn test_cleanup_survives_audit_outage() {
    let app = TestApp::new().await;
    let registered = app.register("outage@x.com").await;
    let user_id = registered.user.id;
    app.audit.set_unavailable(true);

    app.users
        .deactivate_user(&TxContext::new(), user_id, None, None)
        .await
        .unwrap();

    assert!(app.wait_for_sessions(user_id, 0).await);
    app.shutdown().await;
}

#[tokio::test]
async fn test_status_reports_running_workflows() {
    let app = TestApp::new().await;

    let status = app.orchestrator.status().await;
    assert!(status.initialized);
    assert!(status.handlers.iter().any(|n| n == "session_cleanup:user_status_changed"));
    assert!(status.bus.consumers_running > 0);
    app.orchestrator.health().await.unwrap();

    app.shutdown().await;
    assert!(!app.orchestrator.status().await.initialized);
}
