//! Invite code management and redemption under concurrency.

mod common;

use access_service::models::RegistrationMode;
use access_service::services::{RegistrationOutcome, RegistrationRequest, RejectReason};
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn concurrent_redemptions_never_exceed_max_uses() {
    // Arrange
    let app = TestApp::new(vec![RegistrationMode::InviteOnly]);
    app.state
        .invites
        .create(Some("SPRING"), 3, None, None, "test")
        .await
        .expect("invite created");

    // Act
    let mut handles = Vec::new();
    for i in 0..24 {
        let evaluator = app.state.evaluator.clone();
        handles.push(tokio::spawn(async move {
            let request = RegistrationRequest {
                email: Some(format!("guest{}@example.com", i)),
                invite_code: Some("SPRING".to_string()),
                ..Default::default()
            };
            evaluator.register(request, "self-service").await
        }));
    }

    let mut admitted = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.expect("task joined").expect("registration ran") {
            RegistrationOutcome::Admitted(_) => admitted += 1,
            RegistrationOutcome::Rejected { reason, .. } => {
                assert_eq!(reason, RejectReason::InvalidCode);
                refused += 1;
            }
            RegistrationOutcome::Pending(_) => panic!("invite mode never queues"),
        }
    }

    // Assert
    assert_eq!(admitted, 3);
    assert_eq!(refused, 21);
    let invite = app.state.invites.get("spring").await.expect("invite");
    assert_eq!(invite.uses, 3);
    assert_eq!(app.state.issuer.list(None).await.expect("list").len(), 3);
}

#[tokio::test]
async fn expired_code_is_refused() {
    let app = TestApp::new(vec![RegistrationMode::InviteOnly]);
    app.state
        .invites
        .create(
            Some("SHORTLIVED"),
            5,
            Some(Utc::now() + Duration::milliseconds(50)),
            None,
            "test",
        )
        .await
        .expect("invite created");
    tokio::time::sleep(std::time::Duration::from_millis(80)).await;

    let outcome = app
        .state
        .evaluator
        .register(
            RegistrationRequest {
                email: Some("late@example.com".to_string()),
                invite_code: Some("SHORTLIVED".to_string()),
                ..Default::default()
            },
            "self-service",
        )
        .await
        .expect("registration ran");

    assert!(matches!(
        outcome,
        RegistrationOutcome::Rejected {
            reason: RejectReason::InvalidCode,
            ..
        }
    ));
}

#[tokio::test]
async fn operators_create_list_and_delete_codes() {
    let app = TestApp::new(vec![RegistrationMode::InviteOnly]);

    let (status, generated) = app
        .send(
            "POST",
            "/invite-codes",
            Some(json!({ "max_uses": 10, "note": "front desk" })),
            true,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let code = generated["code"].as_str().expect("generated code").to_string();
    assert_eq!(code.len(), 8);

    let (status, _) = app
        .send(
            "POST",
            "/invite-codes",
            Some(json!({ "code": code.to_lowercase(), "max_uses": 1 })),
            true,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .send(
            "POST",
            "/invite-codes",
            Some(json!({ "code": "PAST", "max_uses": 1, "expires_utc": "2001-01-01T00:00:00Z" })),
            true,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, listed) = app.send("GET", "/invite-codes", None, true).await;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    assert_eq!(listed[0]["note"], "front desk");

    let (status, _) = app
        .send("DELETE", &format!("/invite-codes/{}", code), None, true)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .send("DELETE", &format!("/invite-codes/{}", code), None, true)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn zero_max_uses_fails_validation() {
    let app = TestApp::new(vec![RegistrationMode::InviteOnly]);

    let (status, _) = app
        .send(
            "POST",
            "/invite-codes",
            Some(json!({ "code": "NOPE", "max_uses": 0 })),
            true,
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
