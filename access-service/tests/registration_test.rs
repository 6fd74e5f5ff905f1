//! Self-service registration through the HTTP surface.

mod common;

use access_service::models::RegistrationMode;
use access_service::services::passphrase::PASSPHRASE_CHARSET;
use axum::http::StatusCode;
use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn invite_only_code_admits_exactly_once() {
    // Arrange
    let app = TestApp::new(vec![RegistrationMode::InviteOnly]);
    let (status, invite) = app
        .send(
            "POST",
            "/invite-codes",
            Some(json!({ "code": "WELCOME1", "max_uses": 1 })),
            true,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(invite["remaining_uses"], 1);

    // Act
    let (status, first) = app
        .send(
            "POST",
            "/registrations",
            Some(json!({ "email": "ada@example.com", "invite_code": "WELCOME1" })),
            false,
        )
        .await;

    // Assert
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["status"], "admitted");
    let passphrase = first["passphrase"].as_str().expect("passphrase returned");
    assert_eq!(passphrase.len(), 16);
    assert!(passphrase.bytes().all(|b| PASSPHRASE_CHARSET.contains(&b)));
    assert_eq!(first["credential"]["kind"], "shared_passphrase");
    assert_eq!(first["credential"]["status"], "active");

    let (status, second) = app
        .send(
            "POST",
            "/registrations",
            Some(json!({ "email": "bob@example.com", "invite_code": "welcome1" })),
            false,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["status"], "rejected");
    assert_eq!(second["reason"], "invalid_code");
    assert!(second.get("passphrase").is_none());

    let (_, invites) = app.send("GET", "/invite-codes", None, true).await;
    assert_eq!(invites[0]["uses"], 1);
    assert_eq!(invites[0]["remaining_uses"], 0);
}

#[tokio::test]
async fn invite_only_without_code_is_rejected() {
    let app = TestApp::new(vec![RegistrationMode::InviteOnly]);

    let (status, body) = app
        .send(
            "POST",
            "/registrations",
            Some(json!({ "email": "ada@example.com" })),
            false,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reason"], "invalid_code");
}

#[tokio::test]
async fn invite_plus_account_requires_email() {
    let app = TestApp::new(vec![RegistrationMode::InvitePlusAccount]);
    app.state
        .invites
        .create(Some("TEAM-2024"), 5, None, None, "test")
        .await
        .expect("invite created");

    let (status, body) = app
        .send(
            "POST",
            "/registrations",
            Some(json!({ "mac": "00:1a:2b:3c:4d:5e", "invite_code": "TEAM-2024" })),
            false,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reason"], "account_required");
}

#[tokio::test]
async fn account_only_closes_self_service() {
    let app = TestApp::new(vec![RegistrationMode::AccountOnly]);

    let (status, body) = app
        .send(
            "POST",
            "/registrations",
            Some(json!({ "email": "ada@example.com" })),
            false,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["reason"], "registration_closed");
}

#[tokio::test]
async fn approval_flow_issues_on_approve_and_records_rejection_notes() {
    // Arrange
    let app = TestApp::new(vec![RegistrationMode::OpenWithApproval]);

    // Act
    let (status, queued) = app
        .send(
            "POST",
            "/registrations",
            Some(json!({ "name": "Ada", "email": "ada@example.com", "passphrase": "correct-horse" })),
            false,
        )
        .await;
    let (_, other) = app
        .send(
            "POST",
            "/registrations",
            Some(json!({ "email": "mallory@example.com" })),
            false,
        )
        .await;

    // Assert
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(queued["status"], "pending");
    assert!(queued.get("credential").is_none());
    let id = queued["registration_id"].as_str().expect("registration id");
    let other_id = other["registration_id"].as_str().expect("registration id");

    let (status, pending) = app
        .send("GET", "/registrations/pending?status=pending", None, true)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending.as_array().map(Vec::len), Some(2));

    let (status, approved) = app
        .send("POST", &format!("/registrations/{}/approve", id), None, true)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(approved["passphrase"], "correct-horse");
    assert_eq!(approved["credential"]["owner"], "user:ada@example.com");

    let (status, _) = app
        .send("POST", &format!("/registrations/{}/approve", id), None, true)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, rejected) = app
        .send(
            "POST",
            &format!("/registrations/{}/reject", other_id),
            Some(json!({ "notes": "unknown visitor" })),
            true,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rejected["status"], "rejected");
    assert_eq!(rejected["notes"], "unknown visitor");
    assert_eq!(rejected["decided_by"], "operator:alice");
    assert!(rejected["credential_id"].is_null());

    let credentials = app.state.issuer.list(None).await.expect("list");
    assert_eq!(credentials.len(), 1);
}

#[tokio::test]
async fn open_mode_refuses_second_active_credential() {
    let app = TestApp::new(vec![RegistrationMode::Open]);
    let body = json!({ "email": "ada@example.com" });

    let (status, _) = app.send("POST", "/registrations", Some(body.clone()), false).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app.send("POST", "/registrations", Some(body), false).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn certificate_registration_needs_a_password() {
    let app = TestApp::new(vec![RegistrationMode::Open]);

    let (status, body) = app
        .send(
            "POST",
            "/registrations",
            Some(json!({ "email": "ada@example.com", "auth_method": "certificate" })),
            false,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reason"], "validation");

    let (status, body) = app
        .send(
            "POST",
            "/registrations",
            Some(json!({
                "email": "ada@example.com",
                "auth_method": "certificate",
                "certificate_password": "s3cret-pass",
                "area": "Unit 4, West"
            })),
            false,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["credential"]["kind"], "certificate");
    assert!(body["credential"]["serial"].is_string());
    let subjects = app.ca.issued_subjects();
    assert_eq!(subjects.len(), 1);
    assert!(subjects[0].contains("Unit 4\\, West"));
}

#[tokio::test]
async fn malformed_email_fails_validation() {
    let app = TestApp::new(vec![RegistrationMode::Open]);

    let (status, body) = app
        .send(
            "POST",
            "/registrations",
            Some(json!({ "email": "not-an-email" })),
            false,
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].is_string());
}
