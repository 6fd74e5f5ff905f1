//! Health, admin authentication, middleware headers and audit trail.

mod common;

use access_service::models::{AuditAction, AuthMethod, OwnerRef, RegistrationMode};
use access_service::services::IssueOptions;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{TestApp, ADMIN_KEY};
use tower::util::ServiceExt;

#[tokio::test]
async fn health_reports_mode() {
    let app = TestApp::new(vec![RegistrationMode::Open, RegistrationMode::InviteOnly]);

    let (status, body) = app.send("GET", "/health", None, false).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "access-service-test");
    assert_eq!(body["registration_mode"], "invite_only");
}

#[tokio::test]
async fn admin_routes_require_the_api_key() {
    let app = TestApp::new(vec![RegistrationMode::Open]);

    let (status, body) = app.send("GET", "/credentials", None, false).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/invite-codes")
                .header("x-admin-api-key", format!("{}x", ADMIN_KEY))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (status, _) = app.send("GET", "/credentials", None, true).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn authorize_is_an_operator_endpoint() {
    let app = TestApp::new(vec![RegistrationMode::Open]);

    let (status, _) = app
        .send(
            "POST",
            "/authorize",
            Some(serde_json::json!({
                "method_id": "tls",
                "outcome": "success",
                "subject": {}
            })),
            false,
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn responses_carry_request_id_and_security_headers() {
    let app = TestApp::new(vec![RegistrationMode::Open]);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "req-123")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok()),
        Some("req-123")
    );
    assert!(response.headers().contains_key("x-content-type-options"));
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new(vec![RegistrationMode::Open]);

    let (status, body) = app
        .send("GET", "/.well-known/openapi.json", None, false)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/authorize"].is_object());
    assert!(body["paths"]["/portal/grant"].is_object());
}

#[tokio::test]
async fn reveal_is_audited_with_operator_identity() {
    let app = TestApp::new(vec![RegistrationMode::Open]);
    let issued = app
        .state
        .issuer
        .issue(
            OwnerRef::user("ada@example.com"),
            AuthMethod::Passphrase,
            IssueOptions::default(),
            "test",
        )
        .await
        .expect("issued");
    let id = issued.credential.credential_id;

    let (status, _) = app
        .send("POST", &format!("/credentials/{}/reveal", id), None, true)
        .await;
    assert_eq!(status, StatusCode::OK);

    let events = app.state.audit.recent(20).await.expect("audit");
    let reveal = events
        .iter()
        .find(|e| e.action == AuditAction::CredentialRevealed)
        .expect("reveal audited");
    assert_eq!(reveal.actor, "operator:alice");
    assert_eq!(reveal.target.as_deref(), Some(id.to_string().as_str()));
}

#[tokio::test]
async fn audit_trail_is_listed_for_operators_only() {
    // Arrange
    let app = TestApp::new(vec![RegistrationMode::Open]);
    let issued = app
        .state
        .issuer
        .issue(
            OwnerRef::user("grace@example.com"),
            AuthMethod::Passphrase,
            IssueOptions::default(),
            "test",
        )
        .await
        .expect("issued");
    let id = issued.credential.credential_id;
    let (status, _) = app
        .send("POST", &format!("/credentials/{}/reveal", id), None, true)
        .await;
    assert_eq!(status, StatusCode::OK);

    // Act
    let (anon_status, _) = app.send("GET", "/audit-events", None, false).await;
    let (status, body) = app.send("GET", "/audit-events?limit=1", None, true).await;

    // Assert
    assert_eq!(anon_status, StatusCode::UNAUTHORIZED);
    assert_eq!(status, StatusCode::OK);
    let events = body.as_array().expect("array");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["action"], "credential_revealed");
    assert_eq!(events[0]["actor"], "operator:alice");
    assert_eq!(events[0]["target"], id.to_string());
}
