//! Captive-portal grant handshake.

mod common;

use access_service::models::RegistrationMode;
use access_service::services::splash::SplashCall;
use axum::http::StatusCode;
use common::TestApp;
use serde_json::json;

const LOGIN_URL: &str = "https%3A%2F%2Fcontroller.example.com%2Fsplash%2Flogin";
const CONTINUE_URL: &str = "https%3A%2F%2Fexample.org%2Fwelcome";

fn grant_uri(extra: &str) -> String {
    format!(
        "/portal/grant?client_mac=00%3A1a%3A2b%3A3c%3A4d%3A5e&login_url={}&continue_url={}&email=ada%40example.com{}",
        LOGIN_URL, CONTINUE_URL, extra
    )
}

#[tokio::test]
async fn first_visit_registers_and_signs_client_on() {
    // Arrange
    let app = TestApp::new(vec![RegistrationMode::Open]);

    // Act
    let (status, body) = app.send("GET", &grant_uri(""), None, false).await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "admitted");
    assert_eq!(body["returning"], false);
    assert_eq!(body["redirect_url"], "https://example.org/welcome");
    assert!(body["passphrase"].is_string());
    assert_eq!(body["credential"]["bound_mac"], "00:1a:2b:3c:4d:5e");

    let calls = app.controller.recorded();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        SplashCall::Login { url, sign_on } => {
            assert_eq!(url, "https://controller.example.com/splash/login");
            assert_eq!(
                Some(sign_on.username.as_str()),
                body["credential"]["correlation_id"].as_str()
            );
            assert_eq!(sign_on.password.len(), 64);
            assert_eq!(
                sign_on.success_url.as_deref(),
                Some("https://example.org/welcome")
            );
        }
        other => panic!("expected a sign-on, got {:?}", other),
    }

    let token = body["session_token"].as_str().expect("session token");
    let (status, session) = app
        .send(
            "POST",
            "/sessions/validate",
            Some(json!({ "token": token })),
            false,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["valid"], true);
}

#[tokio::test]
async fn returning_client_is_granted_without_new_credential() {
    let app = TestApp::new(vec![RegistrationMode::Open]);

    let (_, first) = app.send("GET", &grant_uri(""), None, false).await;
    let (status, second) = app.send("GET", &grant_uri(""), None, false).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["returning"], true);
    assert!(second.get("passphrase").is_none());
    assert_eq!(second["redirect_url"], first["redirect_url"]);
    assert_eq!(
        second["credential"]["credential_id"],
        first["credential"]["credential_id"]
    );
    assert_eq!(app.state.issuer.list(None).await.expect("list").len(), 1);
    assert_eq!(app.controller.recorded().len(), 2);
}

#[tokio::test]
async fn grant_url_is_used_when_no_login_url() {
    let app = TestApp::new(vec![RegistrationMode::Open]);
    let uri = "/portal/grant?client_mac=00%3A1a%3A2b%3A3c%3A4d%3A5f\
               &base_grant_url=https%253A%252F%252Fcontroller.example.com%252Fgrant";

    let (status, body) = app.send("GET", uri, None, false).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["redirect_url"], "https://portal.example.com/connected");
    assert_eq!(
        app.controller.recorded(),
        vec![SplashCall::Grant {
            url: "https://controller.example.com/grant".to_string(),
            continue_url: None,
            duration_secs: 3600,
        }]
    );
}

#[tokio::test]
async fn unknown_controller_host_is_refused() {
    let app = TestApp::new(vec![RegistrationMode::Open]);
    let uri = "/portal/grant?client_mac=00%3A1a%3A2b%3A3c%3A4d%3A5e\
               &login_url=https%3A%2F%2Fevil.example.net%2Flogin&email=ada%40example.com";

    let (status, _) = app.send("GET", uri, None, false).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.controller.recorded().is_empty());
    assert!(app.state.issuer.list(None).await.expect("list").is_empty());
}

#[tokio::test]
async fn controller_failure_surfaces_as_bad_gateway() {
    let app = TestApp::new(vec![RegistrationMode::Open]);
    app.controller.set_failing(true);

    let (status, _) = app.send("GET", &grant_uri(""), None, false).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn approval_mode_queues_portal_registrations() {
    let app = TestApp::new(vec![RegistrationMode::OpenWithApproval]);

    let (status, body) = app.send("GET", &grant_uri(""), None, false).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    assert!(body["registration_id"].is_string());
    assert!(app.controller.recorded().is_empty());
}

#[tokio::test]
async fn invite_mode_rejection_is_reported_not_raised() {
    let app = TestApp::new(vec![RegistrationMode::InviteOnly]);

    let (status, body) = app
        .send("GET", &grant_uri("&invite_code=NOPE"), None, false)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["reason"], "invalid_code");
}

#[tokio::test]
async fn tampered_session_token_is_invalid() {
    let app = TestApp::new(vec![RegistrationMode::Open]);

    let (status, session) = app
        .send(
            "POST",
            "/sessions/validate",
            Some(json!({ "token": "not.a.token" })),
            false,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["valid"], false);
}

#[tokio::test]
async fn known_email_on_new_device_still_needs_an_invite() {
    // Arrange
    let app = TestApp::new(vec![RegistrationMode::InviteOnly]);
    app.state
        .invites
        .create(Some("WELCOME1"), 1, None, None, "test")
        .await
        .expect("invite created");
    let (status, first) = app
        .send("GET", &grant_uri("&invite_code=WELCOME1"), None, false)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["status"], "admitted");

    // Act
    let other_device = format!(
        "/portal/grant?client_mac=aa%3Abb%3Acc%3Add%3Aee%3Aff&login_url={}&email=ada%40example.com",
        LOGIN_URL
    );
    let (status, second) = app.send("GET", &other_device, None, false).await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["status"], "rejected");
    assert_eq!(second["reason"], "invalid_code");
    assert_eq!(app.controller.recorded().len(), 1);
    assert_eq!(app.state.issuer.list(None).await.expect("list").len(), 1);
}

#[tokio::test]
async fn missing_mac_issues_unbound_credential() {
    let app = TestApp::new(vec![RegistrationMode::Open]);
    let uri = format!(
        "/portal/grant?login_url={}&continue_url={}&email=ada%40example.com",
        LOGIN_URL, CONTINUE_URL
    );

    let (status, body) = app.send("GET", &uri, None, false).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "admitted");
    assert!(body["credential"]["bound_mac"].is_null());
    assert!(body["passphrase"].is_string());
    assert_eq!(app.controller.recorded().len(), 1);
    assert_eq!(app.state.issuer.list(None).await.expect("list").len(), 1);
}

#[tokio::test]
async fn reloading_splash_page_does_not_requeue_approval() {
    let app = TestApp::new(vec![RegistrationMode::OpenWithApproval]);

    let (_, first) = app.send("GET", &grant_uri(""), None, false).await;
    let (status, second) = app.send("GET", &grant_uri(""), None, false).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(second["registration_id"], first["registration_id"]);
    let pending = app
        .state
        .evaluator
        .list_pending(None)
        .await
        .expect("pending");
    assert_eq!(pending.len(), 1);
}
