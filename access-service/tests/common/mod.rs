//! Shared setup for access-service integration tests.
//!
//! Everything runs against the in-process store, the mock CA and the mock
//! controller, so these tests need no external services.

#![allow(dead_code)]

use access_service::{
    build_router,
    config::{
        AccessConfig, CertificateAuthorityConfig, ControllerConfig, DatabaseConfig, Environment,
        RateLimitConfig, RegistrationConfig, SecurityConfig, StoreBackend, SweeperConfig,
        SwaggerConfig, SwaggerMode,
    },
    models::RegistrationMode,
    services::{MockCertificateAuthority, MockSplashController, Stores},
    AppState,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use http_body_util::BodyExt;
use secrecy::Secret;
use std::sync::Arc;
use tower::util::ServiceExt;

pub const ADMIN_KEY: &str = "test-admin-key-0123456789";

pub fn test_config(modes: Vec<RegistrationMode>) -> AccessConfig {
    AccessConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "access-service-test".to_string(),
        service_version: "0.0.0".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            backend: StoreBackend::Memory,
            url: String::new(),
            max_connections: 1,
            min_connections: 1,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            admin_api_key: Secret::new(ADMIN_KEY.to_string()),
            passphrase_key: Secret::new(STANDARD.encode([7u8; 32])),
            session_secret: Secret::new("session-secret-for-tests".to_string()),
            session_ttl_minutes: 30,
            portal_token_secret: Secret::new("portal-secret-for-tests".to_string()),
        },
        registration: RegistrationConfig {
            modes,
            allow_multiple_credentials: false,
            network_id: "lab".to_string(),
            passphrase_length: 16,
            credential_validity_days: 0,
            organization: Some("Example Org".to_string()),
        },
        certificate_authority: CertificateAuthorityConfig {
            base_url: None,
            api_token: Secret::new(String::new()),
            timeout_secs: 5,
            validity_days: 365,
        },
        controller: ControllerConfig {
            timeout_secs: 5,
            grant_duration_secs: 3600,
            connected_url: "https://portal.example.com/connected".to_string(),
            allowed_hosts: vec!["controller.example.com".to_string()],
        },
        sweeper: SweeperConfig { interval_secs: 60 },
        swagger: SwaggerConfig {
            enabled: SwaggerMode::Disabled,
        },
        rate_limit: RateLimitConfig {
            register_attempts: 1000,
            register_window_seconds: 60,
            global_ip_limit: 1000,
            global_ip_window_seconds: 60,
        },
    }
}

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub ca: Arc<MockCertificateAuthority>,
    pub controller: Arc<MockSplashController>,
}

impl TestApp {
    pub fn new(modes: Vec<RegistrationMode>) -> Self {
        Self::with_config(test_config(modes))
    }

    pub fn with_config(config: AccessConfig) -> Self {
        let ca = Arc::new(MockCertificateAuthority::new());
        let controller = Arc::new(MockSplashController::new());
        let state = AppState::new(
            config,
            Stores::in_memory(),
            ca.clone(),
            controller.clone(),
        )
        .expect("Failed to build app state");
        let router = build_router(state.clone());
        Self {
            state,
            router,
            ca,
            controller,
        }
    }

    /// Send one request through the full middleware stack.
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
        admin: bool,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if admin {
            builder = builder
                .header("x-admin-api-key", ADMIN_KEY)
                .header("x-operator-id", "alice");
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("Failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }
}
