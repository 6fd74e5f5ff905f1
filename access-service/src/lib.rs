pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{AccessConfig, Environment, SwaggerMode};
use crate::services::{
    AuditService, CertificateAuthority, CredentialIssuer, GrantMediator, GrantSettings,
    InviteService, IssuerSettings, PassphraseCipher, PolicyResolver, RegistrationEvaluator,
    SessionService, SplashController, Stores,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::registrations::register,
        handlers::registrations::list_pending,
        handlers::registrations::approve,
        handlers::registrations::reject,
        handlers::credentials::list_credentials,
        handlers::credentials::get_credential,
        handlers::credentials::reveal,
        handlers::credentials::revoke,
        handlers::credentials::renew,
        handlers::credentials::delete_credential,
        handlers::credentials::sweep,
        handlers::credentials::download_certificate,
        handlers::invites::create_invite,
        handlers::invites::list_invites,
        handlers::invites::delete_invite,
        handlers::policies::create_policy,
        handlers::policies::list_policies,
        handlers::policies::get_policy,
        handlers::policies::update_policy,
        handlers::policies::delete_policy,
        handlers::policies::test_policy,
        handlers::policies::save_binding,
        handlers::policies::put_binding,
        handlers::policies::list_bindings,
        handlers::policies::get_binding,
        handlers::policies::delete_binding,
        handlers::policies::authorize,
        handlers::portal::grant_get,
        handlers::portal::grant_post,
        handlers::portal::validate_session,
        handlers::audit::list_audit_events,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::registration::RegisterRequest,
            dtos::registration::RegisterResponse,
            dtos::registration::RegistrationStatus,
            dtos::registration::PendingRegistrationResponse,
            dtos::registration::RejectRegistrationRequest,
            dtos::registration::ApproveRegistrationResponse,
            dtos::credential::CredentialResponse,
            dtos::credential::RevealResponse,
            dtos::credential::RevokeRequest,
            dtos::credential::RenewRequest,
            dtos::credential::SweepResponse,
            dtos::invite::CreateInviteRequest,
            dtos::invite::InviteResponse,
            dtos::policy::ConditionsDto,
            dtos::policy::PolicyRequest,
            dtos::policy::PolicyResponse,
            dtos::policy::SubjectDto,
            dtos::policy::AuthorizeRequest,
            dtos::policy::BindingRequest,
            dtos::policy::BindingResponse,
            dtos::portal::PortalParams,
            dtos::portal::PortalResponse,
            dtos::portal::ValidateSessionRequest,
            dtos::portal::SessionStatusResponse,
            dtos::audit::AuditEventResponse,
            models::AuditAction,
            services::Resolution,
            services::Decision,
            services::PolicyTest,
            services::RejectReason,
            services::CertificateFormat,
            models::AuthMethod,
            models::AuthOutcome,
            models::CredentialKind,
            models::CredentialStatus,
            models::MethodKind,
            models::PendingStatus,
            models::PolicyAttributes,
            models::PolicyType,
            models::RadiusAttribute,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Registration", description = "Self-service registration and operator approval"),
        (name = "Credentials", description = "Credential lifecycle"),
        (name = "Invites", description = "Invite code management"),
        (name = "Policies", description = "Authorization policies, method bindings and resolution"),
        (name = "Portal", description = "Captive-portal grant handshake"),
        (name = "Audit", description = "Operator and credential audit trail"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "admin_api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("x-admin-api-key"))),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: AccessConfig,
    pub stores: Stores,
    pub audit: AuditService,
    pub issuer: CredentialIssuer,
    pub evaluator: RegistrationEvaluator,
    pub resolver: PolicyResolver,
    pub invites: InviteService,
    pub mediator: GrantMediator,
    pub sessions: SessionService,
    pub register_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wire every service over the given stores and collaborators.
    pub fn new(
        config: AccessConfig,
        stores: Stores,
        ca: Arc<dyn CertificateAuthority>,
        controller: Arc<dyn SplashController>,
    ) -> Result<Self, AppError> {
        let cipher = PassphraseCipher::from_base64_key(
            config.security.passphrase_key.expose_secret(),
        )
        .map_err(AppError::ConfigError)?;
        let audit = AuditService::new(stores.audit.clone());

        let issuer = CredentialIssuer::new(
            stores.credentials.clone(),
            ca,
            cipher,
            audit.clone(),
            IssuerSettings {
                network_id: config.registration.network_id.clone(),
                passphrase_length: config.registration.passphrase_length,
                validity_days: config.registration.credential_validity_days,
                allow_multiple_credentials: config.registration.allow_multiple_credentials,
                organization: config.registration.organization.clone(),
                certificate_validity_days: config.certificate_authority.validity_days,
            },
        );

        let evaluator = RegistrationEvaluator::new(
            &config.registration.modes,
            stores.invites.clone(),
            stores.registrations.clone(),
            issuer.clone(),
            audit.clone(),
        );

        let resolver = PolicyResolver::new(stores.policies.clone(), audit.clone());
        let invites = InviteService::new(stores.invites.clone(), audit.clone());
        let sessions = SessionService::new(
            config.security.session_secret.expose_secret(),
            config.security.session_ttl_minutes,
        );

        let mediator = GrantMediator::new(
            stores.credentials.clone(),
            evaluator.clone(),
            issuer.clone(),
            controller,
            sessions.clone(),
            audit.clone(),
            GrantSettings {
                portal_token_secret: config.security.portal_token_secret.clone(),
                grant_duration_secs: config.controller.grant_duration_secs,
                connected_url: config.controller.connected_url.clone(),
                allowed_hosts: config.controller.allowed_hosts.clone(),
            },
        );

        let register_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.register_attempts,
            config.rate_limit.register_window_seconds,
        );
        let ip_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.global_ip_limit,
            config.rate_limit.global_ip_window_seconds,
        );

        Ok(Self {
            config,
            stores,
            audit,
            issuer,
            evaluator,
            resolver,
            invites,
            mediator,
            sessions,
            register_rate_limiter,
            ip_rate_limiter,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/registrations/pending",
            get(handlers::registrations::list_pending),
        )
        .route(
            "/registrations/:id/approve",
            post(handlers::registrations::approve),
        )
        .route(
            "/registrations/:id/reject",
            post(handlers::registrations::reject),
        )
        .route("/credentials", get(handlers::credentials::list_credentials))
        .route("/credentials/sweep", post(handlers::credentials::sweep))
        .route(
            "/credentials/:id",
            get(handlers::credentials::get_credential)
                .delete(handlers::credentials::delete_credential),
        )
        .route(
            "/credentials/:id/reveal",
            post(handlers::credentials::reveal),
        )
        .route(
            "/credentials/:id/revoke",
            post(handlers::credentials::revoke),
        )
        .route("/credentials/:id/renew", post(handlers::credentials::renew))
        .route(
            "/certificates/:id/download",
            get(handlers::credentials::download_certificate),
        )
        .route(
            "/invite-codes",
            get(handlers::invites::list_invites).post(handlers::invites::create_invite),
        )
        .route(
            "/invite-codes/:code",
            axum::routing::delete(handlers::invites::delete_invite),
        )
        .route(
            "/policies",
            get(handlers::policies::list_policies).post(handlers::policies::create_policy),
        )
        .route(
            "/policies/:id",
            get(handlers::policies::get_policy)
                .put(handlers::policies::update_policy)
                .delete(handlers::policies::delete_policy),
        )
        .route("/policies/:id/test", post(handlers::policies::test_policy))
        .route(
            "/method-bindings",
            get(handlers::policies::list_bindings).post(handlers::policies::save_binding),
        )
        .route(
            "/method-bindings/:method_id",
            get(handlers::policies::get_binding)
                .put(handlers::policies::put_binding)
                .delete(handlers::policies::delete_binding),
        )
        .route("/authorize", post(handlers::policies::authorize))
        .route("/audit-events", get(handlers::audit::list_audit_events))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::admin_auth_middleware,
        ));

    // Self-service entry points share a stricter per-IP limit.
    let register_limiter = state.register_rate_limiter.clone();
    let self_service_routes = Router::new()
        .route("/registrations", post(handlers::registrations::register))
        .route(
            "/portal/grant",
            get(handlers::portal::grant_get).post(handlers::portal::grant_post),
        )
        .layer(from_fn_with_state(
            register_limiter,
            ip_rate_limit_middleware,
        ));

    let ip_limiter = state.ip_rate_limiter.clone();

    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics));

    let swagger_enabled = match state.config.environment {
        Environment::Dev => true,
        Environment::Prod => match state.config.swagger.enabled {
            SwaggerMode::Public | SwaggerMode::Authenticated => true,
            SwaggerMode::Disabled => false,
        },
    };

    if swagger_enabled {
        app = app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        );
    }

    let cors_origins = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    app.route(
        "/sessions/validate",
        post(handlers::portal::validate_session),
    )
    .merge(self_service_routes)
    .merge(admin_routes)
    .with_state(state)
    .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
    .layer(from_fn(metrics_middleware))
    .layer(
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");

            tracing::info_span!(
                "http_request",
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri().path(),
                version = ?request.version(),
            )
        }),
    )
    .layer(from_fn(request_id_middleware))
    .layer(from_fn(security_headers_middleware))
    .layer(
        CorsLayer::new()
            .allow_origin(cors_origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                header::CONTENT_TYPE,
                HeaderName::from_static("x-admin-api-key"),
                HeaderName::from_static("x-operator-id"),
                HeaderName::from_static("x-request-id"),
            ]),
    )
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Service is unhealthy")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.stores.credentials.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "registration_mode": state.evaluator.mode(),
    })))
}
