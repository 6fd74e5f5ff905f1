use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::{
    dtos::{
        portal::{PortalParams, PortalResponse, SessionStatusResponse, ValidateSessionRequest},
        registration::RegistrationStatus,
        ErrorResponse,
    },
    utils::{ValidatedForm, ValidatedJson},
    AppState,
};

async fn run_grant(state: &AppState, params: PortalParams) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .mediator
        .grant(params.into_request(), "portal")
        .await?;
    let response = PortalResponse::from(outcome);
    let status = match response.status {
        RegistrationStatus::Admitted => StatusCode::OK,
        RegistrationStatus::Pending => StatusCode::ACCEPTED,
        RegistrationStatus::Rejected => StatusCode::OK,
    };
    Ok((status, Json(response)))
}

/// Captive-portal landing: grant a returning client or register a new one
#[utoipa::path(
    get,
    path = "/portal/grant",
    params(PortalParams),
    responses(
        (status = 200, description = "Granted or rejected", body = PortalResponse),
        (status = 202, description = "Registration queued for approval", body = PortalResponse),
        (status = 400, description = "Invalid portal parameters", body = ErrorResponse),
        (status = 502, description = "Controller handshake failed", body = ErrorResponse),
        (status = 503, description = "Controller outcome unknown; retry", body = ErrorResponse)
    ),
    tag = "Portal"
)]
pub async fn grant_get(
    State(state): State<AppState>,
    Query(params): Query<PortalParams>,
) -> Result<impl IntoResponse, AppError> {
    params.validate()?;
    run_grant(&state, params).await
}

/// Captive-portal registration form submission
#[utoipa::path(
    post,
    path = "/portal/grant",
    request_body(content = PortalParams, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Granted or rejected", body = PortalResponse),
        (status = 202, description = "Registration queued for approval", body = PortalResponse),
        (status = 400, description = "Invalid portal parameters", body = ErrorResponse),
        (status = 502, description = "Controller handshake failed", body = ErrorResponse),
        (status = 503, description = "Controller outcome unknown; retry", body = ErrorResponse)
    ),
    tag = "Portal"
)]
pub async fn grant_post(
    State(state): State<AppState>,
    ValidatedForm(params): ValidatedForm<PortalParams>,
) -> Result<impl IntoResponse, AppError> {
    run_grant(&state, params).await
}

/// Check a portal session token
#[utoipa::path(
    post,
    path = "/sessions/validate",
    request_body = ValidateSessionRequest,
    responses(
        (status = 200, description = "Session status", body = SessionStatusResponse)
    ),
    tag = "Portal"
)]
pub async fn validate_session(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ValidateSessionRequest>,
) -> impl IntoResponse {
    let status = state.sessions.validate(&req.token);
    Json(SessionStatusResponse {
        valid: status.valid,
        expires_at: status.expires_at,
    })
}
