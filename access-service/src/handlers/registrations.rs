use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{
        credential::CredentialResponse,
        registration::{
            ApproveRegistrationResponse, PendingQuery, PendingRegistrationResponse,
            RegisterRequest, RegisterResponse, RegistrationStatus, RejectRegistrationRequest,
        },
        ErrorResponse,
    },
    middleware::Operator,
    utils::ValidatedJson,
    AppState,
};

/// Self-service registration
#[utoipa::path(
    post,
    path = "/registrations",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Admitted; credential issued", body = RegisterResponse),
        (status = 202, description = "Queued for operator approval", body = RegisterResponse),
        (status = 200, description = "Rejected with a reason code", body = RegisterResponse),
        (status = 409, description = "An active credential already exists", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 502, description = "Certificate authority unavailable", body = ErrorResponse)
    ),
    tag = "Registration"
)]
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request = req.into_request()?;
    let outcome = state.evaluator.register(request, "self-service").await?;
    let response = RegisterResponse::from(outcome);

    let status = match response.status {
        RegistrationStatus::Admitted => StatusCode::CREATED,
        RegistrationStatus::Pending => StatusCode::ACCEPTED,
        RegistrationStatus::Rejected => StatusCode::OK,
    };
    Ok((status, Json(response)))
}

/// List queued registrations
#[utoipa::path(
    get,
    path = "/registrations/pending",
    params(PendingQuery),
    responses(
        (status = 200, description = "Registrations", body = [PendingRegistrationResponse]),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "Registration",
    security(("admin_api_key" = []))
)]
pub async fn list_pending(
    State(state): State<AppState>,
    Query(query): Query<PendingQuery>,
) -> Result<impl IntoResponse, AppError> {
    let pending = state.evaluator.list_pending(query.status).await?;
    Ok(Json(
        pending
            .into_iter()
            .map(PendingRegistrationResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// Approve a queued registration and issue its credential
#[utoipa::path(
    post,
    path = "/registrations/{id}/approve",
    params(("id" = Uuid, Path, description = "Registration id")),
    responses(
        (status = 201, description = "Credential issued", body = ApproveRegistrationResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "Registration not found", body = ErrorResponse),
        (status = 409, description = "Registration already decided", body = ErrorResponse)
    ),
    tag = "Registration",
    security(("admin_api_key" = []))
)]
pub async fn approve(
    State(state): State<AppState>,
    Extension(Operator(actor)): Extension<Operator>,
    Path(registration_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let issued = state.evaluator.approve(registration_id, &actor).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApproveRegistrationResponse {
            credential: CredentialResponse::from(&issued.credential),
            passphrase: issued.passphrase,
        }),
    ))
}

/// Reject a queued registration
#[utoipa::path(
    post,
    path = "/registrations/{id}/reject",
    params(("id" = Uuid, Path, description = "Registration id")),
    request_body = RejectRegistrationRequest,
    responses(
        (status = 200, description = "Registration rejected", body = PendingRegistrationResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 404, description = "Registration not found", body = ErrorResponse),
        (status = 409, description = "Registration already decided", body = ErrorResponse)
    ),
    tag = "Registration",
    security(("admin_api_key" = []))
)]
pub async fn reject(
    State(state): State<AppState>,
    Extension(Operator(actor)): Extension<Operator>,
    Path(registration_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<RejectRegistrationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let rejected = state
        .evaluator
        .reject(registration_id, req.notes.as_deref(), &actor)
        .await?;
    Ok(Json(PendingRegistrationResponse::from(rejected)))
}
