use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{
        credential::{
            CredentialListQuery, CredentialResponse, DownloadQuery, RenewRequest, RevealResponse,
            RevokeRequest, SweepResponse,
        },
        ErrorResponse,
    },
    middleware::Operator,
    utils::ValidatedJson,
    AppState,
};

/// List credentials
#[utoipa::path(
    get,
    path = "/credentials",
    params(CredentialListQuery),
    responses(
        (status = 200, description = "Credentials", body = [CredentialResponse]),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "Credentials",
    security(("admin_api_key" = []))
)]
pub async fn list_credentials(
    State(state): State<AppState>,
    Query(query): Query<CredentialListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let credentials = state.issuer.list(query.status).await?;
    Ok(Json(
        credentials
            .iter()
            .map(CredentialResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// Fetch one credential
#[utoipa::path(
    get,
    path = "/credentials/{id}",
    params(("id" = Uuid, Path, description = "Credential id")),
    responses(
        (status = 200, description = "Credential", body = CredentialResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "Credentials",
    security(("admin_api_key" = []))
)]
pub async fn get_credential(
    State(state): State<AppState>,
    Path(credential_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let credential = state.issuer.get(credential_id).await?;
    Ok(Json(CredentialResponse::from(&credential)))
}

/// Decrypt a shared passphrase. Every call is audited.
#[utoipa::path(
    post,
    path = "/credentials/{id}/reveal",
    params(("id" = Uuid, Path, description = "Credential id")),
    responses(
        (status = 200, description = "Plaintext passphrase", body = RevealResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 409, description = "Credential is not an active passphrase", body = ErrorResponse)
    ),
    tag = "Credentials",
    security(("admin_api_key" = []))
)]
pub async fn reveal(
    State(state): State<AppState>,
    Extension(Operator(actor)): Extension<Operator>,
    Path(credential_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let passphrase = state.issuer.reveal(credential_id, &actor).await?;
    Ok(Json(RevealResponse {
        credential_id,
        passphrase,
    }))
}

/// Revoke a credential
#[utoipa::path(
    post,
    path = "/credentials/{id}/revoke",
    params(("id" = Uuid, Path, description = "Credential id")),
    request_body = RevokeRequest,
    responses(
        (status = 200, description = "Revoked", body = CredentialResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 409, description = "Already revoked or modified concurrently", body = ErrorResponse),
        (status = 502, description = "Certificate authority unavailable", body = ErrorResponse)
    ),
    tag = "Credentials",
    security(("admin_api_key" = []))
)]
pub async fn revoke(
    State(state): State<AppState>,
    Extension(Operator(actor)): Extension<Operator>,
    Path(credential_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<RevokeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let reason = req.reason.as_deref().unwrap_or("revoked by operator");
    let revoked = state.issuer.revoke(credential_id, reason, &actor).await?;
    Ok(Json(CredentialResponse::from(&revoked)))
}

/// Renew a certificate under a new protection password
#[utoipa::path(
    post,
    path = "/credentials/{id}/renew",
    params(("id" = Uuid, Path, description = "Credential id")),
    request_body = RenewRequest,
    responses(
        (status = 201, description = "Replacement certificate", body = CredentialResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 409, description = "Not a renewable certificate", body = ErrorResponse),
        (status = 502, description = "Certificate authority unavailable", body = ErrorResponse)
    ),
    tag = "Credentials",
    security(("admin_api_key" = []))
)]
pub async fn renew(
    State(state): State<AppState>,
    Extension(Operator(actor)): Extension<Operator>,
    Path(credential_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<RenewRequest>,
) -> Result<impl IntoResponse, AppError> {
    let issued = state
        .issuer
        .renew(credential_id, Some(&req.certificate_password), &actor)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CredentialResponse::from(&issued.credential)),
    ))
}

/// Delete a credential record
#[utoipa::path(
    delete,
    path = "/credentials/{id}",
    params(("id" = Uuid, Path, description = "Credential id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 502, description = "Certificate authority unavailable", body = ErrorResponse)
    ),
    tag = "Credentials",
    security(("admin_api_key" = []))
)]
pub async fn delete_credential(
    State(state): State<AppState>,
    Extension(Operator(actor)): Extension<Operator>,
    Path(credential_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.issuer.delete(credential_id, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Expire every credential past its expiry now
#[utoipa::path(
    post,
    path = "/credentials/sweep",
    responses(
        (status = 200, description = "Credentials expired by this sweep", body = SweepResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "Credentials",
    security(("admin_api_key" = []))
)]
pub async fn sweep(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let expired = state.issuer.sweep_expired().await?;
    Ok(Json(SweepResponse {
        count: expired.len(),
        expired,
    }))
}

/// Download an active certificate bundle
#[utoipa::path(
    get,
    path = "/certificates/{id}/download",
    params(
        ("id" = Uuid, Path, description = "Credential id"),
        DownloadQuery
    ),
    responses(
        (status = 200, description = "Certificate bundle", content_type = "application/octet-stream"),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 409, description = "Certificate is not active", body = ErrorResponse),
        (status = 502, description = "Certificate authority unavailable", body = ErrorResponse)
    ),
    tag = "Credentials",
    security(("admin_api_key" = []))
)]
pub async fn download_certificate(
    State(state): State<AppState>,
    Extension(Operator(actor)): Extension<Operator>,
    Path(credential_id): Path<Uuid>,
    Query(query): Query<DownloadQuery>,
) -> Result<impl IntoResponse, AppError> {
    let format = query.format.unwrap_or_default();
    let (bytes, credential) = state
        .issuer
        .download(credential_id, format, &actor)
        .await?;

    let filename = format!(
        "{}.{}",
        credential.serial.as_deref().unwrap_or("certificate"),
        format.file_extension()
    );
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    ))
}
