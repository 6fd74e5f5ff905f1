use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{
        invite::{CreateInviteRequest, InviteResponse},
        ErrorResponse,
    },
    middleware::Operator,
    utils::ValidatedJson,
    AppState,
};

/// Create an invite code
#[utoipa::path(
    post,
    path = "/invite-codes",
    request_body = CreateInviteRequest,
    responses(
        (status = 201, description = "Invite code created", body = InviteResponse),
        (status = 400, description = "Invalid code or expiry", body = ErrorResponse),
        (status = 409, description = "Code already exists", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Invites",
    security(("admin_api_key" = []))
)]
pub async fn create_invite(
    State(state): State<AppState>,
    Extension(Operator(actor)): Extension<Operator>,
    ValidatedJson(req): ValidatedJson<CreateInviteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let invite = state
        .invites
        .create(
            req.code.as_deref(),
            req.max_uses,
            req.expires_utc,
            req.note,
            &actor,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(InviteResponse::from(invite))))
}

/// List invite codes, including exhausted ones
#[utoipa::path(
    get,
    path = "/invite-codes",
    responses(
        (status = 200, description = "Invite codes", body = [InviteResponse]),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "Invites",
    security(("admin_api_key" = []))
)]
pub async fn list_invites(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let invites = state.invites.list().await?;
    Ok(Json(
        invites
            .into_iter()
            .map(InviteResponse::from)
            .collect::<Vec<_>>(),
    ))
}

/// Delete an invite code
#[utoipa::path(
    delete,
    path = "/invite-codes/{code}",
    params(("code" = String, Path, description = "Invite code (case-insensitive)")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "Invites",
    security(("admin_api_key" = []))
)]
pub async fn delete_invite(
    State(state): State<AppState>,
    Extension(Operator(actor)): Extension<Operator>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.invites.delete(&code, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}
