use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{
        audit::{AuditEventResponse, AuditListQuery},
        ErrorResponse,
    },
    AppState,
};

/// Recent audit events
#[utoipa::path(
    get,
    path = "/audit-events",
    params(AuditListQuery),
    responses(
        (status = 200, description = "Audit events, newest first", body = [AuditEventResponse]),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    tag = "Audit",
    security(("admin_api_key" = []))
)]
pub async fn list_audit_events(
    State(state): State<AppState>,
    Query(query): Query<AuditListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let events = state.audit.recent(query.limit()).await?;
    Ok(Json(
        events
            .into_iter()
            .map(AuditEventResponse::from)
            .collect::<Vec<_>>(),
    ))
}
