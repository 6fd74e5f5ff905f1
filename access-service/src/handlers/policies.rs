use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{
        policy::{
            AuthorizeRequest, BindingRequest, BindingResponse, PolicyRequest, PolicyResponse,
            SubjectDto,
        },
        ErrorResponse,
    },
    middleware::Operator,
    services::{PolicyTest, Resolution},
    utils::ValidatedJson,
    AppState,
};

/// Create an authorization policy
#[utoipa::path(
    post,
    path = "/policies",
    request_body = PolicyRequest,
    responses(
        (status = 201, description = "Policy created", body = PolicyResponse),
        (status = 409, description = "Name already in use", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Policies",
    security(("admin_api_key" = []))
)]
pub async fn create_policy(
    State(state): State<AppState>,
    Extension(Operator(actor)): Extension<Operator>,
    ValidatedJson(req): ValidatedJson<PolicyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let policy = state
        .resolver
        .create_policy(req.into_draft()?, &actor)
        .await?;
    Ok((StatusCode::CREATED, Json(PolicyResponse::from(policy))))
}

/// List policies in evaluation order
#[utoipa::path(
    get,
    path = "/policies",
    responses(
        (status = 200, description = "Policies ordered by priority, then id", body = [PolicyResponse])
    ),
    tag = "Policies",
    security(("admin_api_key" = []))
)]
pub async fn list_policies(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let policies = state.resolver.list_policies().await?;
    Ok(Json(
        policies
            .into_iter()
            .map(PolicyResponse::from)
            .collect::<Vec<_>>(),
    ))
}

#[utoipa::path(
    get,
    path = "/policies/{id}",
    params(("id" = i64, Path, description = "Policy id")),
    responses(
        (status = 200, description = "Policy", body = PolicyResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "Policies",
    security(("admin_api_key" = []))
)]
pub async fn get_policy(
    State(state): State<AppState>,
    Path(policy_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let policy = state.resolver.get_policy(policy_id).await?;
    Ok(Json(PolicyResponse::from(policy)))
}

#[utoipa::path(
    put,
    path = "/policies/{id}",
    params(("id" = i64, Path, description = "Policy id")),
    request_body = PolicyRequest,
    responses(
        (status = 200, description = "Policy updated", body = PolicyResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Policies",
    security(("admin_api_key" = []))
)]
pub async fn update_policy(
    State(state): State<AppState>,
    Extension(Operator(actor)): Extension<Operator>,
    Path(policy_id): Path<i64>,
    ValidatedJson(req): ValidatedJson<PolicyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let policy = state
        .resolver
        .update_policy(policy_id, req.into_draft()?, &actor)
        .await?;
    Ok(Json(PolicyResponse::from(policy)))
}

#[utoipa::path(
    delete,
    path = "/policies/{id}",
    params(("id" = i64, Path, description = "Policy id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 409, description = "Still referenced by a method binding", body = ErrorResponse)
    ),
    tag = "Policies",
    security(("admin_api_key" = []))
)]
pub async fn delete_policy(
    State(state): State<AppState>,
    Extension(Operator(actor)): Extension<Operator>,
    Path(policy_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    state.resolver.delete_policy(policy_id, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Check whether a policy's conditions match a subject. Read-only.
#[utoipa::path(
    post,
    path = "/policies/{id}/test",
    params(("id" = i64, Path, description = "Policy id")),
    request_body = SubjectDto,
    responses(
        (status = 200, description = "Match result", body = PolicyTest),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "Policies",
    security(("admin_api_key" = []))
)]
pub async fn test_policy(
    State(state): State<AppState>,
    Path(policy_id): Path<i64>,
    Json(subject): Json<SubjectDto>,
) -> Result<impl IntoResponse, AppError> {
    let result = state
        .resolver
        .test(policy_id, &subject.into_subject()?)
        .await?;
    Ok(Json(result))
}

/// Create or replace a method binding
#[utoipa::path(
    post,
    path = "/method-bindings",
    request_body = BindingRequest,
    responses(
        (status = 200, description = "Binding saved", body = BindingResponse),
        (status = 400, description = "Unknown policy or invalid slot", body = ErrorResponse)
    ),
    tag = "Policies",
    security(("admin_api_key" = []))
)]
pub async fn save_binding(
    State(state): State<AppState>,
    Extension(Operator(actor)): Extension<Operator>,
    ValidatedJson(req): ValidatedJson<BindingRequest>,
) -> Result<impl IntoResponse, AppError> {
    let binding = state
        .resolver
        .save_binding(req.into_binding(None)?, &actor)
        .await?;
    Ok(Json(BindingResponse::from(binding)))
}

#[utoipa::path(
    put,
    path = "/method-bindings/{method_id}",
    params(("method_id" = String, Path, description = "Authentication method id")),
    request_body = BindingRequest,
    responses(
        (status = 200, description = "Binding saved", body = BindingResponse),
        (status = 400, description = "Unknown policy or invalid slot", body = ErrorResponse)
    ),
    tag = "Policies",
    security(("admin_api_key" = []))
)]
pub async fn put_binding(
    State(state): State<AppState>,
    Extension(Operator(actor)): Extension<Operator>,
    Path(method_id): Path<String>,
    ValidatedJson(req): ValidatedJson<BindingRequest>,
) -> Result<impl IntoResponse, AppError> {
    let binding = state
        .resolver
        .save_binding(req.into_binding(Some(method_id))?, &actor)
        .await?;
    Ok(Json(BindingResponse::from(binding)))
}

#[utoipa::path(
    get,
    path = "/method-bindings",
    responses(
        (status = 200, description = "Method bindings", body = [BindingResponse])
    ),
    tag = "Policies",
    security(("admin_api_key" = []))
)]
pub async fn list_bindings(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let bindings = state.resolver.list_bindings().await?;
    Ok(Json(
        bindings
            .into_iter()
            .map(BindingResponse::from)
            .collect::<Vec<_>>(),
    ))
}

#[utoipa::path(
    get,
    path = "/method-bindings/{method_id}",
    params(("method_id" = String, Path, description = "Authentication method id")),
    responses(
        (status = 200, description = "Method binding", body = BindingResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "Policies",
    security(("admin_api_key" = []))
)]
pub async fn get_binding(
    State(state): State<AppState>,
    Path(method_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let binding = state.resolver.get_binding(&method_id).await?;
    Ok(Json(BindingResponse::from(binding)))
}

#[utoipa::path(
    delete,
    path = "/method-bindings/{method_id}",
    params(("method_id" = String, Path, description = "Authentication method id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "Policies",
    security(("admin_api_key" = []))
)]
pub async fn delete_binding(
    State(state): State<AppState>,
    Extension(Operator(actor)): Extension<Operator>,
    Path(method_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.resolver.delete_binding(&method_id, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Resolve the network attributes for an authentication event
#[utoipa::path(
    post,
    path = "/authorize",
    request_body = AuthorizeRequest,
    responses(
        (status = 200, description = "Decision and attributes", body = Resolution),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Policies",
    security(("admin_api_key" = []))
)]
pub async fn authorize(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<AuthorizeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let subject = req.subject.into_subject()?;
    let resolution = state
        .resolver
        .resolve(&req.method_id, req.outcome, &subject)
        .await?;
    Ok(Json(resolution))
}
