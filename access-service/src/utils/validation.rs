use axum::{
    extract::{rejection::FormRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::dtos::ErrorResponse;

fn rejection(status: StatusCode, error: String, details: Option<String>) -> Response {
    (status, Json(ErrorResponse { error, details })).into_response()
}

pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| rejection(StatusCode::BAD_REQUEST, format!("Json parse error: {}", e), None))?;

        value.validate().map_err(|e| {
            rejection(
                StatusCode::UNPROCESSABLE_ENTITY,
                "Validation error".to_string(),
                Some(e.to_string()),
            )
        })?;

        Ok(ValidatedJson(value))
    }
}

/// `application/x-www-form-urlencoded` counterpart of [`ValidatedJson`],
/// used by the captive portal form.
pub struct ValidatedForm<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedForm<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Form(value) = Form::<T>::from_request(req, state)
            .await
            .map_err(|e: FormRejection| {
                rejection(StatusCode::BAD_REQUEST, format!("Form parse error: {}", e), None)
            })?;

        value.validate().map_err(|e| {
            rejection(
                StatusCode::UNPROCESSABLE_ENTITY,
                "Validation error".to_string(),
                Some(e.to_string()),
            )
        })?;

        Ok(ValidatedForm(value))
    }
}
