use axum::{
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use validator::Validate;

/// JSON body extractor that validates the payload and answers with JSON
/// errors: 400 for unparsable bodies, 422 for validation failures.
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let value = match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => value,
            Err(rejection) => {
                let message = format!("Failed to parse JSON request body: {}", rejection);
                tracing::warn!("{}", message);
                return Err(error_response(StatusCode::BAD_REQUEST, "bad_request", message));
            }
        };

        if let Err(errors) = value.validate() {
            tracing::warn!("Request validation failed: {}", errors);
            return Err(error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                errors.to_string(),
            ));
        }

        Ok(AppJson(value))
    }
}

fn error_response(status: StatusCode, code: &str, message: String) -> Response {
    (
        status,
        Json(json!({
            "error": code,
            "message": message,
        })),
    )
        .into_response()
}
