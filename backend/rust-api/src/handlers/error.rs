use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::middlewares::auth::JwtClaims;
use crate::services::case_engine::CaseError;

const LEARNER_ROLES: [&str; 3] = ["student", "teacher", "admin"];

/// Error body shared by the case and profile endpoints:
/// `{"error": code, "message": text}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            code: "forbidden",
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<CaseError> for ApiError {
    fn from(err: CaseError) -> Self {
        let status = match &err {
            CaseError::NotFound(_) => StatusCode::NOT_FOUND,
            CaseError::InvalidChoice { .. } => StatusCode::BAD_REQUEST,
            CaseError::AlreadyCompleted
            | CaseError::NotCompleted
            | CaseError::StepMismatch { .. } => StatusCode::CONFLICT,
            CaseError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &err {
            CaseError::Storage(inner) => {
                tracing::error!("Storage failure: {:#}", inner);
                "Internal storage error".to_string()
            }
            other => other.to_string(),
        };

        Self {
            status,
            code: err.code(),
            message,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        CaseError::Storage(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": self.code,
                "message": self.message,
            })),
        )
            .into_response()
    }
}

pub fn ensure_learner_role(claims: &JwtClaims) -> Result<(), ApiError> {
    if LEARNER_ROLES.contains(&claims.role.as_str()) {
        Ok(())
    } else {
        tracing::warn!("Access denied for role {}", claims.role);
        Err(ApiError::forbidden("Learner role required"))
    }
}
