use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;

use crate::extractors::AppJson;
use crate::handlers::error::{ensure_learner_role, ApiError};
use crate::middlewares::auth::JwtClaims;
use crate::models::attempt::{
    CompletionSummary, CurrentStepResponse, StartCaseResponse, SubmitChoiceRequest,
    SubmitChoiceResponse,
};
use crate::models::case::CaseListResponse;
use crate::services::AppState;

pub async fn list_cases(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<Json<CaseListResponse>, ApiError> {
    ensure_learner_role(&claims)?;

    let cases = state.case_service().list_cases(&claims.sub).await?;
    Ok(Json(cases))
}

pub async fn start_case(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(case_id): Path<String>,
) -> Result<(StatusCode, Json<StartCaseResponse>), ApiError> {
    ensure_learner_role(&claims)?;
    tracing::info!("Starting case {} for user {}", case_id, claims.sub);

    let response = state.case_service().start_case(&claims.sub, &case_id).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_current_step(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
) -> Result<Json<CurrentStepResponse>, ApiError> {
    ensure_learner_role(&claims)?;

    let response = state
        .case_service()
        .current_step(&claims.sub, &attempt_id)
        .await?;
    Ok(Json(response))
}

pub async fn submit_choice(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
    AppJson(req): AppJson<SubmitChoiceRequest>,
) -> Result<Json<SubmitChoiceResponse>, ApiError> {
    ensure_learner_role(&claims)?;
    tracing::info!(
        "Submitting choice {} for attempt {} (user {})",
        req.choice_id,
        attempt_id,
        claims.sub
    );

    let response = state
        .case_service()
        .submit_choice(
            &claims.sub,
            &attempt_id,
            &req.choice_id,
            req.idempotency_key.as_deref(),
        )
        .await?;
    Ok(Json(response))
}

pub async fn get_completion_summary(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
) -> Result<Json<CompletionSummary>, ApiError> {
    ensure_learner_role(&claims)?;

    let summary = state
        .case_service()
        .completion_summary(&claims.sub, &attempt_id)
        .await?;
    Ok(Json(summary))
}
