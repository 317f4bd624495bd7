use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::handlers::error::{ensure_learner_role, ApiError};
use crate::middlewares::auth::JwtClaims;
use crate::models::profile::{
    AchievementsResponse, ActivitiesResponse, LeaderboardResponse, ProfileResponse,
};
use crate::services::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<Json<ProfileResponse>, ApiError> {
    ensure_learner_role(&claims)?;
    Ok(Json(state.profile_service().profile(&claims.sub).await?))
}

pub async fn list_achievements(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<Json<AchievementsResponse>, ApiError> {
    ensure_learner_role(&claims)?;
    Ok(Json(
        state.profile_service().achievements(&claims.sub).await?,
    ))
}

pub async fn list_activities(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ActivitiesResponse>, ApiError> {
    ensure_learner_role(&claims)?;
    Ok(Json(
        state
            .profile_service()
            .activities(&claims.sub, query.limit)
            .await?,
    ))
}

pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<LeaderboardResponse>, ApiError> {
    ensure_learner_role(&claims)?;
    Ok(Json(state.profile_service().leaderboard(query.limit).await?))
}
