use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use crate::config::RewardRules;
use crate::models::profile::{
    level_for_xp, level_progress_percent, xp_to_next_level, AchievementView, AchievementsResponse,
    ActivitiesResponse, ActivityView, LeaderboardEntry, LeaderboardResponse, ProfileResponse, StudentProfile,
};

use super::case_store::Store;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

/// Clamps a requested page size into `1..=MAX_PAGE_SIZE`.
pub fn page_size(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE)
}

pub struct ProfileService {
    store: Arc<dyn Store>,
    rules: RewardRules,
}

impl ProfileService {
    pub fn new(store: Arc<dyn Store>, rules: RewardRules) -> Self {
        Self { store, rules }
    }

    /// A user without a stored profile reads as a zero profile.
    pub async fn profile(&self, user_id: &str) -> Result<ProfileResponse> {
        let profile = self
            .store
            .find_profile(user_id)
            .await?
            .unwrap_or_else(|| StudentProfile::new(user_id, Utc::now()));
        let rank = self.store.count_profiles_above(profile.total_xp).await? + 1;
        let xp_per_level = self.rules.xp_per_level;

        Ok(ProfileResponse {
            user_id: profile.user_id,
            total_xp: profile.total_xp,
            level: level_for_xp(profile.total_xp, xp_per_level),
            level_progress: level_progress_percent(profile.total_xp, xp_per_level),
            xp_to_next_level: xp_to_next_level(profile.total_xp, xp_per_level),
            cases_completed: profile.cases_completed,
            rank,
        })
    }

    pub async fn achievements(&self, user_id: &str) -> Result<AchievementsResponse> {
        Ok(AchievementsResponse {
            achievements: self
                .store
                .list_achievements(user_id)
                .await?
                .into_iter()
                .map(AchievementView::from)
                .collect(),
        })
    }

    pub async fn activities(&self, user_id: &str, limit: Option<usize>) -> Result<ActivitiesResponse> {
        Ok(ActivitiesResponse {
            activities: self
                .store
                .recent_activities(user_id, page_size(limit))
                .await?
                .into_iter()
                .map(ActivityView::from)
                .collect(),
        })
    }

    /// Tied totals share a rank, matching the rank shown on profiles.
    pub async fn leaderboard(&self, limit: Option<usize>) -> Result<LeaderboardResponse> {
        let profiles = self.store.top_profiles(page_size(limit)).await?;

        let mut entries: Vec<LeaderboardEntry> = Vec::with_capacity(profiles.len());
        for (index, profile) in profiles.into_iter().enumerate() {
            let rank = match entries.last() {
                Some(previous) if previous.total_xp == profile.total_xp => previous.rank,
                _ => index as u64 + 1,
            };
            entries.push(LeaderboardEntry {
                rank,
                level: level_for_xp(profile.total_xp, self.rules.xp_per_level),
                user_id: profile.user_id,
                total_xp: profile.total_xp,
                cases_completed: profile.cases_completed,
            });
        }

        Ok(LeaderboardResponse { entries })
    }
}
