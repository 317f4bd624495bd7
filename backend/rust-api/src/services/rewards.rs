//! Gamification rules applied through a [`ProfileSink`].

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::RewardRules;
use crate::metrics::{ACHIEVEMENTS_GRANTED_TOTAL, XP_AWARDED_TOTAL};
use crate::models::attempt::CaseAttempt;
use crate::models::case::CaseDefinition;
use crate::models::profile::{level_for_xp, Achievement, AchievementType, Activity, ActivityKind};

use super::case_store::ProfileSink;

const LEVEL_UP_XP: u32 = 50;
const FIRST_CASE_XP: u32 = 25;
const CASE_MASTER_XP: u32 = 100;

/// Credits `amount` to the user and grants `level_up` when a level boundary
/// is crossed. Zero amounts are skipped.
pub async fn credit_reward<S>(
    sink: &mut S,
    rules: &RewardRules,
    user_id: &str,
    amount: u32,
    now: DateTime<Utc>,
) -> Result<Vec<AchievementType>>
where
    S: ProfileSink + ?Sized,
{
    if amount == 0 {
        return Ok(Vec::new());
    }

    let receipt = sink.add_reward(user_id, i64::from(amount)).await?;
    XP_AWARDED_TOTAL.inc_by(u64::from(amount));

    let previous_level = level_for_xp(receipt.previous_total, rules.xp_per_level);
    let new_level = level_for_xp(receipt.new_total, rules.xp_per_level);
    if new_level <= previous_level {
        return Ok(Vec::new());
    }

    tracing::info!(
        "User {} reached level {} ({} XP)",
        user_id,
        new_level,
        receipt.new_total
    );
    sink.record_activity(&Activity::new(
        user_id,
        ActivityKind::LevelUp,
        format!("Reached level {}", new_level),
        format!("Total XP is now {}", receipt.new_total),
        0,
        now,
    ))
    .await?;

    let achievement = Achievement {
        user_id: user_id.to_string(),
        achievement_type: AchievementType::LevelUp,
        title: format!("Level {} Reached!", new_level),
        description: format!("Congratulations on reaching level {}!", new_level),
        xp_reward: LEVEL_UP_XP,
        earned_at: now,
    };
    let mut granted = Vec::new();
    if grant(sink, &achievement).await? {
        granted.push(AchievementType::LevelUp);
    }
    Ok(granted)
}

/// Bumps the completion counter, logs the activity and evaluates the
/// completion-count achievements.
pub async fn record_case_completion<S>(
    sink: &mut S,
    rules: &RewardRules,
    case: &CaseDefinition,
    attempt: &CaseAttempt,
    now: DateTime<Utc>,
) -> Result<Vec<AchievementType>>
where
    S: ProfileSink + ?Sized,
{
    let user_id = attempt.user_id.as_str();
    let completed = sink.increment_cases_completed(user_id).await?;

    sink.record_activity(&Activity::new(
        user_id,
        ActivityKind::CaseCompleted,
        format!("Completed \"{}\"", case.title),
        "Successfully completed the case simulation",
        attempt.total_xp_earned,
        now,
    ))
    .await?;

    let mut candidates = Vec::new();
    if completed >= 1 {
        candidates.push(Achievement {
            user_id: user_id.to_string(),
            achievement_type: AchievementType::FirstCase,
            title: "First Case".to_string(),
            description: "Complete your first case simulation".to_string(),
            xp_reward: FIRST_CASE_XP,
            earned_at: now,
        });
    }
    if completed >= rules.case_master_threshold {
        candidates.push(Achievement {
            user_id: user_id.to_string(),
            achievement_type: AchievementType::CaseMaster,
            title: "Case Master".to_string(),
            description: format!("Complete {} cases", rules.case_master_threshold),
            xp_reward: CASE_MASTER_XP,
            earned_at: now,
        });
    }

    let mut granted = Vec::new();
    for achievement in &candidates {
        if grant(sink, achievement).await? {
            granted.push(achievement.achievement_type);
        }
    }
    Ok(granted)
}

async fn grant<S>(sink: &mut S, achievement: &Achievement) -> Result<bool>
where
    S: ProfileSink + ?Sized,
{
    if !sink.grant_achievement_if_absent(achievement).await? {
        return Ok(false);
    }

    ACHIEVEMENTS_GRANTED_TOTAL
        .with_label_values(&[achievement.achievement_type.as_str()])
        .inc();
    tracing::info!(
        "Achievement {} granted to user {}",
        achievement.achievement_type.as_str(),
        achievement.user_id
    );

    sink.record_activity(&Activity::new(
        &achievement.user_id,
        ActivityKind::AchievementEarned,
        format!("Achievement unlocked: {}", achievement.title),
        achievement.description.clone(),
        0,
        achievement.earned_at,
    ))
    .await?;
    Ok(true)
}
