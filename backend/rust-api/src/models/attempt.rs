use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::case::StepView;
use super::profile::{bson_datetime_as_chrono, bson_datetime_as_chrono_option, AchievementType};

/// One user's traversal of one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseAttempt {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub case_id: String,
    pub current_step: u32,
    pub total_xp_earned: i64,
    /// Append-only, in submission order.
    pub choices_made: Vec<ChoiceLogEntry>,
    pub completed: bool,
    #[serde(with = "bson_datetime_as_chrono")]
    pub started_at: DateTime<Utc>,
    #[serde(default, with = "bson_datetime_as_chrono_option")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceLogEntry {
    pub step: u32,
    pub choice_id: String,
    pub xp_earned: u32,
}

impl CaseAttempt {
    pub fn new(user_id: &str, case_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            case_id: case_id.to_string(),
            current_step: 1,
            total_xp_earned: 0,
            choices_made: Vec::new(),
            completed: false,
            started_at: now,
            completed_at: None,
        }
    }

    /// Checks the log against the counters.
    ///
    /// While active, exactly one entry exists per step already passed. The
    /// log total always equals `total_xp_earned`.
    pub fn is_consistent(&self) -> bool {
        let logged: i64 = self
            .choices_made
            .iter()
            .map(|entry| i64::from(entry.xp_earned))
            .sum();
        if logged != self.total_xp_earned {
            return false;
        }
        if self.completed {
            return self.completed_at.is_some();
        }
        self.completed_at.is_none() && self.choices_made.len() as u32 + 1 == self.current_step
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Continue,
    Completed,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartCaseResponse {
    pub attempt_id: String,
    pub case_id: String,
    pub current_step: u32,
    pub total_steps: u32,
    pub step: Option<StepView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CurrentStepResponse {
    pub attempt_id: String,
    pub case_id: String,
    pub case_title: String,
    pub step: Option<StepView>,
    pub step_number: u32,
    pub total_steps: u32,
    pub progress_percent: u32,
    pub total_xp_earned: i64,
    pub is_completed: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitChoiceRequest {
    #[validate(length(min = 1, max = 64, message = "choice_id must be 1-64 characters"))]
    pub choice_id: String,
    #[validate(length(min = 1, max = 128, message = "idempotency_key must be 1-128 characters"))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitChoiceResponse {
    pub status: AttemptStatus,
    pub consequence: Option<String>,
    pub xp_earned: u32,
    pub total_xp_earned: i64,
    pub next_step: Option<u32>,
    #[serde(default)]
    pub achievements_unlocked: Vec<AchievementType>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompletionSummary {
    pub attempt_id: String,
    pub case_id: String,
    pub case_title: String,
    pub performance_score: u32,
    pub total_xp_earned: i64,
    pub max_possible_xp: i64,
    pub completed_at: Option<DateTime<Utc>>,
    pub choices_made: Vec<ChoiceLogEntry>,
}
