//! Case progression state machine.
//!
//! Everything here is synchronous and free of I/O: callers load the case and
//! attempt, run a transition, then persist the mutated attempt. States are
//! `Active(step)` and `Completed`; `Completed` is terminal.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::attempt::{AttemptStatus, CaseAttempt, ChoiceLogEntry};
use crate::models::case::{CaseDefinition, CaseStep};

#[derive(Debug, Error)]
pub enum CaseError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("choice {choice_id} is not available at step {step}")]
    InvalidChoice { choice_id: String, step: u32 },
    #[error("attempt is already completed")]
    AlreadyCompleted,
    #[error("attempt is not completed yet")]
    NotCompleted,
    #[error("attempt moved past step {expected}; reload and retry")]
    StepMismatch { expected: u32 },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl CaseError {
    pub fn code(&self) -> &'static str {
        match self {
            CaseError::NotFound(_) => "not_found",
            CaseError::InvalidChoice { .. } => "invalid_choice",
            CaseError::AlreadyCompleted => "already_completed",
            CaseError::NotCompleted => "not_completed",
            CaseError::StepMismatch { .. } => "step_mismatch",
            CaseError::Storage(_) => "storage_error",
        }
    }
}

/// Result of looking up the step an attempt is on.
#[derive(Debug)]
pub enum StepLookup<'a> {
    Active(&'a CaseStep),
    Completed,
}

/// What a single `submit_choice` call did to the attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceOutcome {
    pub status: AttemptStatus,
    pub consequence: Option<String>,
    pub xp_earned: u32,
    pub next_step: Option<u32>,
    /// True only when this call's choice finished the case. Implicit
    /// completion leaves it false.
    pub completed_by_choice: bool,
    /// True when the attempt was completed by the missing-step guard.
    pub repaired: bool,
}

pub fn start(
    case: &CaseDefinition,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<CaseAttempt, CaseError> {
    if !case.is_active {
        return Err(CaseError::NotFound(format!("case {}", case.id)));
    }
    Ok(CaseAttempt::new(user_id, &case.id, now))
}

/// Completes an active attempt whose current step no longer exists.
///
/// Steps can be removed from a case after attempts were started; the attempt
/// is then finished as-is. Returns true if the attempt was mutated and must
/// be persisted.
pub fn repair_missing_step(
    case: &CaseDefinition,
    attempt: &mut CaseAttempt,
    now: DateTime<Utc>,
) -> bool {
    if attempt.completed || case.has_step(attempt.current_step) {
        return false;
    }
    tracing::warn!(
        "Attempt {} points at missing step {} of case {}; marking completed",
        attempt.id,
        attempt.current_step,
        case.id
    );
    mark_completed(attempt, now);
    true
}

pub fn current_step<'a>(
    case: &'a CaseDefinition,
    attempt: &mut CaseAttempt,
    now: DateTime<Utc>,
) -> StepLookup<'a> {
    repair_missing_step(case, attempt, now);
    if attempt.completed {
        return StepLookup::Completed;
    }
    match case.step(attempt.current_step) {
        Some(step) => StepLookup::Active(step),
        None => StepLookup::Completed,
    }
}

/// Records `choice_id` for the current step and advances the attempt.
///
/// The choice must belong to the step the attempt is on; ids from other
/// steps are rejected without touching the attempt.
pub fn submit_choice(
    case: &CaseDefinition,
    attempt: &mut CaseAttempt,
    choice_id: &str,
    now: DateTime<Utc>,
) -> Result<ChoiceOutcome, CaseError> {
    if attempt.completed {
        return Err(CaseError::AlreadyCompleted);
    }

    let step = match case.step(attempt.current_step) {
        Some(step) => step,
        None => {
            repair_missing_step(case, attempt, now);
            return Ok(ChoiceOutcome {
                status: AttemptStatus::Completed,
                consequence: None,
                xp_earned: 0,
                next_step: None,
                completed_by_choice: false,
                repaired: true,
            });
        }
    };

    let choice = step
        .choice(choice_id)
        .ok_or_else(|| CaseError::InvalidChoice {
            choice_id: choice_id.to_string(),
            step: step.number,
        })?;

    attempt.choices_made.push(ChoiceLogEntry {
        step: step.number,
        choice_id: choice.id.clone(),
        xp_earned: choice.xp_reward,
    });
    attempt.total_xp_earned += i64::from(choice.xp_reward);

    let next = step.number + 1;
    let (status, next_step) = if case.has_step(next) {
        attempt.current_step = next;
        (AttemptStatus::Continue, Some(next))
    } else {
        mark_completed(attempt, now);
        (AttemptStatus::Completed, None)
    };

    debug_assert!(attempt.is_consistent());

    Ok(ChoiceOutcome {
        status,
        consequence: Some(choice.consequence.clone()),
        xp_earned: choice.xp_reward,
        next_step,
        completed_by_choice: status == AttemptStatus::Completed,
        repaired: false,
    })
}

/// Performance percentage of a completed attempt, truncated toward zero.
pub fn score(case: &CaseDefinition, attempt: &CaseAttempt) -> Result<u32, CaseError> {
    if !attempt.completed {
        return Err(CaseError::NotCompleted);
    }
    Ok(performance_score(
        attempt.total_xp_earned,
        case.max_possible_reward(),
    ))
}

pub fn performance_score(earned: i64, max_possible: i64) -> u32 {
    if max_possible <= 0 {
        return 0;
    }
    (earned.max(0) * 100 / max_possible).min(100) as u32
}

/// Share of the case reached, by step pointer.
pub fn progress_percent(case: &CaseDefinition, attempt: &CaseAttempt) -> u32 {
    if attempt.completed {
        return 100;
    }
    let total = case.total_steps();
    if total == 0 {
        return 0;
    }
    (attempt.current_step.min(total) * 100 / total).min(100)
}

fn mark_completed(attempt: &mut CaseAttempt, now: DateTime<Utc>) {
    attempt.completed = true;
    if attempt.completed_at.is_none() {
        attempt.completed_at = Some(now);
    }
}
