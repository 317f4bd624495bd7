use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use redis::aio::ConnectionManager;

use crate::config::RewardRules;
use crate::metrics::{
    record_cache_hit, record_cache_miss, track_cache_operation, ATTEMPTS_COMPLETED_TOTAL,
    CASES_STARTED_TOTAL, CASE_PERFORMANCE_SCORE, CHOICES_SUBMITTED_TOTAL,
};
use crate::models::attempt::{
    AttemptStatus, CaseAttempt, CompletionSummary, CurrentStepResponse, StartCaseResponse,
    SubmitChoiceResponse,
};
use crate::models::case::{CaseDefinition, CaseListResponse, CaseSummary, StepView};
use crate::utils::retry::{retry_if, RetryConfig};

use super::case_engine::{self, CaseError, StepLookup};
use super::case_store::{Store, WriteConflict};
use super::rewards;

pub struct CaseService {
    store: Arc<dyn Store>,
    redis: Option<ConnectionManager>,
    rules: RewardRules,
    idempotency_ttl_seconds: u64,
}

impl CaseService {
    pub fn new(
        store: Arc<dyn Store>,
        redis: Option<ConnectionManager>,
        rules: RewardRules,
        idempotency_ttl_seconds: u64,
    ) -> Self {
        Self {
            store,
            redis,
            rules,
            idempotency_ttl_seconds,
        }
    }

    pub async fn list_cases(&self, user_id: &str) -> Result<CaseListResponse, CaseError> {
        let cases = retry_reads(|| async { Ok(self.store.list_active_cases().await?) }).await?;
        let completed_case_ids =
            retry_reads(|| async { Ok(self.store.completed_case_ids(user_id).await?) }).await?;

        Ok(CaseListResponse {
            cases: cases.iter().map(CaseSummary::from).collect(),
            completed_case_ids,
        })
    }

    pub async fn start_case(
        &self,
        user_id: &str,
        case_id: &str,
    ) -> Result<StartCaseResponse, CaseError> {
        let case = self.load_case(case_id).await?;
        let attempt = case_engine::start(&case, user_id, Utc::now())?;
        self.store.insert_attempt(&attempt).await?;

        CASES_STARTED_TOTAL
            .with_label_values(&[case.difficulty.as_str()])
            .inc();
        tracing::info!(
            "User {} started case {} (attempt {})",
            user_id,
            case.id,
            attempt.id
        );

        Ok(StartCaseResponse {
            attempt_id: attempt.id,
            case_id: case.id.clone(),
            current_step: attempt.current_step,
            total_steps: case.total_steps(),
            step: case.step(attempt.current_step).map(StepView::from),
        })
    }

    /// A repair that loses to another writer is re-read from the store.
    pub async fn current_step(
        &self,
        user_id: &str,
        attempt_id: &str,
    ) -> Result<CurrentStepResponse, CaseError> {
        retry_if(
            RetryConfig::default(),
            || self.load_current_step(user_id, attempt_id),
            |err| matches!(err, CaseError::StepMismatch { .. }),
        )
        .await
    }

    async fn load_current_step(
        &self,
        user_id: &str,
        attempt_id: &str,
    ) -> Result<CurrentStepResponse, CaseError> {
        let mut attempt = self.load_attempt(user_id, attempt_id).await?;
        let case = self.load_case_any(&attempt.case_id).await?;

        let expected_step = attempt.current_step;
        if case_engine::repair_missing_step(&case, &mut attempt, Utc::now()) {
            self.persist_repair(&attempt, expected_step).await?;
        }

        let step = match case_engine::current_step(&case, &mut attempt, Utc::now()) {
            StepLookup::Active(step) => Some(StepView::from(step)),
            StepLookup::Completed => None,
        };

        Ok(CurrentStepResponse {
            attempt_id: attempt.id.clone(),
            case_id: case.id.clone(),
            case_title: case.title.clone(),
            step,
            step_number: attempt.current_step,
            total_steps: case.total_steps(),
            progress_percent: case_engine::progress_percent(&case, &attempt),
            total_xp_earned: attempt.total_xp_earned,
            is_completed: attempt.completed,
        })
    }

    /// Applies one choice. The attempt write and every profile effect
    /// commit together or not at all.
    pub async fn submit_choice(
        &self,
        user_id: &str,
        attempt_id: &str,
        choice_id: &str,
        idempotency_key: Option<&str>,
    ) -> Result<SubmitChoiceResponse, CaseError> {
        let cache_key = idempotency_key
            .map(|key| format!("idempotency:choice:{}:{}:{}", user_id, attempt_id, key));

        if let Some(cache_key) = cache_key.as_deref() {
            if let Some(cached) = self.cached_response(cache_key).await {
                record_cache_hit();
                tracing::info!("Returning cached response for {}", cache_key);
                return Ok(cached);
            }
            record_cache_miss();
        }

        let response = retry_if(
            RetryConfig::default(),
            || self.apply_choice(user_id, attempt_id, choice_id),
            |err| matches!(err, CaseError::Storage(inner) if inner.is::<WriteConflict>()),
        )
        .await?;

        if let Some(cache_key) = cache_key.as_deref() {
            self.cache_response(cache_key, &response).await;
        }

        Ok(response)
    }

    /// One read-evaluate-write pass for a choice.
    async fn apply_choice(
        &self,
        user_id: &str,
        attempt_id: &str,
        choice_id: &str,
    ) -> Result<SubmitChoiceResponse, CaseError> {
        let mut attempt = self.load_attempt(user_id, attempt_id).await?;
        let case = self.load_case_any(&attempt.case_id).await?;
        let now = Utc::now();
        let expected_step = attempt.current_step;

        let outcome = match case_engine::submit_choice(&case, &mut attempt, choice_id, now) {
            Ok(outcome) => outcome,
            Err(err) => {
                CHOICES_SUBMITTED_TOTAL
                    .with_label_values(&[err.code()])
                    .inc();
                return Err(err);
            }
        };

        let mut tx = self.store.begin().await?;
        if !tx.update_attempt(&attempt, expected_step).await? {
            CHOICES_SUBMITTED_TOTAL
                .with_label_values(&["step_mismatch"])
                .inc();
            tracing::warn!(
                "Attempt {} is no longer at step {}; rejecting choice {}",
                attempt.id,
                expected_step,
                choice_id
            );
            return Err(CaseError::StepMismatch {
                expected: expected_step,
            });
        }

        let mut achievements_unlocked =
            rewards::credit_reward(tx.as_mut(), &self.rules, user_id, outcome.xp_earned, now)
                .await?;
        if outcome.completed_by_choice {
            let granted =
                rewards::record_case_completion(tx.as_mut(), &self.rules, &case, &attempt, now)
                    .await?;
            achievements_unlocked.extend(granted);
        }
        tx.commit().await?;

        let outcome_label = match (outcome.repaired, outcome.status) {
            (true, _) => "repaired",
            (false, AttemptStatus::Completed) => "completed",
            (false, AttemptStatus::Continue) => "continue",
        };
        CHOICES_SUBMITTED_TOTAL
            .with_label_values(&[outcome_label])
            .inc();
        if outcome.status == AttemptStatus::Completed {
            let trigger = if outcome.repaired { "implicit" } else { "choice" };
            ATTEMPTS_COMPLETED_TOTAL.with_label_values(&[trigger]).inc();
        }

        tracing::info!(
            "Attempt {}: choice {} earned {} XP, status {:?}",
            attempt.id,
            choice_id,
            outcome.xp_earned,
            outcome.status
        );

        Ok(SubmitChoiceResponse {
            status: outcome.status,
            consequence: outcome.consequence,
            xp_earned: outcome.xp_earned,
            total_xp_earned: attempt.total_xp_earned,
            next_step: outcome.next_step,
            achievements_unlocked,
        })
    }

    pub async fn completion_summary(
        &self,
        user_id: &str,
        attempt_id: &str,
    ) -> Result<CompletionSummary, CaseError> {
        let attempt = self.load_attempt(user_id, attempt_id).await?;
        let case = self.load_case_any(&attempt.case_id).await?;
        let performance_score = case_engine::score(&case, &attempt)?;

        CASE_PERFORMANCE_SCORE.observe(f64::from(performance_score));

        Ok(CompletionSummary {
            attempt_id: attempt.id,
            case_id: case.id.clone(),
            case_title: case.title.clone(),
            performance_score,
            total_xp_earned: attempt.total_xp_earned,
            max_possible_xp: case.max_possible_reward(),
            completed_at: attempt.completed_at,
            choices_made: attempt.choices_made,
        })
    }

    /// Active case lookup for starting new attempts.
    async fn load_case(&self, case_id: &str) -> Result<CaseDefinition, CaseError> {
        match self.load_case_any(case_id).await? {
            case if case.is_active => Ok(case),
            _ => Err(CaseError::NotFound(format!("case {}", case_id))),
        }
    }

    /// Existing attempts keep working after their case is deactivated.
    async fn load_case_any(&self, case_id: &str) -> Result<CaseDefinition, CaseError> {
        retry_reads(|| async { Ok(self.store.find_case(case_id).await?) })
            .await?
            .ok_or_else(|| CaseError::NotFound(format!("case {}", case_id)))
    }

    async fn load_attempt(&self, user_id: &str, attempt_id: &str) -> Result<CaseAttempt, CaseError> {
        let attempt = retry_reads(|| async { Ok(self.store.find_attempt(attempt_id).await?) })
            .await?;
        match attempt {
            Some(attempt) if attempt.user_id == user_id => Ok(attempt),
            _ => Err(CaseError::NotFound(format!("attempt {}", attempt_id))),
        }
    }

    async fn persist_repair(
        &self,
        attempt: &CaseAttempt,
        expected_step: u32,
    ) -> Result<(), CaseError> {
        let mut tx = self.store.begin().await?;
        if !tx.update_attempt(attempt, expected_step).await? {
            tracing::debug!("Attempt {} changed before repair was saved", attempt.id);
            return Err(CaseError::StepMismatch {
                expected: expected_step,
            });
        }
        tx.commit().await?;
        ATTEMPTS_COMPLETED_TOTAL
            .with_label_values(&["implicit"])
            .inc();
        Ok(())
    }

    async fn cached_response(&self, cache_key: &str) -> Option<SubmitChoiceResponse> {
        let mut conn = self.redis.clone()?;
        let lookup = track_cache_operation("get", async {
            let cached: Option<String> = redis::cmd("GET")
                .arg(cache_key)
                .query_async(&mut conn)
                .await
                .context("Failed to check idempotency cache")?;
            cached
                .map(|json| {
                    serde_json::from_str(&json).context("Failed to decode cached response")
                })
                .transpose()
        })
        .await;

        match lookup {
            Ok(cached) => cached,
            Err(err) => {
                tracing::warn!("Idempotency lookup failed, processing request: {:#}", err);
                None
            }
        }
    }

    async fn cache_response(&self, cache_key: &str, response: &SubmitChoiceResponse) {
        let Some(mut conn) = self.redis.clone() else {
            return;
        };
        let ttl = self.idempotency_ttl_seconds;
        let stored = track_cache_operation("setex", async {
            let json = serde_json::to_string(response).context("Failed to encode response")?;
            redis::cmd("SETEX")
                .arg(cache_key)
                .arg(ttl)
                .arg(json)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to cache response")
        })
        .await;

        if let Err(err) = stored {
            tracing::warn!("Failed to cache idempotent response: {:#}", err);
        }
    }
}

/// Retries store reads on storage failures only.
async fn retry_reads<F, Fut, T>(f: F) -> Result<T, CaseError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, CaseError>>,
{
    retry_if(RetryConfig::default(), f, |err| {
        matches!(err, CaseError::Storage(_))
    })
    .await
}
