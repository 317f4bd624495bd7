use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::attempt::CaseAttempt;
use crate::models::case::CaseDefinition;
use crate::models::profile::{Achievement, Activity, RewardReceipt, StudentProfile};

use super::case_store::{CaseStore, CaseTransaction, ProfileSink, ProfileStore, WriteConflict};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    cases: HashMap<String, CaseDefinition>,
    attempts: HashMap<String, CaseAttempt>,
    profiles: HashMap<String, StudentProfile>,
    achievements: Vec<Achievement>,
    activities: Vec<Activity>,
}

/// Process-local store.
///
/// A transaction holds the state lock until it is committed or dropped and
/// works on a copy, so transactions are serialised and all-or-nothing.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_profile_writes: Arc<AtomicBool>,
    pending_conflicts: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_cases(cases: Vec<CaseDefinition>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock().await;
            for case in cases {
                state.cases.insert(case.id.clone(), case);
            }
        }
        store
    }

    /// Makes every subsequent profile write inside a transaction fail.
    pub fn set_fail_profile_writes(&self, fail: bool) {
        self.fail_profile_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` achievement grants fail with [`WriteConflict`],
    /// as a concurrent Mongo transaction would.
    pub fn inject_write_conflicts(&self, count: usize) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    /// Removes a step from a stored case, as an author editing content would.
    pub async fn remove_step(&self, case_id: &str, step_number: u32) {
        let mut state = self.state.lock().await;
        if let Some(case) = state.cases.get_mut(case_id) {
            case.steps.retain(|step| step.number != step_number);
        }
    }
}

#[async_trait]
impl CaseStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn find_case(&self, case_id: &str) -> Result<Option<CaseDefinition>> {
        Ok(self.state.lock().await.cases.get(case_id).cloned())
    }

    async fn list_active_cases(&self) -> Result<Vec<CaseDefinition>> {
        let state = self.state.lock().await;
        let mut cases: Vec<CaseDefinition> = state
            .cases
            .values()
            .filter(|case| case.is_active)
            .cloned()
            .collect();
        cases.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(cases)
    }

    async fn upsert_case(&self, case: &CaseDefinition) -> Result<()> {
        self.state
            .lock()
            .await
            .cases
            .insert(case.id.clone(), case.clone());
        Ok(())
    }

    async fn insert_attempt(&self, attempt: &CaseAttempt) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.attempts.contains_key(&attempt.id) {
            bail!("Attempt {} already exists", attempt.id);
        }
        state.attempts.insert(attempt.id.clone(), attempt.clone());
        Ok(())
    }

    async fn find_attempt(&self, attempt_id: &str) -> Result<Option<CaseAttempt>> {
        Ok(self.state.lock().await.attempts.get(attempt_id).cloned())
    }

    async fn completed_case_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        let mut ids: Vec<String> = state
            .attempts
            .values()
            .filter(|attempt| attempt.user_id == user_id && attempt.completed)
            .map(|attempt| attempt.case_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn begin(&self) -> Result<Box<dyn CaseTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            fail_profile_writes: self.fail_profile_writes.load(Ordering::SeqCst),
            pending_conflicts: self.pending_conflicts.clone(),
        }))
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn find_profile(&self, user_id: &str) -> Result<Option<StudentProfile>> {
        Ok(self.state.lock().await.profiles.get(user_id).cloned())
    }

    async fn count_profiles_above(&self, total_xp: i64) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state
            .profiles
            .values()
            .filter(|profile| profile.total_xp > total_xp)
            .count() as u64)
    }

    async fn top_profiles(&self, limit: usize) -> Result<Vec<StudentProfile>> {
        let state = self.state.lock().await;
        let mut profiles: Vec<StudentProfile> = state.profiles.values().cloned().collect();
        profiles.sort_by(|a, b| {
            b.total_xp
                .cmp(&a.total_xp)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        profiles.truncate(limit);
        Ok(profiles)
    }

    async fn list_achievements(&self, user_id: &str) -> Result<Vec<Achievement>> {
        let state = self.state.lock().await;
        Ok(state
            .achievements
            .iter()
            .rev()
            .filter(|achievement| achievement.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn recent_activities(&self, user_id: &str, limit: usize) -> Result<Vec<Activity>> {
        let state = self.state.lock().await;
        Ok(state
            .activities
            .iter()
            .rev()
            .filter(|activity| activity.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail_profile_writes: bool,
    pending_conflicts: Arc<AtomicUsize>,
}

impl MemoryTransaction {
    fn ensure_writable(&self) -> Result<()> {
        if self.fail_profile_writes {
            bail!("Profile store unavailable");
        }
        Ok(())
    }

    fn profile_mut(&mut self, user_id: &str) -> &mut StudentProfile {
        self.working
            .profiles
            .entry(user_id.to_string())
            .or_insert_with(|| StudentProfile::new(user_id, Utc::now()))
    }
}

#[async_trait]
impl ProfileSink for MemoryTransaction {
    async fn add_reward(&mut self, user_id: &str, amount: i64) -> Result<RewardReceipt> {
        self.ensure_writable()?;
        let profile = self.profile_mut(user_id);
        let previous_total = profile.total_xp;
        profile.total_xp += amount;
        profile.updated_at = Utc::now();
        Ok(RewardReceipt {
            previous_total,
            new_total: profile.total_xp,
        })
    }

    async fn increment_cases_completed(&mut self, user_id: &str) -> Result<u32> {
        self.ensure_writable()?;
        let profile = self.profile_mut(user_id);
        profile.cases_completed += 1;
        profile.updated_at = Utc::now();
        Ok(profile.cases_completed)
    }

    async fn record_activity(&mut self, activity: &Activity) -> Result<()> {
        self.ensure_writable()?;
        self.working.activities.push(activity.clone());
        Ok(())
    }

    async fn grant_achievement_if_absent(&mut self, achievement: &Achievement) -> Result<bool> {
        self.ensure_writable()?;
        let conflicted = self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if conflicted {
            return Err(WriteConflict(format!(
                "achievement {} for {}",
                achievement.achievement_type.as_str(),
                achievement.user_id
            ))
            .into());
        }
        let exists = self.working.achievements.iter().any(|existing| {
            existing.user_id == achievement.user_id
                && existing.achievement_type == achievement.achievement_type
        });
        if exists {
            return Ok(false);
        }
        self.working.achievements.push(achievement.clone());
        Ok(true)
    }
}

#[async_trait]
impl CaseTransaction for MemoryTransaction {
    async fn update_attempt(&mut self, attempt: &CaseAttempt, expected_step: u32) -> Result<bool> {
        match self.working.attempts.get_mut(&attempt.id) {
            Some(stored) if !stored.completed && stored.current_step == expected_step => {
                *stored = attempt.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => bail!("Attempt {} not found", attempt.id),
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }
}
