//! Storage seams for cases, attempts and the learner profile.
//!
//! `MongoStore` is the production implementation; `MemoryStore` backs tests
//! and local runs without a database.

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::models::attempt::CaseAttempt;
use crate::models::case::CaseDefinition;
use crate::models::profile::{Achievement, Activity, RewardReceipt, StudentProfile};

/// A concurrent transaction wrote the same documents first. Everything in
/// the failed unit of work was discarded; it can be rerun from a fresh read.
#[derive(Debug, Error)]
#[error("write conflict: {0}")]
pub struct WriteConflict(pub String);

/// Receives the profile side effects of case progression.
#[async_trait]
pub trait ProfileSink: Send {
    async fn add_reward(&mut self, user_id: &str, amount: i64) -> Result<RewardReceipt>;

    /// Returns the new completion count.
    async fn increment_cases_completed(&mut self, user_id: &str) -> Result<u32>;

    async fn record_activity(&mut self, activity: &Activity) -> Result<()>;

    /// Inserts the achievement unless the user already holds one of the same
    /// type. Returns whether a record was created.
    async fn grant_achievement_if_absent(&mut self, achievement: &Achievement) -> Result<bool>;
}

/// One unit of work. Dropping it without `commit` discards every write.
#[async_trait]
pub trait CaseTransaction: ProfileSink {
    /// Replaces the stored attempt if it is still active at `expected_step`.
    /// Returns false when another writer got there first.
    async fn update_attempt(&mut self, attempt: &CaseAttempt, expected_step: u32) -> Result<bool>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait CaseStore: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn find_case(&self, case_id: &str) -> Result<Option<CaseDefinition>>;

    async fn list_active_cases(&self) -> Result<Vec<CaseDefinition>>;

    async fn upsert_case(&self, case: &CaseDefinition) -> Result<()>;

    async fn insert_attempt(&self, attempt: &CaseAttempt) -> Result<()>;

    async fn find_attempt(&self, attempt_id: &str) -> Result<Option<CaseAttempt>>;

    async fn completed_case_ids(&self, user_id: &str) -> Result<Vec<String>>;

    async fn begin(&self) -> Result<Box<dyn CaseTransaction>>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_profile(&self, user_id: &str) -> Result<Option<StudentProfile>>;

    async fn count_profiles_above(&self, total_xp: i64) -> Result<u64>;

    /// Highest XP first.
    async fn top_profiles(&self, limit: usize) -> Result<Vec<StudentProfile>>;

    /// Newest first.
    async fn list_achievements(&self, user_id: &str) -> Result<Vec<Achievement>>;

    /// Newest first.
    async fn recent_activities(&self, user_id: &str, limit: usize) -> Result<Vec<Activity>>;
}

pub trait Store: CaseStore + ProfileStore {}

impl<T: CaseStore + ProfileStore> Store for T {}
