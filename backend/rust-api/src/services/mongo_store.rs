use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Client, ClientSession, Collection, Database, IndexModel};

use crate::metrics::track_db_operation;
use crate::models::attempt::CaseAttempt;
use crate::models::case::CaseDefinition;
use crate::models::profile::{Achievement, Activity, RewardReceipt, StudentProfile};

use super::case_store::{CaseStore, CaseTransaction, ProfileSink, ProfileStore, WriteConflict};

const CASES: &str = "cases";
const ATTEMPTS: &str = "case_attempts";
const PROFILES: &str = "student_profiles";
const ACHIEVEMENTS: &str = "achievements";
const ACTIVITIES: &str = "activities";

const DUPLICATE_KEY: i32 = 11000;

/// Maps errors from writes inside a transaction. Duplicate keys and
/// transient transaction errors mean another writer got there first.
fn transaction_error(err: mongodb::error::Error, context: &'static str) -> anyhow::Error {
    let duplicate_key = matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref write_error))
            if write_error.code == DUPLICATE_KEY
    );
    if duplicate_key || err.contains_label(TRANSIENT_TRANSACTION_ERROR) {
        return WriteConflict(format!("{}: {}", context, err)).into();
    }
    anyhow::Error::new(err).context(context)
}

/// MongoDB-backed store. Transactions need a replica set deployment.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    pub fn new(client: Client, database: &str) -> Self {
        let db = client.database(database);
        Self { client, db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Creates the indexes the store relies on. Safe to call on every start.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let unique_achievement = IndexModel::builder()
            .keys(doc! { "user_id": 1, "achievement_type": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .name("user_achievement_unique".to_string())
                    .build(),
            )
            .build();
        self.db
            .collection::<Document>(ACHIEVEMENTS)
            .create_index(unique_achievement)
            .await
            .context("Failed to create achievements index")?;

        let attempts_by_user = IndexModel::builder()
            .keys(doc! { "user_id": 1, "case_id": 1, "completed": 1 })
            .build();
        self.db
            .collection::<Document>(ATTEMPTS)
            .create_index(attempts_by_user)
            .await
            .context("Failed to create case_attempts index")?;

        let leaderboard = IndexModel::builder().keys(doc! { "total_xp": -1 }).build();
        self.db
            .collection::<Document>(PROFILES)
            .create_index(leaderboard)
            .await
            .context("Failed to create student_profiles index")?;

        let activities_by_user = IndexModel::builder()
            .keys(doc! { "user_id": 1, "created_at": -1 })
            .build();
        self.db
            .collection::<Document>(ACTIVITIES)
            .create_index(activities_by_user)
            .await
            .context("Failed to create activities index")?;

        tracing::info!("MongoDB indexes ensured");
        Ok(())
    }

    fn cases(&self) -> Collection<CaseDefinition> {
        self.db.collection(CASES)
    }

    fn attempts(&self) -> Collection<CaseAttempt> {
        self.db.collection(ATTEMPTS)
    }

    fn profiles(&self) -> Collection<StudentProfile> {
        self.db.collection(PROFILES)
    }
}

#[async_trait]
impl CaseStore for MongoStore {
    async fn ping(&self) -> Result<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .context("MongoDB ping failed")?;
        Ok(())
    }

    async fn find_case(&self, case_id: &str) -> Result<Option<CaseDefinition>> {
        track_db_operation("find_one", CASES, async {
            self.cases()
                .find_one(doc! { "_id": case_id })
                .await
                .context("Failed to query cases collection")
        })
        .await
    }

    async fn list_active_cases(&self) -> Result<Vec<CaseDefinition>> {
        track_db_operation("find", CASES, async {
            let cursor = self
                .cases()
                .find(doc! { "is_active": true })
                .sort(doc! { "title": 1 })
                .await
                .context("Failed to query active cases")?;
            cursor
                .try_collect::<Vec<_>>()
                .await
                .context("Case cursor error")
        })
        .await
    }

    async fn upsert_case(&self, case: &CaseDefinition) -> Result<()> {
        track_db_operation("replace_one", CASES, async {
            self.cases()
                .replace_one(doc! { "_id": &case.id }, case)
                .upsert(true)
                .await
                .with_context(|| format!("Failed to upsert case {}", case.id))?;
            Ok(())
        })
        .await
    }

    async fn insert_attempt(&self, attempt: &CaseAttempt) -> Result<()> {
        track_db_operation("insert_one", ATTEMPTS, async {
            self.attempts()
                .insert_one(attempt)
                .await
                .context("Failed to insert case attempt")?;
            Ok(())
        })
        .await
    }

    async fn find_attempt(&self, attempt_id: &str) -> Result<Option<CaseAttempt>> {
        track_db_operation("find_one", ATTEMPTS, async {
            self.attempts()
                .find_one(doc! { "_id": attempt_id })
                .await
                .context("Failed to query case attempts")
        })
        .await
    }

    async fn completed_case_ids(&self, user_id: &str) -> Result<Vec<String>> {
        track_db_operation("distinct", ATTEMPTS, async {
            let values = self
                .attempts()
                .distinct("case_id", doc! { "user_id": user_id, "completed": true })
                .await
                .context("Failed to load completed case ids")?;
            Ok(values
                .into_iter()
                .filter_map(|value| match value {
                    Bson::String(id) => Some(id),
                    _ => None,
                })
                .collect())
        })
        .await
    }

    async fn begin(&self) -> Result<Box<dyn CaseTransaction>> {
        let mut session = self
            .client
            .start_session()
            .await
            .context("Failed to start MongoDB session")?;
        session
            .start_transaction()
            .await
            .context("Failed to start MongoDB transaction")?;
        Ok(Box::new(MongoTransaction {
            session,
            db: self.db.clone(),
        }))
    }
}

#[async_trait]
impl ProfileStore for MongoStore {
    async fn find_profile(&self, user_id: &str) -> Result<Option<StudentProfile>> {
        track_db_operation("find_one", PROFILES, async {
            self.profiles()
                .find_one(doc! { "_id": user_id })
                .await
                .context("Failed to query student profiles")
        })
        .await
    }

    async fn count_profiles_above(&self, total_xp: i64) -> Result<u64> {
        track_db_operation("count_documents", PROFILES, async {
            self.profiles()
                .count_documents(doc! { "total_xp": { "$gt": total_xp } })
                .await
                .context("Failed to count profiles")
        })
        .await
    }

    async fn top_profiles(&self, limit: usize) -> Result<Vec<StudentProfile>> {
        track_db_operation("find", PROFILES, async {
            let cursor = self
                .profiles()
                .find(doc! {})
                .sort(doc! { "total_xp": -1, "_id": 1 })
                .limit(limit as i64)
                .await
                .context("Failed to query leaderboard")?;
            cursor
                .try_collect::<Vec<_>>()
                .await
                .context("Leaderboard cursor error")
        })
        .await
    }

    async fn list_achievements(&self, user_id: &str) -> Result<Vec<Achievement>> {
        track_db_operation("find", ACHIEVEMENTS, async {
            let cursor = self
                .db
                .collection::<Achievement>(ACHIEVEMENTS)
                .find(doc! { "user_id": user_id })
                .sort(doc! { "earned_at": -1 })
                .await
                .context("Failed to query achievements")?;
            cursor
                .try_collect::<Vec<_>>()
                .await
                .context("Achievement cursor error")
        })
        .await
    }

    async fn recent_activities(&self, user_id: &str, limit: usize) -> Result<Vec<Activity>> {
        track_db_operation("find", ACTIVITIES, async {
            let cursor = self
                .db
                .collection::<Activity>(ACTIVITIES)
                .find(doc! { "user_id": user_id })
                .sort(doc! { "created_at": -1 })
                .limit(limit as i64)
                .await
                .context("Failed to query activities")?;
            cursor
                .try_collect::<Vec<_>>()
                .await
                .context("Activity cursor error")
        })
        .await
    }
}

/// Dropping an uncommitted session aborts its transaction server-side.
struct MongoTransaction {
    session: ClientSession,
    db: Database,
}

impl MongoTransaction {
    /// Matches the BSON dates the model converters write.
    fn now() -> bson::DateTime {
        bson::DateTime::now()
    }
}

#[async_trait]
impl ProfileSink for MongoTransaction {
    async fn add_reward(&mut self, user_id: &str, amount: i64) -> Result<RewardReceipt> {
        let now = Self::now();
        let profile = self
            .db
            .collection::<StudentProfile>(PROFILES)
            .find_one_and_update(
                doc! { "_id": user_id },
                doc! {
                    "$inc": { "total_xp": amount },
                    "$set": { "updated_at": now },
                    "$setOnInsert": { "cases_completed": 0, "created_at": now },
                },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .session(&mut self.session)
            .await
            .map_err(|err| transaction_error(err, "Failed to credit XP"))?
            .ok_or_else(|| anyhow!("Profile upsert for {} returned nothing", user_id))?;

        Ok(RewardReceipt {
            previous_total: profile.total_xp - amount,
            new_total: profile.total_xp,
        })
    }

    async fn increment_cases_completed(&mut self, user_id: &str) -> Result<u32> {
        let now = Self::now();
        let profile = self
            .db
            .collection::<StudentProfile>(PROFILES)
            .find_one_and_update(
                doc! { "_id": user_id },
                doc! {
                    "$inc": { "cases_completed": 1 },
                    "$set": { "updated_at": now },
                    "$setOnInsert": { "total_xp": 0_i64, "created_at": now },
                },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .session(&mut self.session)
            .await
            .map_err(|err| transaction_error(err, "Failed to increment completed cases"))?
            .ok_or_else(|| anyhow!("Profile upsert for {} returned nothing", user_id))?;

        Ok(profile.cases_completed)
    }

    async fn record_activity(&mut self, activity: &Activity) -> Result<()> {
        self.db
            .collection::<Activity>(ACTIVITIES)
            .insert_one(activity)
            .session(&mut self.session)
            .await
            .map_err(|err| transaction_error(err, "Failed to record activity"))?;
        Ok(())
    }

    async fn grant_achievement_if_absent(&mut self, achievement: &Achievement) -> Result<bool> {
        // Insert-if-absent. A racing grant for the same user surfaces as a
        // duplicate key and aborts the transaction, so it maps to WriteConflict.
        let result = self
            .db
            .collection::<Achievement>(ACHIEVEMENTS)
            .update_one(
                doc! {
                    "user_id": &achievement.user_id,
                    "achievement_type": achievement.achievement_type.as_str(),
                },
                doc! {
                    "$setOnInsert": {
                        "title": &achievement.title,
                        "description": &achievement.description,
                        "xp_reward": i64::from(achievement.xp_reward),
                        "earned_at": bson::DateTime::from_millis(
                            achievement.earned_at.timestamp_millis(),
                        ),
                    }
                },
            )
            .upsert(true)
            .session(&mut self.session)
            .await
            .map_err(|err| transaction_error(err, "Failed to grant achievement"))?;

        Ok(result.upserted_id.is_some())
    }
}

#[async_trait]
impl CaseTransaction for MongoTransaction {
    async fn update_attempt(&mut self, attempt: &CaseAttempt, expected_step: u32) -> Result<bool> {
        let result = self
            .db
            .collection::<CaseAttempt>(ATTEMPTS)
            .replace_one(
                doc! {
                    "_id": &attempt.id,
                    "current_step": i64::from(expected_step),
                    "completed": false,
                },
                attempt,
            )
            .session(&mut self.session)
            .await
            .map_err(|err| transaction_error(err, "Failed to update case attempt"))?;

        Ok(result.matched_count == 1)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.session
            .commit_transaction()
            .await
            .map_err(|err| transaction_error(err, "Failed to commit transaction"))?;
        Ok(())
    }
}
