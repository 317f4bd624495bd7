use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    #[serde(rename = "_id")]
    pub user_id: String,
    pub total_xp: i64,
    pub cases_completed: u32,
    #[serde(with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

impl StudentProfile {
    pub fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            total_xp: 0,
            cases_completed: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Level arithmetic: every `xp_per_level` points is one level, starting at 1.
pub fn level_for_xp(total_xp: i64, xp_per_level: i64) -> u32 {
    let xp_per_level = xp_per_level.max(1);
    (total_xp.max(0) / xp_per_level) as u32 + 1
}

pub fn level_progress_percent(total_xp: i64, xp_per_level: i64) -> u32 {
    let xp_per_level = xp_per_level.max(1);
    ((total_xp.max(0) % xp_per_level) * 100 / xp_per_level) as u32
}

pub fn xp_to_next_level(total_xp: i64, xp_per_level: i64) -> i64 {
    let xp_per_level = xp_per_level.max(1);
    xp_per_level - total_xp.max(0) % xp_per_level
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementType {
    CaseMaster,
    FirstCase,
    LevelUp,
}

impl AchievementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AchievementType::CaseMaster => "case_master",
            AchievementType::FirstCase => "first_case",
            AchievementType::LevelUp => "level_up",
        }
    }
}

/// Unique per `(user_id, achievement_type)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub user_id: String,
    pub achievement_type: AchievementType,
    pub title: String,
    pub description: String,
    pub xp_reward: u32,
    #[serde(with = "bson_datetime_as_chrono")]
    pub earned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    CaseCompleted,
    AchievementEarned,
    LevelUp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub kind: ActivityKind,
    pub title: String,
    pub description: String,
    pub xp_earned: i64,
    #[serde(with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn new(
        user_id: &str,
        kind: ActivityKind,
        title: impl Into<String>,
        description: impl Into<String>,
        xp_earned: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind,
            title: title.into(),
            description: description.into(),
            xp_earned,
            created_at: now,
        }
    }
}

// Stored timestamps are native BSON dates so Mongo sorts them chronologically
pub(super) mod bson_datetime_as_chrono {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        bson::DateTime::from_millis(date.timestamp_millis()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = bson::DateTime::deserialize(deserializer)?.timestamp_millis();
        DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| D::Error::custom(format!("timestamp {} out of range", millis)))
    }
}

pub(super) mod bson_datetime_as_chrono_option {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(date) => {
                serializer.serialize_some(&bson::DateTime::from_millis(date.timestamp_millis()))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<bson::DateTime>::deserialize(deserializer)?
            .map(|date| {
                let millis = date.timestamp_millis();
                DateTime::from_timestamp_millis(millis)
                    .ok_or_else(|| D::Error::custom(format!("timestamp {} out of range", millis)))
            })
            .transpose()
    }
}

/// Totals before and after one `add_reward` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardReceipt {
    pub previous_total: i64,
    pub new_total: i64,
}

// API views

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub user_id: String,
    pub total_xp: i64,
    pub level: u32,
    pub level_progress: u32,
    pub xp_to_next_level: i64,
    pub cases_completed: u32,
    pub rank: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u64,
    pub user_id: String,
    pub total_xp: i64,
    pub level: u32,
    pub cases_completed: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaderboardResponse {
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AchievementView {
    pub achievement_type: AchievementType,
    pub title: String,
    pub description: String,
    pub xp_reward: u32,
    pub earned_at: DateTime<Utc>,
}

impl From<Achievement> for AchievementView {
    fn from(achievement: Achievement) -> Self {
        Self {
            achievement_type: achievement.achievement_type,
            title: achievement.title,
            description: achievement.description,
            xp_reward: achievement.xp_reward,
            earned_at: achievement.earned_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActivityView {
    pub id: String,
    pub kind: ActivityKind,
    pub title: String,
    pub description: String,
    pub xp_earned: i64,
    pub created_at: DateTime<Utc>,
}

impl From<Activity> for ActivityView {
    fn from(activity: Activity) -> Self {
        Self {
            id: activity.id,
            kind: activity.kind,
            title: activity.title,
            description: activity.description,
            xp_earned: activity.xp_earned,
            created_at: activity.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AchievementsResponse {
    pub achievements: Vec<AchievementView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActivitiesResponse {
    pub activities: Vec<ActivityView>,
}
