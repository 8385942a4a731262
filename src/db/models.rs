//! Database row models for SQLx

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// User row from database
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub token_json: Option<String>,
}

/// Repository row from database
#[derive(Debug, Clone, FromRow)]
pub struct RepositoryRow {
    pub id: i64,
    pub name: String,
    pub owner_id: Option<i64>,
    pub disabled: i32, // Boolean as integer
    pub private: i32,
    pub auto_created: i32,
    pub host_json: String,
}

/// Ref row from database
#[derive(Debug, Clone, FromRow)]
pub struct RefRow {
    pub id: i64,
    pub repository_id: i64,
    pub ref_name: String,
    pub sha: String,
}

/// Submission row from database
#[derive(Debug, Clone, FromRow)]
pub struct SubmissionRow {
    pub id: i64,
    pub ticket_id: i64,
    pub user_id: Option<i64>,
    pub head_ref_id: i64,
    pub base_ref_id: i64,
    pub created_at: String,
}

/// Task row from database
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: i64,
    pub submission_id: i64,
    pub path: String,
    pub base_sha: String,
    pub settings_json: String, // JSON TaskSettings
    pub canceled: i32,
    pub created_at: String,
}

/// Run row from database
#[derive(Debug, Clone, FromRow)]
pub struct RunRow {
    pub id: i64,
    pub task_id: i64,
    pub name: String,
    pub settings_json: String, // JSON RunSettings
    pub created_at: String,
}

/// Queue item row from database
#[derive(Debug, Clone, FromRow)]
pub struct QueueItemRow {
    pub id: i64,
    pub run_id: i64,
    pub queue_name: String,
    pub running: i32,
    pub running_on: Option<String>,
    pub started_at: Option<String>,
}

pub fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
