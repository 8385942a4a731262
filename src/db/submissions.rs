//! Submission record database operations

use sqlx::SqlitePool;

use super::models::{parse_timestamp, SubmissionRow};
use super::{refs, users, StoreError};
use crate::domain::SubmissionRecord;

pub async fn put_submission(
    pool: &SqlitePool,
    record: &SubmissionRecord,
) -> Result<SubmissionRecord, StoreError> {
    if record.head_ref.id == 0 || record.base_ref.id == 0 {
        return Err(StoreError::Invalid("submission refs were not saved".to_string()));
    }

    let user_id = record.user.as_ref().map(|u| u.id).filter(|id| *id != 0);

    let result = sqlx::query(
        r#"
        INSERT INTO submissions (ticket_id, user_id, head_ref_id, base_ref_id, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.ticket_id)
    .bind(user_id)
    .bind(record.head_ref.id)
    .bind(record.base_ref.id)
    .bind(record.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    let mut saved = record.clone();
    saved.id = result.last_insert_rowid();
    Ok(saved)
}

pub async fn get_submission(pool: &SqlitePool, id: i64) -> Result<SubmissionRecord, StoreError> {
    let row = sqlx::query_as::<_, SubmissionRow>(
        "SELECT id, ticket_id, user_id, head_ref_id, base_ref_id, created_at FROM submissions WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("submission id {}", id)))?;

    let user = match row.user_id {
        Some(user_id) => users::get_user_by_id(pool, user_id).await?,
        None => None,
    };

    Ok(SubmissionRecord {
        id: row.id,
        ticket_id: row.ticket_id,
        user,
        head_ref: refs::get_ref_by_id(pool, row.head_ref_id).await?,
        base_ref: refs::get_ref_by_id(pool, row.base_ref_id).await?,
        created_at: parse_timestamp(&row.created_at),
    })
}
