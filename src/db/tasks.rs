//! Task and run database operations

use sqlx::SqlitePool;

use super::models::{parse_timestamp, RunRow, TaskRow};
use super::{is_default_branch, repositories, submissions, StoreError};
use crate::domain::{Run, SubmissionRecord, Task};

impl TaskRow {
    pub fn to_task(&self, submission: SubmissionRecord) -> Result<Task, StoreError> {
        Ok(Task {
            id: self.id,
            path: self.path.clone(),
            base_sha: self.base_sha.clone(),
            settings: serde_json::from_str(&self.settings_json)?,
            canceled: self.canceled != 0,
            created_at: parse_timestamp(&self.created_at),
            submission,
        })
    }
}

impl RunRow {
    pub fn to_run(&self, task: Task) -> Result<Run, StoreError> {
        Ok(Run {
            id: self.id,
            name: self.name.clone(),
            settings: serde_json::from_str(&self.settings_json)?,
            task,
            created_at: parse_timestamp(&self.created_at),
        })
    }
}

pub async fn put_task(pool: &SqlitePool, task: &Task) -> Result<Task, StoreError> {
    if task.submission.id == 0 {
        return Err(StoreError::Invalid("task submission was not saved".to_string()));
    }

    let result = sqlx::query(
        r#"
        INSERT INTO tasks (submission_id, path, base_sha, settings_json, canceled, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(task.submission.id)
    .bind(&task.path)
    .bind(&task.base_sha)
    .bind(serde_json::to_string(&task.settings)?)
    .bind(task.canceled as i32)
    .bind(task.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    let mut saved = task.clone();
    saved.id = result.last_insert_rowid();
    Ok(saved)
}

pub async fn get_task(pool: &SqlitePool, id: i64) -> Result<Task, StoreError> {
    let row = sqlx::query_as::<_, TaskRow>(
        "SELECT id, submission_id, path, base_sha, settings_json, canceled, created_at FROM tasks WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("task id {}", id)))?;

    let submission = submissions::get_submission(pool, row.submission_id).await?;
    row.to_task(submission)
}

pub async fn get_run(pool: &SqlitePool, id: i64) -> Result<Run, StoreError> {
    let row = sqlx::query_as::<_, RunRow>(
        "SELECT id, task_id, name, settings_json, created_at FROM runs WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("run id {}", id)))?;

    let task = get_task(pool, row.task_id).await?;
    row.to_run(task)
}

/// Cancel tasks and their unfinished runs, dropping unclaimed queue items
pub async fn cancel_tasks(pool: &SqlitePool, task_ids: &[i64]) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;

    for id in task_ids {
        sqlx::query("UPDATE tasks SET canceled = 1 WHERE id = ? AND finished_at IS NULL")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE runs SET canceled = 1 WHERE task_id = ? AND finished_at IS NULL")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            DELETE FROM queue_items
            WHERE running = 0 AND run_id IN (SELECT id FROM runs WHERE task_id = ?)
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Cancel every unfinished task built for a branch of a repository.
///
/// Matches on the ref name only: an amend or a new commit changes the SHA
/// but keeps the branch.
pub async fn cancel_ref_by_name(
    pool: &SqlitePool,
    repo_id: i64,
    ref_name: &str,
) -> Result<(), StoreError> {
    let repo = repositories::get_repository_by_id(pool, repo_id).await?;
    if is_default_branch(&repo, ref_name) {
        return Ok(());
    }

    let ids: Vec<(i64,)> = sqlx::query_as(
        r#"
        SELECT tasks.id FROM tasks
        INNER JOIN submissions ON submissions.id = tasks.submission_id
        INNER JOIN refs ON refs.id = submissions.head_ref_id
        WHERE refs.ref_name = ? AND refs.repository_id = ?
          AND tasks.canceled = 0 AND tasks.finished_at IS NULL
        "#,
    )
    .bind(ref_name)
    .bind(repo_id)
    .fetch_all(pool)
    .await?;

    let ids: Vec<i64> = ids.into_iter().map(|(id,)| id).collect();
    if ids.is_empty() {
        return Ok(());
    }

    tracing::debug!(repo_id, ref_name, count = ids.len(), "Canceling tasks for ref");
    cancel_tasks(pool, &ids).await
}
