//! Queue database operations

use chrono::Utc;
use sqlx::SqlitePool;

use super::models::{parse_timestamp, QueueItemRow};
use super::{tasks, StoreError};
use crate::domain::{QueueItem, Run};

impl QueueItemRow {
    pub fn to_queue_item(&self, run: Run) -> QueueItem {
        QueueItem {
            id: self.id,
            queue_name: self.queue_name.clone(),
            run,
            running: self.running != 0,
            running_on: self.running_on.clone(),
            started_at: self.started_at.as_deref().map(parse_timestamp),
        }
    }
}

/// Insert each item's run and enqueue it, all or nothing
pub async fn put_queue(pool: &SqlitePool, items: &[QueueItem]) -> Result<Vec<QueueItem>, StoreError> {
    let mut tx = pool.begin().await?;
    let mut saved = Vec::with_capacity(items.len());

    for item in items {
        if item.run.task.id == 0 {
            return Err(StoreError::Invalid(format!(
                "run {:?} belongs to an unsaved task",
                item.run.name
            )));
        }

        let run_id = sqlx::query(
            r#"
            INSERT INTO runs (task_id, name, settings_json, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(item.run.task.id)
        .bind(&item.run.name)
        .bind(serde_json::to_string(&item.run.settings)?)
        .bind(item.run.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let item_id = sqlx::query("INSERT INTO queue_items (run_id, queue_name) VALUES (?, ?)")
            .bind(run_id)
            .bind(&item.queue_name)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::from_insert(e, format!("queue item for run {}", run_id)))?
            .last_insert_rowid();

        let mut item = item.clone();
        item.id = item_id;
        item.run.id = run_id;
        saved.push(item);
    }

    tx.commit().await?;
    Ok(saved)
}

/// Claim the oldest waiting, uncanceled item on a queue
pub async fn next_queue_item(
    pool: &SqlitePool,
    queue_name: &str,
    running_on: &str,
) -> Result<QueueItem, StoreError> {
    let row = sqlx::query_as::<_, QueueItemRow>(
        r#"
        UPDATE queue_items SET running = 1, running_on = ?, started_at = ?
        WHERE id = (
            SELECT queue_items.id FROM queue_items
            INNER JOIN runs ON runs.id = queue_items.run_id
            INNER JOIN tasks ON tasks.id = runs.task_id
            WHERE queue_items.queue_name = ? AND queue_items.running = 0
              AND runs.canceled = 0 AND tasks.canceled = 0
            ORDER BY queue_items.id
            LIMIT 1
        )
        RETURNING id, run_id, queue_name, running, running_on, started_at
        "#,
    )
    .bind(running_on)
    .bind(Utc::now().to_rfc3339())
    .bind(queue_name)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("no items on queue {:?}", queue_name)))?;

    let run = tasks::get_run(pool, row.run_id).await?;
    Ok(row.to_queue_item(run))
}
