//! SQLite-backed store

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::{queue, refs, repositories, submissions, tasks, users, Store, StoreError};
use crate::domain::{HostRepository, QueueItem, Ref, Repository, SubmissionRecord, Task, User};

/// [`Store`] over an sqlx SQLite pool
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) and migrate the database at `path`
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        Ok(Self::new(super::init_database(path).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create a user or replace its token
    pub async fn put_user(&self, user: &User) -> Result<User, StoreError> {
        users::put_user(&self.pool, user).await
    }

    /// Persist a repository owned by `owner` and enable it
    pub async fn enable_repository(
        &self,
        host: &HostRepository,
        owner: &str,
    ) -> Result<Repository, StoreError> {
        repositories::enable_repository(&self.pool, host, owner).await
    }

    pub async fn get_task(&self, id: i64) -> Result<Task, StoreError> {
        tasks::get_task(&self.pool, id).await
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_repository(&self, name: &str) -> Result<Repository, StoreError> {
        repositories::get_repository(&self.pool, name).await
    }

    async fn put_repositories(
        &self,
        owner: &str,
        repos: &[HostRepository],
        auto_created: bool,
    ) -> Result<(), StoreError> {
        repositories::put_repositories(&self.pool, owner, repos, auto_created).await
    }

    async fn get_user(&self, username: &str) -> Result<User, StoreError> {
        users::get_user(&self.pool, username).await
    }

    async fn get_ref_by_name_and_sha(&self, repo_name: &str, sha: &str) -> Result<Ref, StoreError> {
        refs::get_ref_by_name_and_sha(&self.pool, repo_name, sha).await
    }

    async fn put_ref(&self, git_ref: &Ref) -> Result<i64, StoreError> {
        refs::put_ref(&self.pool, git_ref).await
    }

    async fn put_submission(&self, record: &SubmissionRecord) -> Result<SubmissionRecord, StoreError> {
        submissions::put_submission(&self.pool, record).await
    }

    async fn put_task(&self, task: &Task) -> Result<Task, StoreError> {
        tasks::put_task(&self.pool, task).await
    }

    async fn put_queue(&self, items: &[QueueItem]) -> Result<Vec<QueueItem>, StoreError> {
        queue::put_queue(&self.pool, items).await
    }

    async fn cancel_ref_by_name(&self, repo_id: i64, ref_name: &str) -> Result<(), StoreError> {
        tasks::cancel_ref_by_name(&self.pool, repo_id, ref_name).await
    }

    async fn cancel_tasks(&self, task_ids: &[i64]) -> Result<(), StoreError> {
        tasks::cancel_tasks(&self.pool, task_ids).await
    }

    async fn next_queue_item(
        &self,
        queue_name: &str,
        running_on: &str,
    ) -> Result<QueueItem, StoreError> {
        queue::next_queue_item(&self.pool, queue_name, running_on).await
    }
}
