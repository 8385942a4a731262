//! Database module - SQLite with sqlx, plus an in-memory store
//!
//! The scheduler depends only on the [`Store`] trait. [`SqliteStore`] backs
//! it with free functions over an `SqlitePool`; [`MemoryStore`] keeps
//! everything in process.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{HostRepository, QueueItem, Ref, Repository, SubmissionRecord, Task, User};

mod memory;
mod models;
mod pool;
mod queue;
mod refs;
mod repositories;
mod sqlite;
mod submissions;
mod tasks;
mod users;

pub use memory::MemoryStore;
pub use pool::*;
pub use sqlite::SqliteStore;

/// Errors returned by store implementations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid record: {0}")]
    Invalid(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    /// Map a unique-constraint violation to `AlreadyExists`
    pub(crate) fn from_insert(err: sqlx::Error, what: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::AlreadyExists(what.into())
            }
            _ => StoreError::Database(err),
        }
    }
}

/// Persistence the scheduler and queue boundary rely on
#[async_trait]
pub trait Store: Send + Sync {
    /// Repository by `owner/name`
    async fn get_repository(&self, name: &str) -> Result<Repository, StoreError>;

    /// Create records for host repositories owned by `owner`.
    ///
    /// Repositories that already exist are left untouched; new ones start
    /// disabled.
    async fn put_repositories(
        &self,
        owner: &str,
        repos: &[HostRepository],
        auto_created: bool,
    ) -> Result<(), StoreError>;

    async fn get_user(&self, username: &str) -> Result<User, StoreError>;

    async fn get_ref_by_name_and_sha(&self, repo_name: &str, sha: &str) -> Result<Ref, StoreError>;

    /// Insert a ref; `AlreadyExists` if the (repository, sha) pair is taken
    async fn put_ref(&self, git_ref: &Ref) -> Result<i64, StoreError>;

    async fn put_submission(&self, record: &SubmissionRecord) -> Result<SubmissionRecord, StoreError>;

    async fn put_task(&self, task: &Task) -> Result<Task, StoreError>;

    /// Persist runs and enqueue them; returns the items with ids assigned
    async fn put_queue(&self, items: &[QueueItem]) -> Result<Vec<QueueItem>, StoreError>;

    /// Cancel unfinished work for a branch; a no-op for the default branch
    async fn cancel_ref_by_name(&self, repo_id: i64, ref_name: &str) -> Result<(), StoreError>;

    async fn cancel_tasks(&self, task_ids: &[i64]) -> Result<(), StoreError>;

    /// Claim the oldest waiting item on a queue
    async fn next_queue_item(&self, queue_name: &str, running_on: &str)
        -> Result<QueueItem, StoreError>;
}

/// True if `ref_name` is the repository's default branch
pub(crate) fn is_default_branch(repo: &Repository, ref_name: &str) -> bool {
    repo.host.main_branch() == ref_name
}
