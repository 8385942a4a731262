//! In-memory store
//!
//! Not durable. Keeps the same uniqueness rules as the SQLite schema so the
//! scheduler's conflict handling behaves identically against it.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{is_default_branch, Store, StoreError};
use crate::domain::{HostRepository, QueueItem, Ref, Repository, SubmissionRecord, Task, User};

#[derive(Default)]
struct Inner {
    next_id: i64,
    users: BTreeMap<String, User>,
    repositories: BTreeMap<String, Repository>,
    refs: Vec<Ref>,
    submissions: Vec<SubmissionRecord>,
    tasks: BTreeMap<i64, Task>,
    canceled_runs: HashSet<i64>,
    queue: Vec<QueueItem>,
    put_ref_calls: usize,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn cancel_tasks(&mut self, task_ids: &[i64]) {
        for id in task_ids {
            if let Some(task) = self.tasks.get_mut(id) {
                task.canceled = true;
            }
        }

        let runs: Vec<i64> = self
            .queue
            .iter()
            .filter(|qi| task_ids.contains(&qi.run.task.id))
            .map(|qi| qi.run.id)
            .collect();
        self.canceled_runs.extend(runs);

        self.queue
            .retain(|qi| qi.running || !task_ids.contains(&qi.run.task.id));
    }
}

/// [`Store`] kept entirely in process memory
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create or replace a user
    pub fn add_user(&self, user: User) -> User {
        let mut inner = self.lock();
        let mut user = user;
        let existing = inner.users.get(&user.username).map(|u| u.id);
        user.id = match existing {
            Some(id) => id,
            None => inner.next_id(),
        };
        inner.users.insert(user.username.clone(), user.clone());
        user
    }

    /// Register a repository directly, bypassing `put_repositories`
    pub fn add_repository(
        &self,
        host: HostRepository,
        owner: Option<&str>,
        disabled: bool,
    ) -> Repository {
        let mut inner = self.lock();
        let owner = owner.and_then(|name| inner.users.get(name).cloned());
        let mut repo = Repository::from_host(&host, owner, false);
        repo.disabled = disabled;
        repo.id = inner.next_id();
        inner.repositories.insert(repo.name.clone(), repo.clone());
        repo
    }

    pub fn repositories(&self) -> Vec<Repository> {
        self.lock().repositories.values().cloned().collect()
    }

    pub fn refs(&self) -> Vec<Ref> {
        self.lock().refs.clone()
    }

    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.lock().submissions.clone()
    }

    /// Persisted tasks in insertion order
    pub fn tasks(&self) -> Vec<Task> {
        self.lock().tasks.values().cloned().collect()
    }

    /// Waiting and claimed queue items in insertion order
    pub fn queue_items(&self) -> Vec<QueueItem> {
        self.lock().queue.clone()
    }

    /// Number of `put_ref` calls, successful or not
    pub fn put_ref_calls(&self) -> usize {
        self.lock().put_ref_calls
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_repository(&self, name: &str) -> Result<Repository, StoreError> {
        self.lock()
            .repositories
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("repository {:?}", name)))
    }

    async fn put_repositories(
        &self,
        owner: &str,
        repos: &[HostRepository],
        auto_created: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let owner = inner
            .users
            .get(owner)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user {:?}", owner)))?;

        for host in repos {
            if inner.repositories.contains_key(&host.full_name) {
                continue;
            }
            let mut repo = Repository::from_host(host, Some(owner.clone()), auto_created);
            repo.id = inner.next_id();
            inner.repositories.insert(repo.name.clone(), repo);
        }

        Ok(())
    }

    async fn get_user(&self, username: &str) -> Result<User, StoreError> {
        self.lock()
            .users
            .get(username)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user {:?}", username)))
    }

    async fn get_ref_by_name_and_sha(&self, repo_name: &str, sha: &str) -> Result<Ref, StoreError> {
        self.lock()
            .refs
            .iter()
            .find(|r| r.repository.name == repo_name && r.sha == sha)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("ref {} in {:?}", sha, repo_name)))
    }

    async fn put_ref(&self, git_ref: &Ref) -> Result<i64, StoreError> {
        let mut inner = self.lock();
        inner.put_ref_calls += 1;

        if git_ref.repository.id == 0 {
            return Err(StoreError::Invalid("ref repository was not saved".to_string()));
        }

        let taken = inner
            .refs
            .iter()
            .any(|r| r.repository.id == git_ref.repository.id && r.sha == git_ref.sha);
        if taken {
            return Err(StoreError::AlreadyExists(format!(
                "ref {} in {:?}",
                git_ref.sha, git_ref.repository.name
            )));
        }

        let mut saved = git_ref.clone();
        saved.id = inner.next_id();
        inner.refs.push(saved.clone());
        Ok(saved.id)
    }

    async fn put_submission(&self, record: &SubmissionRecord) -> Result<SubmissionRecord, StoreError> {
        if record.head_ref.id == 0 || record.base_ref.id == 0 {
            return Err(StoreError::Invalid("submission refs were not saved".to_string()));
        }

        let mut inner = self.lock();
        let mut saved = record.clone();
        saved.id = inner.next_id();
        inner.submissions.push(saved.clone());
        Ok(saved)
    }

    async fn put_task(&self, task: &Task) -> Result<Task, StoreError> {
        if task.submission.id == 0 {
            return Err(StoreError::Invalid("task submission was not saved".to_string()));
        }

        let mut inner = self.lock();
        let mut saved = task.clone();
        saved.id = inner.next_id();
        inner.tasks.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn put_queue(&self, items: &[QueueItem]) -> Result<Vec<QueueItem>, StoreError> {
        let mut inner = self.lock();

        if let Some(orphan) = items.iter().find(|qi| !inner.tasks.contains_key(&qi.run.task.id)) {
            return Err(StoreError::Invalid(format!(
                "run {:?} belongs to an unsaved task",
                orphan.run.name
            )));
        }

        let mut saved = Vec::with_capacity(items.len());
        for item in items {
            let mut item = item.clone();
            item.run.id = inner.next_id();
            item.id = inner.next_id();
            inner.queue.push(item.clone());
            saved.push(item);
        }

        Ok(saved)
    }

    async fn cancel_ref_by_name(&self, repo_id: i64, ref_name: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let repo = inner
            .repositories
            .values()
            .find(|r| r.id == repo_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("repository id {}", repo_id)))?;

        if is_default_branch(&repo, ref_name) {
            return Ok(());
        }

        let ids: Vec<i64> = inner
            .tasks
            .values()
            .filter(|t| {
                !t.canceled
                    && t.head_ref().repository.id == repo_id
                    && t.head_ref().ref_name == ref_name
            })
            .map(|t| t.id)
            .collect();

        inner.cancel_tasks(&ids);
        Ok(())
    }

    async fn cancel_tasks(&self, task_ids: &[i64]) -> Result<(), StoreError> {
        self.lock().cancel_tasks(task_ids);
        Ok(())
    }

    async fn next_queue_item(
        &self,
        queue_name: &str,
        running_on: &str,
    ) -> Result<QueueItem, StoreError> {
        let mut guard = self.lock();
        let Inner {
            queue,
            tasks,
            canceled_runs,
            ..
        } = &mut *guard;

        let item = queue
            .iter_mut()
            .find(|qi| {
                qi.queue_name == queue_name
                    && !qi.running
                    && !canceled_runs.contains(&qi.run.id)
                    && tasks.get(&qi.run.task.id).is_some_and(|t| !t.canceled)
            })
            .ok_or_else(|| StoreError::NotFound(format!("no items on queue {:?}", queue_name)))?;

        item.running = true;
        item.running_on = Some(running_on.to_string());
        item.started_at = Some(Utc::now());
        Ok(item.clone())
    }
}
