//! Scripted VCS host and store wrappers for scheduler tests

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::db::{MemoryStore, Store, StoreError};
use crate::domain::{
    HostRepository, OAuthToken, QueueItem, Ref, Repository, SubmissionRecord, Task, User,
};
use crate::integrations::{CommitState, IntegrationError, StatusTarget, VcsClient, VcsClientFactory};

pub const PARENT: &str = "erikh/foo";
pub const FORK: &str = "erikh2/foo";
pub const BASE_SHA: &str = "1111111111111111111111111111111111111111";
pub const HEAD_SHA: &str = "2222222222222222222222222222222222222222";

pub const RUN_YAML: &str = r#"
mountpoint: /tmp
runs:
  test:
    command: ["make", "test"]
    image: "foo"
"#;

#[derive(Default)]
struct FakeState {
    repos: HashMap<String, HostRepository>,
    shas: HashMap<(String, String), String>,
    refs: HashMap<(String, String), Vec<String>>,
    files: BTreeMap<String, Vec<u8>>,
    diff: Vec<String>,
    fail_clear: bool,
    fail_comment: bool,
    fail_status: bool,
    calls: Vec<String>,
    file_fetches: Vec<String>,
    statuses: Vec<(StatusTarget, CommitState)>,
    comments: Vec<(String, i64, String)>,
    tokens: Vec<String>,
}

/// A single-tree VCS host; file contents ignore repository and ref
#[derive(Default)]
pub struct FakeVcs {
    state: Mutex<FakeState>,
}

impl FakeVcs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn add_repo(&self, host: HostRepository) {
        self.lock().repos.insert(host.full_name.clone(), host);
    }

    pub fn set_sha(&self, repo: &str, ref_name: &str, sha: &str) {
        self.lock()
            .shas
            .insert((repo.to_string(), ref_name.to_string()), sha.to_string());
    }

    pub fn set_refs(&self, repo: &str, sha: &str, names: &[&str]) {
        self.lock().refs.insert(
            (repo.to_string(), sha.to_string()),
            names.iter().map(|n| n.to_string()).collect(),
        );
    }

    pub fn add_file(&self, path: &str, content: &str) {
        self.lock().files.insert(path.to_string(), content.as_bytes().to_vec());
    }

    pub fn set_diff(&self, paths: &[&str]) {
        self.lock().diff = paths.iter().map(|p| p.to_string()).collect();
    }

    pub fn fail_clear_states(&self) {
        self.lock().fail_clear = true;
    }

    pub fn fail_comments(&self) {
        self.lock().fail_comment = true;
    }

    pub fn fail_statuses(&self) {
        self.lock().fail_status = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn file_fetches(&self) -> Vec<String> {
        self.lock().file_fetches.clone()
    }

    pub fn statuses(&self) -> Vec<(StatusTarget, CommitState)> {
        self.lock().statuses.clone()
    }

    pub fn comments(&self) -> Vec<(String, i64, String)> {
        self.lock().comments.clone()
    }

    /// Tokens clients were built with, in order
    pub fn tokens(&self) -> Vec<String> {
        self.lock().tokens.clone()
    }

    /// Wait for detached status posts to land
    pub async fn wait_for_statuses(&self, count: usize) -> Vec<(StatusTarget, CommitState)> {
        for _ in 0..100 {
            if self.lock().statuses.len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.statuses()
    }

    fn record(&self, call: String) {
        self.lock().calls.push(call);
    }
}

#[async_trait]
impl VcsClient for FakeVcs {
    async fn get_repository(&self, name: &str) -> Result<HostRepository, IntegrationError> {
        self.record(format!("get_repository {}", name));
        self.lock()
            .repos
            .get(name)
            .cloned()
            .ok_or_else(|| IntegrationError::NotFound(name.to_string()))
    }

    async fn get_sha(&self, repo: &str, ref_name: &str) -> Result<String, IntegrationError> {
        self.record(format!("get_sha {} {}", repo, ref_name));
        self.lock()
            .shas
            .get(&(repo.to_string(), ref_name.to_string()))
            .cloned()
            .ok_or_else(|| IntegrationError::NotFound(ref_name.to_string()))
    }

    async fn get_refs(&self, repo: &str, sha: &str) -> Result<Vec<String>, IntegrationError> {
        self.record(format!("get_refs {} {}", repo, sha));
        Ok(self
            .lock()
            .refs
            .get(&(repo.to_string(), sha.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_file(
        &self,
        _repo: &str,
        _git_ref: &str,
        path: &str,
    ) -> Result<Vec<u8>, IntegrationError> {
        let mut state = self.lock();
        state.file_fetches.push(path.to_string());
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| IntegrationError::NotFound(path.to_string()))
    }

    async fn get_diff_files(
        &self,
        _repo: &str,
        _base: &str,
        _head: &str,
    ) -> Result<Vec<String>, IntegrationError> {
        Ok(self.lock().diff.clone())
    }

    async fn get_file_list(&self, _repo: &str, _sha: &str) -> Result<Vec<String>, IntegrationError> {
        Ok(self.lock().files.keys().cloned().collect())
    }

    async fn set_status(
        &self,
        target: &StatusTarget,
        state: CommitState,
    ) -> Result<(), IntegrationError> {
        let mut fake = self.lock();
        if fake.fail_status {
            return Err(IntegrationError::Other("status rejected".to_string()));
        }
        fake.statuses.push((target.clone(), state));
        Ok(())
    }

    async fn clear_states(&self, repo: &str, sha: &str) -> Result<(), IntegrationError> {
        self.record(format!("clear_states {} {}", repo, sha));
        if self.lock().fail_clear {
            return Err(IntegrationError::Other("clear failed".to_string()));
        }
        Ok(())
    }

    async fn comment_error(
        &self,
        repo: &str,
        ticket_id: i64,
        message: &str,
    ) -> Result<(), IntegrationError> {
        let mut fake = self.lock();
        fake.comments
            .push((repo.to_string(), ticket_id, message.to_string()));
        if fake.fail_comment {
            return Err(IntegrationError::Other("comment failed".to_string()));
        }
        Ok(())
    }
}

/// Factory handing out the shared fake, noting which token asked
pub struct FakeFactory(pub Arc<FakeVcs>);

impl VcsClientFactory for FakeFactory {
    fn client(&self, token: &OAuthToken) -> Arc<dyn VcsClient> {
        self.0.lock().tokens.push(token.token.clone());
        self.0.clone()
    }
}

pub fn token(value: &str) -> OAuthToken {
    OAuthToken {
        token: value.to_string(),
        username: String::new(),
        scopes: vec![],
    }
}

/// Parent `erikh/foo` (owned by `erikh`, enabled) with fork `erikh2/foo`
/// pushed at `heads/feature`
pub fn scenario() -> (Arc<MemoryStore>, Arc<FakeVcs>) {
    let store = Arc::new(MemoryStore::new());
    store.add_user(User::new("erikh", Some(token("owner-token"))));
    store.add_user(User::new("erikh2", Some(token("submitter-token"))));

    let mut parent = HostRepository::new(PARENT);
    parent.default_branch = Some("master".to_string());
    store.add_repository(parent.clone(), Some("erikh"), false);

    let mut fork = HostRepository::new(FORK);
    fork.fork = true;
    fork.parent = Some(PARENT.to_string());

    let vcs = FakeVcs::new();
    vcs.add_repo(parent);
    vcs.add_repo(fork);
    vcs.set_sha(PARENT, "heads/master", BASE_SHA);
    vcs.set_sha(FORK, "heads/feature", HEAD_SHA);
    vcs.set_refs(PARENT, BASE_SHA, &["heads/master"]);
    vcs.set_refs(FORK, HEAD_SHA, &["heads/feature"]);
    vcs.add_file("tinyci.yml", "");

    (store, vcs)
}

/// Store wrapper that fails selected operations
pub struct FaultyStore {
    pub inner: Arc<MemoryStore>,
    pub fail_put_queue: bool,
    pub fail_cancel_ref: bool,
    pub fail_put_task_after: Option<usize>,
    /// Lookups of this repository always miss
    pub hide_repository: Option<String>,
    put_tasks: Mutex<usize>,
    canceled: Mutex<Vec<i64>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_put_queue: false,
            fail_cancel_ref: false,
            fail_put_task_after: None,
            hide_repository: None,
            put_tasks: Mutex::new(0),
            canceled: Mutex::new(Vec::new()),
        }
    }

    /// Task ids passed to `cancel_tasks`
    pub fn canceled(&self) -> Vec<i64> {
        self.canceled.lock().unwrap().clone()
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn get_repository(&self, name: &str) -> Result<Repository, StoreError> {
        if self.hide_repository.as_deref() == Some(name) {
            return Err(StoreError::NotFound(name.to_string()));
        }
        self.inner.get_repository(name).await
    }

    async fn put_repositories(
        &self,
        owner: &str,
        repos: &[HostRepository],
        auto_created: bool,
    ) -> Result<(), StoreError> {
        self.inner.put_repositories(owner, repos, auto_created).await
    }

    async fn get_user(&self, username: &str) -> Result<User, StoreError> {
        self.inner.get_user(username).await
    }

    async fn get_ref_by_name_and_sha(&self, repo_name: &str, sha: &str) -> Result<Ref, StoreError> {
        self.inner.get_ref_by_name_and_sha(repo_name, sha).await
    }

    async fn put_ref(&self, git_ref: &Ref) -> Result<i64, StoreError> {
        self.inner.put_ref(git_ref).await
    }

    async fn put_submission(&self, record: &SubmissionRecord) -> Result<SubmissionRecord, StoreError> {
        self.inner.put_submission(record).await
    }

    async fn put_task(&self, task: &Task) -> Result<Task, StoreError> {
        let count = {
            let mut count = self.put_tasks.lock().unwrap();
            *count += 1;
            *count
        };
        if self.fail_put_task_after.is_some_and(|limit| count > limit) {
            return Err(StoreError::Invalid("task insert failed".to_string()));
        }
        self.inner.put_task(task).await
    }

    async fn put_queue(&self, items: &[QueueItem]) -> Result<Vec<QueueItem>, StoreError> {
        if self.fail_put_queue {
            return Err(StoreError::Invalid("queue unavailable".to_string()));
        }
        self.inner.put_queue(items).await
    }

    async fn cancel_ref_by_name(&self, repo_id: i64, ref_name: &str) -> Result<(), StoreError> {
        if self.fail_cancel_ref {
            return Err(StoreError::Invalid("cancel failed".to_string()));
        }
        self.inner.cancel_ref_by_name(repo_id, ref_name).await
    }

    async fn cancel_tasks(&self, task_ids: &[i64]) -> Result<(), StoreError> {
        self.canceled.lock().unwrap().extend_from_slice(task_ids);
        self.inner.cancel_tasks(task_ids).await
    }

    async fn next_queue_item(
        &self,
        queue_name: &str,
        running_on: &str,
    ) -> Result<QueueItem, StoreError> {
        self.inner.next_queue_item(queue_name, running_on).await
    }
}
