//! Shared helpers: a scripted VCS host backed by a fixture tree and a
//! SQLite store in a temporary directory

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use ci_dispatch::db::SqliteStore;
use ci_dispatch::domain::{HostRepository, OAuthToken, User};
use ci_dispatch::integrations::{
    CommitState, IntegrationError, StatusTarget, VcsClient, VcsClientFactory,
};
use ci_dispatch::queue::QueueService;

pub const PARENT: &str = "acme/monorepo";
pub const FORK: &str = "dev/monorepo";
pub const BASE_SHA: &str = "be3d26c478991039e951097f2c99f56b55396940";
pub const HEAD_SHA: &str = "6dcb09b5b57875f334f61aebed695e2e4193db5e";
pub const STATUS_URL: &str = "https://ci.example.com";

/// Get the path to the test fixtures
pub fn fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn load_tree(root: &Path, dir: &Path, files: &mut BTreeMap<String, Vec<u8>>) {
    let entries = std::fs::read_dir(dir).unwrap();
    for entry in entries {
        let path = entry.unwrap().path();
        if path.is_dir() {
            load_tree(root, &path, files);
        } else {
            let relative = path.strip_prefix(root).unwrap();
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            files.insert(key, std::fs::read(&path).unwrap());
        }
    }
}

#[derive(Default)]
struct HostState {
    repos: HashMap<String, HostRepository>,
    shas: HashMap<(String, String), String>,
    refs: HashMap<(String, String), Vec<String>>,
    files: BTreeMap<String, Vec<u8>>,
    diff: Vec<String>,
    statuses: Vec<(StatusTarget, CommitState)>,
    comments: Vec<(String, i64, String)>,
    cleared: Vec<(String, String)>,
}

/// One repository tree served for every repository and ref
#[derive(Default)]
pub struct ScriptedHost {
    state: Mutex<HostState>,
}

impl ScriptedHost {
    /// Host serving the named fixture tree, with `acme/monorepo` and its fork
    /// `dev/monorepo` at `heads/feature`
    pub fn from_fixture(name: &str) -> Arc<Self> {
        let host = Arc::new(Self::default());
        {
            let mut state = host.lock();
            let root = fixtures_path().join(name);
            load_tree(&root, &root, &mut state.files);

            let mut parent = HostRepository::new(PARENT);
            parent.default_branch = Some("master".to_string());
            let mut fork = HostRepository::new(FORK);
            fork.fork = true;
            fork.parent = Some(PARENT.to_string());
            state.repos.insert(PARENT.to_string(), parent);
            state.repos.insert(FORK.to_string(), fork);

            for (repo, ref_name, sha) in [
                (PARENT, "heads/master", BASE_SHA),
                (FORK, "heads/feature", HEAD_SHA),
            ] {
                state
                    .shas
                    .insert((repo.to_string(), ref_name.to_string()), sha.to_string());
                state
                    .refs
                    .insert((repo.to_string(), sha.to_string()), vec![ref_name.to_string()]);
            }
        }
        host
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap()
    }

    pub fn put_file(&self, path: &str, content: &str) {
        self.lock()
            .files
            .insert(path.to_string(), content.as_bytes().to_vec());
    }

    pub fn set_diff(&self, paths: &[&str]) {
        self.lock().diff = paths.iter().map(|p| p.to_string()).collect();
    }

    pub fn comments(&self) -> Vec<(String, i64, String)> {
        self.lock().comments.clone()
    }

    pub fn cleared(&self) -> Vec<(String, String)> {
        self.lock().cleared.clone()
    }

    /// Statuses posted so far, waiting briefly for detached posts
    pub async fn statuses(&self, at_least: usize) -> Vec<(StatusTarget, CommitState)> {
        for _ in 0..100 {
            if self.lock().statuses.len() >= at_least {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.lock().statuses.clone()
    }
}

#[async_trait]
impl VcsClient for ScriptedHost {
    async fn get_repository(&self, name: &str) -> Result<HostRepository, IntegrationError> {
        self.lock()
            .repos
            .get(name)
            .cloned()
            .ok_or_else(|| IntegrationError::NotFound(name.to_string()))
    }

    async fn get_sha(&self, repo: &str, ref_name: &str) -> Result<String, IntegrationError> {
        self.lock()
            .shas
            .get(&(repo.to_string(), ref_name.to_string()))
            .cloned()
            .ok_or_else(|| IntegrationError::NotFound(format!("{}@{}", repo, ref_name)))
    }

    async fn get_refs(&self, repo: &str, sha: &str) -> Result<Vec<String>, IntegrationError> {
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
        self.lock()
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
        self.lock().statuses.push((target.clone(), state));
        Ok(())
    }

    async fn clear_states(&self, repo: &str, sha: &str) -> Result<(), IntegrationError> {
        self.lock().cleared.push((repo.to_string(), sha.to_string()));
        Ok(())
    }

    async fn comment_error(
        &self,
        repo: &str,
        ticket_id: i64,
        message: &str,
    ) -> Result<(), IntegrationError> {
        self.lock()
            .comments
            .push((repo.to_string(), ticket_id, message.to_string()));
        Ok(())
    }
}

pub struct ScriptedFactory(pub Arc<ScriptedHost>);

impl VcsClientFactory for ScriptedFactory {
    fn client(&self, _token: &OAuthToken) -> Arc<dyn VcsClient> {
        self.0.clone()
    }
}

fn token(value: &str) -> Option<OAuthToken> {
    Some(OAuthToken {
        token: value.to_string(),
        username: String::new(),
        scopes: vec![],
    })
}

/// A migrated database with `acme` owning the enabled parent and `dev`
/// able to submit manually
pub struct TestEnv {
    pub store: Arc<SqliteStore>,
    pub host: Arc<ScriptedHost>,
    pub service: QueueService,
    _dir: tempfile::TempDir,
}

impl TestEnv {
    pub async fn new(fixture: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("ci.db");
        let store = Arc::new(SqliteStore::open(db_path.to_str().unwrap()).await.unwrap());
        let host = ScriptedHost::from_fixture(fixture);

        store.put_user(&User::new("acme", token("acme-token"))).await.unwrap();
        store.put_user(&User::new("dev", token("dev-token"))).await.unwrap();
        let parent = host.get_repository(PARENT).await.unwrap();
        store.enable_repository(&parent, "acme").await.unwrap();

        let service = QueueService::new(
            store.clone(),
            Arc::new(ScriptedFactory(host.clone())),
            STATUS_URL,
            Duration::from_secs(10),
        );

        Self {
            store,
            host,
            service,
            _dir: dir,
        }
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(self.store.pool())
            .await
            .unwrap()
    }
}
