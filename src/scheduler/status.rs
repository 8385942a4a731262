//! Commit status notifications
//!
//! Pending and started statuses are posted on detached tasks. The submission
//! never waits for them and their errors are only logged; a process about to
//! exit can drain them with [`StatusPosts::flush`].

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinSet;
use tracing::{debug, warn, Instrument};

use crate::integrations::{CommitState, StatusTarget, VcsClient};

/// Context of the status posted when a submission fails
pub const GLOBAL_CONTEXT: &str = "*global*";

/// Detached status posts that may still be in flight
#[derive(Clone, Default)]
pub struct StatusPosts {
    set: Arc<Mutex<JoinSet<()>>>,
}

impl StatusPosts {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn<F>(&self, post: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.lock();
        // reap finished posts so a long-lived service does not accumulate them
        while set.try_join_next().is_some() {}
        set.spawn(post);
    }

    /// Posts spawned and not yet reaped
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    /// Wait for every post spawned so far
    pub async fn flush(&self) {
        let mut set = std::mem::take(&mut *self.lock());
        let count = set.len();
        while set.join_next().await.is_some() {}
        debug!(count, "Flushed status posts");
    }
}

#[derive(Clone)]
pub struct StatusNotifier {
    client: Arc<dyn VcsClient>,
    url: String,
    posts: StatusPosts,
}

impl StatusNotifier {
    pub fn new(client: Arc<dyn VcsClient>, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            posts: StatusPosts::default(),
        }
    }

    /// Track detached posts in a set shared with other notifiers
    pub fn with_posts(mut self, posts: StatusPosts) -> Self {
        self.posts = posts;
        self
    }

    pub fn pending(&self, repo: &str, run_name: &str, sha: &str) {
        self.detach(repo, run_name, sha, self.url.clone(), CommitState::Pending);
    }

    pub fn started(&self, repo: &str, run_name: &str, sha: &str, run_id: i64) {
        let url = format!("{}/log/{}", self.url, run_id);
        self.detach(repo, run_name, sha, url, CommitState::Started);
    }

    /// Report a failed submission on the global context; awaited, but never fails
    pub async fn failure(&self, repo: &str, sha: &str, message: &str) {
        let state = CommitState::Error {
            message: format!("failed to start job: {}", message),
        };

        let target = match StatusTarget::new(repo, GLOBAL_CONTEXT, sha, self.url.clone()) {
            Ok(target) => target,
            Err(e) => {
                warn!(repo, error = %e, "Cannot post failure status");
                return;
            }
        };

        if let Err(e) = self.client.set_status(&target, state).await {
            warn!(repo, sha, error = %e, "Failed to post failure status");
        }
    }

    fn detach(&self, repo: &str, context: &str, sha: &str, url: String, state: CommitState) {
        let target = match StatusTarget::new(repo, context, sha, url) {
            Ok(target) => target,
            Err(e) => {
                warn!(repo, error = %e, "Cannot post commit status");
                return;
            }
        };

        let client = self.client.clone();
        self.posts.spawn(
            async move {
                if let Err(e) = client.set_status(&target, state).await {
                    warn!(
                        context = %target.context,
                        sha = %target.sha,
                        error = %e,
                        "Failed to post commit status"
                    );
                }
            }
            .in_current_span(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::testing::*;

    #[tokio::test]
    async fn test_pending_and_started() {
        let vcs = FakeVcs::new();
        let notifier = StatusNotifier::new(vcs.clone(), "https://ci.example.com");

        notifier.pending(PARENT, "*root*:test", HEAD_SHA);
        notifier.started(PARENT, "*root*:test", HEAD_SHA, 42);

        let mut statuses = vcs.wait_for_statuses(2).await;
        statuses.sort_by_key(|(target, _)| target.url.clone());

        assert_eq!(statuses[0].0.url, "https://ci.example.com");
        assert_eq!(statuses[0].1, CommitState::Pending);
        assert_eq!(statuses[1].0.url, "https://ci.example.com/log/42");
        assert_eq!(statuses[1].1, CommitState::Started);
        assert_eq!(statuses[1].0.owner, "erikh");
        assert_eq!(statuses[1].0.context, "*root*:test");
    }

    #[tokio::test]
    async fn test_failure_status() {
        let vcs = FakeVcs::new();
        StatusNotifier::new(vcs.clone(), "https://ci.example.com")
            .failure(PARENT, HEAD_SHA, "boom")
            .await;

        let statuses = vcs.statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].0.context, GLOBAL_CONTEXT);
        assert_eq!(statuses[0].1.state(), "error");
        assert_eq!(statuses[0].1.description(), "failed to start job: boom");
    }

    #[tokio::test]
    async fn test_flush_waits_for_detached_posts() {
        let vcs = FakeVcs::new();
        let posts = StatusPosts::new();
        let notifier =
            StatusNotifier::new(vcs.clone(), "https://ci.example.com").with_posts(posts.clone());

        notifier.pending(PARENT, "a:test", HEAD_SHA);
        notifier.pending(PARENT, "b:test", HEAD_SHA);
        notifier.started(PARENT, "a:test", HEAD_SHA, 1);

        posts.flush().await;

        assert_eq!(vcs.statuses().len(), 3);
        assert_eq!(posts.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_status_errors_are_swallowed() {
        let vcs = FakeVcs::new();
        vcs.fail_statuses();
        let notifier = StatusNotifier::new(vcs.clone(), "https://ci.example.com");

        notifier.pending(PARENT, "foo:test", HEAD_SHA);
        notifier.failure(PARENT, HEAD_SHA, "boom").await;
        assert!(vcs.wait_for_statuses(1).await.is_empty());
    }
}
