//! Submission processing
//!
//! Drives one submission through its stages in order. Any failure aborts the
//! submission: the error is tagged with the stage it happened in, tasks that
//! were already saved are canceled and a global error status is posted to the
//! head commit when there is a client to post it with.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use super::cancellation::CancellationCoordinator;
use super::discovery::TaskDiscoverer;
use super::error::{SubmissionState, SubmitError};
use super::materialize::TaskMaterializer;
use super::refs::RefResolver;
use super::repo_config::RepoConfigLoader;
use super::repositories::{RepositoryResolver, ResolvedRepositories};
use super::selection::{DescriptorSource, TaskSelector};
use super::status::{StatusNotifier, StatusPosts};
use crate::db::Store;
use crate::domain::names::{is_sha, is_zero_sha};
use crate::domain::{
    QueueItem, Ref, RepoConfig, Submission, SubmissionRecord, Task, TaskSettings, ValidationError,
};
use crate::integrations::VcsClientFactory;

/// What is known about a submission so far, for cleanup on failure
struct Progress {
    state: SubmissionState,
    notifier: Option<StatusNotifier>,
    parent: Option<String>,
    head_sha: Option<String>,
    created: Vec<Task>,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: SubmissionState::Validating,
            notifier: None,
            parent: None,
            head_sha: None,
            created: Vec::new(),
        }
    }

    fn enter(&mut self, state: SubmissionState) {
        debug!(state = %state, "Submission state");
        self.state = state;
    }
}

/// Everything a successful submission produced
#[derive(Debug, Clone, Default)]
pub struct Processed {
    /// Every task saved, including dependency-only tasks without runs
    pub tasks: Vec<Task>,
    pub items: Vec<QueueItem>,
}

impl Processed {
    pub fn task_ids(&self) -> Vec<i64> {
        self.tasks.iter().map(|t| t.id).collect()
    }
}

/// Head and base refs of a submission
struct ResolvedRefs {
    head: Ref,
    base: Ref,
}

pub struct SubmissionProcessor {
    store: Arc<dyn Store>,
    vcs: Arc<dyn VcsClientFactory>,
    status_url: String,
    posts: StatusPosts,
}

impl SubmissionProcessor {
    pub fn new(
        store: Arc<dyn Store>,
        vcs: Arc<dyn VcsClientFactory>,
        status_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            vcs,
            status_url: status_url.into(),
            posts: StatusPosts::default(),
        }
    }

    pub fn with_status_posts(mut self, posts: StatusPosts) -> Self {
        self.posts = posts;
        self
    }

    /// Resolve a submission into saved tasks and their queue items. Nothing is
    /// enqueued here.
    #[instrument(
        skip(self, sub),
        fields(
            parent = %sub.parent,
            fork = %sub.fork,
            head = %sub.head_sha,
            base = %sub.base_sha,
            manual = sub.manual,
            submitted_by = %sub.submitted_by,
            all = sub.all,
        )
    )]
    pub async fn process(&self, sub: Submission) -> Result<Processed, SubmitError> {
        let mut progress = Progress::new();

        match self.run(sub, &mut progress).await {
            Ok(items) => {
                progress.enter(SubmissionState::Done);
                Ok(Processed {
                    tasks: progress.created,
                    items,
                })
            }
            Err(err) => {
                let err = SubmitError::Stage {
                    state: progress.state,
                    source: Box::new(err),
                };
                progress.enter(SubmissionState::Failed);
                self.fail(&progress, &err).await;
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        sub: Submission,
        progress: &mut Progress,
    ) -> Result<Vec<QueueItem>, SubmitError> {
        progress.enter(SubmissionState::Validating);
        let sub = sub.validated()?;

        progress.enter(SubmissionState::ResolvingRepositories);
        let repos = self.resolve_repositories(&sub).await?;
        let notifier = StatusNotifier::new(repos.client.clone(), self.status_url.clone())
            .with_posts(self.posts.clone());
        progress.notifier = Some(notifier.clone());
        progress.parent = Some(repos.parent.name.clone());

        progress.enter(SubmissionState::ResolvingRefs);
        let refs = self.resolve_refs(&sub, &repos, progress).await?;

        progress.enter(SubmissionState::LoadingConfig);
        let config =
            RepoConfigLoader::load(repos.client.as_ref(), &repos.parent, &repos.main_branch())
                .await?;

        progress.enter(SubmissionState::SelectingTasks);
        let selected = self.select(&sub, &repos, &refs, &config).await?;

        progress.enter(SubmissionState::CancelingPrevious);
        CancellationCoordinator::new(self.store.clone())
            .cancel_previous(repos.client.as_ref(), &repos.parent.name, &refs.head)
            .await;

        progress.enter(SubmissionState::Materializing);
        let start = Instant::now();
        let record = SubmissionRecord::new(sub.ticket_id, repos.user.clone(), refs.head, refs.base);
        let items = TaskMaterializer::new(self.store.clone())
            .materialize(
                record,
                selected,
                &notifier,
                &repos.parent.name,
                &mut progress.created,
            )
            .await?;

        info!(
            tasks = progress.created.len(),
            queue_items = items.len(),
            "Computing queue items took {:?}",
            start.elapsed()
        );

        Ok(items)
    }

    async fn resolve_repositories(
        &self,
        sub: &Submission,
    ) -> Result<ResolvedRepositories, SubmitError> {
        let resolver = RepositoryResolver::new(self.store.clone(), self.vcs.clone());

        if !sub.manual {
            return resolver.resolve(&sub.parent, &sub.fork, None).await;
        }

        let (parent, user) = resolver.select_parent(&sub.fork, &sub.submitted_by).await?;
        if !sub.parent.is_empty() && sub.parent != parent {
            return Err(ValidationError::Submission(format!(
                "parent {:?} does not match {:?}, the parent of {:?}",
                sub.parent, parent, sub.fork
            ))
            .into());
        }

        resolver.resolve(&parent, &sub.fork, Some(user)).await
    }

    async fn resolve_refs(
        &self,
        sub: &Submission,
        repos: &ResolvedRepositories,
        progress: &mut Progress,
    ) -> Result<ResolvedRefs, SubmitError> {
        let client = repos.client.as_ref();

        let head_sha = if is_sha(&sub.head_sha) {
            sub.head_sha.clone()
        } else {
            client
                .get_sha(&repos.fork.name, &sub.head_sha)
                .await
                .map_err(SubmitError::vcs("getting sha for head"))?
        };
        progress.head_sha = Some(head_sha.clone());

        let mut base_sha = client
            .get_sha(&repos.parent.name, &repos.main_branch())
            .await
            .map_err(SubmitError::vcs("getting sha for base"))?;

        if is_zero_sha(&base_sha) {
            if repos.fork.id != repos.parent.id {
                return Err(ValidationError::Submission(
                    "base sha is empty on a fork of a different repository".to_string(),
                )
                .into());
            }
            base_sha = head_sha.clone();
        }

        let resolver = RefResolver::new(self.store.clone());
        let head = resolver.resolve(client, &repos.fork, &head_sha).await?;
        let base = resolver.resolve(client, &repos.parent, &base_sha).await?;

        debug!(head = %head.ref_name, base = %base.ref_name, "Resolved refs");
        Ok(ResolvedRefs { head, base })
    }

    async fn select(
        &self,
        sub: &Submission,
        repos: &ResolvedRepositories,
        refs: &ResolvedRefs,
        config: &RepoConfig,
    ) -> Result<BTreeMap<String, TaskSettings>, SubmitError> {
        let client = repos.client.as_ref();
        let discovered = TaskDiscoverer::discover(
            client,
            &repos.parent,
            &repos.fork,
            &refs.base,
            &refs.head,
            config,
        )
        .await?;

        let mainline = refs.head.repository.id == repos.parent.id
            && refs.head.ref_name == repos.main_branch();
        let full = (sub.all && sub.manual) || mainline;
        if full {
            info!(mainline, "Selecting all tasks");
        }

        let initial = TaskSelector::select_initial(&discovered, full);
        let source = DescriptorSource {
            client,
            repo: &repos.fork.name,
            sha: &refs.head.sha,
            parent: &repos.parent.name,
            ticket_id: sub.ticket_id,
        };

        TaskSelector::expand(&source, initial, config).await
    }

    /// Best-effort cleanup after a failed submission
    async fn fail(&self, progress: &Progress, err: &SubmitError) {
        warn!(error = %err, "Submission failed");

        if !progress.created.is_empty() {
            let ids: Vec<i64> = progress.created.iter().map(|t| t.id).collect();
            if let Err(e) = self.store.cancel_tasks(&ids).await {
                warn!(tasks = ?ids, error = %e, "Could not cancel tasks of failed submission");
            }
        }

        if let (Some(notifier), Some(parent), Some(sha)) =
            (&progress.notifier, &progress.parent, &progress.head_sha)
        {
            notifier.failure(parent, sha, &err.to_string()).await;
        }
    }
}
