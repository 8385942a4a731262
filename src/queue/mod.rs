//! Queue service - the boundary callers submit work through
//!
//! `submit` resolves a submission with the scheduler and enqueues what it
//! produced; `next_queue_item` hands the oldest waiting run to a worker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn, Instrument};

use crate::db::{Store, StoreError};
use crate::domain::{QueueItem, Submission};
use crate::integrations::VcsClientFactory;
use crate::scheduler::{
    Processed, StatusNotifier, StatusPosts, SubmissionProcessor, SubmitError,
};

/// Queue service errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// The caller stopped waiting; the submission may still complete
    #[error("submission timed out after {0:?}; outcome unknown")]
    Timeout(Duration),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error("queue store error: {0}")]
    Store(#[from] StoreError),

    #[error("no owner for repository {0:?}; cannot report run status")]
    NoOwner(String),

    #[error("submission task failed: {0}")]
    Join(String),
}

pub struct QueueService {
    store: Arc<dyn Store>,
    vcs: Arc<dyn VcsClientFactory>,
    processor: Arc<SubmissionProcessor>,
    status_url: String,
    submit_timeout: Duration,
    posts: StatusPosts,
}

impl QueueService {
    pub fn new(
        store: Arc<dyn Store>,
        vcs: Arc<dyn VcsClientFactory>,
        status_url: impl Into<String>,
        submit_timeout: Duration,
    ) -> Self {
        let status_url = status_url.into();
        let posts = StatusPosts::new();
        let processor = Arc::new(
            SubmissionProcessor::new(store.clone(), vcs.clone(), status_url.clone())
                .with_status_posts(posts.clone()),
        );

        Self {
            store,
            vcs,
            processor,
            status_url,
            submit_timeout,
            posts,
        }
    }

    /// Wait for commit statuses still being posted in the background
    pub async fn flush_statuses(&self) {
        self.posts.flush().await;
    }

    /// Resolve a submission and enqueue its runs.
    ///
    /// The submission is processed on its own task; after `submit_timeout`
    /// the caller gets [`QueueError::Timeout`] while processing carries on.
    pub async fn submit(&self, sub: Submission) -> Result<Vec<QueueItem>, QueueError> {
        let start = Instant::now();
        let processor = self.processor.clone();
        let handle = tokio::spawn(async move { processor.process(sub).await }.in_current_span());

        let processed = match tokio::time::timeout(self.submit_timeout, handle).await {
            Err(_) => {
                warn!(timeout = ?self.submit_timeout, "Submission timed out");
                return Err(QueueError::Timeout(self.submit_timeout));
            }
            Ok(Err(e)) => return Err(QueueError::Join(e.to_string())),
            Ok(Ok(result)) => result?,
        };

        let saved = match self.store.put_queue(&processed.items).await {
            Ok(saved) => saved,
            Err(e) => {
                warn!(error = %e, "Could not enqueue submission; canceling its tasks");
                self.cancel_created(&processed).await;
                return Err(e.into());
            }
        };

        info!(queue_items = saved.len(), "Submission took {:?}", start.elapsed());
        Ok(saved)
    }

    /// Claim the next run on `queue` for the worker `running_on` and mark it
    /// started on the host.
    pub async fn next_queue_item(
        &self,
        queue: &str,
        running_on: &str,
    ) -> Result<QueueItem, QueueError> {
        let item = self.store.next_queue_item(queue, running_on).await?;

        let task = &item.run.task;
        let parent = &task.submission.base_ref.repository;
        let token = parent
            .owner_token()
            .ok_or_else(|| QueueError::NoOwner(parent.name.clone()))?;

        StatusNotifier::new(self.vcs.client(token), self.status_url.clone())
            .with_posts(self.posts.clone())
            .started(
                &parent.name,
                &item.run.name,
                &task.head_ref().sha,
                item.run.id,
            );

        info!(
            queue,
            running_on,
            run = %item.run.name,
            run_id = item.run.id,
            "Dequeued run"
        );
        Ok(item)
    }

    /// Cancel every task the submission saved, with or without runs
    async fn cancel_created(&self, processed: &Processed) {
        let ids = processed.task_ids();
        if ids.is_empty() {
            return;
        }

        if let Err(e) = self.store.cancel_tasks(&ids).await {
            warn!(tasks = ?ids, error = %e, "Could not cancel tasks");
        }
    }
}
