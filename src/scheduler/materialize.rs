//! Saving selected tasks and building their queue items

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::error::SubmitError;
use super::status::StatusNotifier;
use crate::db::Store;
use crate::domain::{QueueItem, Run, SubmissionRecord, Task, TaskSettings};

pub struct TaskMaterializer {
    store: Arc<dyn Store>,
}

impl TaskMaterializer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Persist the submission and one task per selected directory, in path
    /// order, and build queue items for every run of the runnable ones.
    ///
    /// Tasks are pushed onto `created` as soon as they are saved so the
    /// caller can cancel them if a later step fails.
    pub async fn materialize(
        &self,
        record: SubmissionRecord,
        selected: BTreeMap<String, TaskSettings>,
        notifier: &StatusNotifier,
        status_repo: &str,
        created: &mut Vec<Task>,
    ) -> Result<Vec<QueueItem>, SubmitError> {
        let record = self
            .store
            .put_submission(&record)
            .await
            .map_err(SubmitError::store("saving submission"))?;

        let mut items = Vec::new();

        for (dir, settings) in selected {
            let task = self
                .store
                .put_task(&Task::new(dir, settings, record.clone()))
                .await
                .map_err(SubmitError::store("saving task"))?;
            created.push(task.clone());

            if !task.settings.is_runnable() {
                debug!(dir = %task.path, "Task has no runs; skipping");
                continue;
            }

            for (run_name, run_settings) in &task.settings.runs {
                let run = Run::new(run_name, run_settings.clone(), task.clone());
                notifier.pending(status_repo, &run.name, &record.head_ref.sha);
                items.push(QueueItem::new(run));
            }
        }

        Ok(items)
    }
}
