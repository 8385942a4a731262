//! Task, run and queue item models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::names::dir_alias;
use super::{Ref, RunSettings, SubmissionRecord, TaskSettings};

/// A task directory materialized for one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: i64,
    /// Task directory; `.` for the repository root
    pub path: String,
    pub base_sha: String,
    pub settings: TaskSettings,
    pub canceled: bool,
    pub created_at: DateTime<Utc>,
    pub submission: SubmissionRecord,
}

impl Task {
    pub fn new(path: impl Into<String>, settings: TaskSettings, submission: SubmissionRecord) -> Self {
        Self {
            id: 0,
            path: path.into(),
            base_sha: submission.base_ref.sha.clone(),
            settings,
            canceled: false,
            created_at: Utc::now(),
            submission,
        }
    }

    /// The ref being built
    pub fn head_ref(&self) -> &Ref {
        &self.submission.head_ref
    }

    /// Run names in the order runs are materialized
    pub fn run_names(&self) -> Vec<&str> {
        // BTreeMap keys iterate sorted
        self.settings.runs.keys().map(String::as_str).collect()
    }
}

/// One named job of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: i64,
    /// `<dir alias>:<run name>`
    pub name: String,
    pub settings: RunSettings,
    pub task: Task,
    pub created_at: DateTime<Utc>,
}

impl Run {
    pub fn new(run_name: &str, settings: RunSettings, task: Task) -> Self {
        Self {
            id: 0,
            name: run_display_name(&task.path, run_name),
            settings,
            task,
            created_at: Utc::now(),
        }
    }
}

/// Display name of a run, as used for commit status contexts
pub fn run_display_name(dir: &str, run_name: &str) -> String {
    format!("{}:{}", dir_alias(dir), run_name)
}

/// A run addressed to a named queue, ready for a worker to claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: i64,
    pub queue_name: String,
    pub run: Run,
    pub running: bool,
    pub running_on: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Wrap a run; the queue name always comes from the run's settings
    pub fn new(run: Run) -> Self {
        Self {
            id: 0,
            queue_name: run.settings.queue.clone(),
            run,
            running: false,
            running_on: None,
            started_at: None,
        }
    }
}
