//! Task directory discovery

use std::collections::BTreeSet;

use tracing::debug;

use super::error::SubmitError;
use crate::domain::names::{base_name, parent_dir, TASK_DESCRIPTOR};
use crate::domain::{Ref, RepoConfig, Repository};
use crate::integrations::VcsClient;

/// Directories touched by a change and directories holding task descriptors
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub diff_dirs: BTreeSet<String>,
    pub task_dirs: BTreeSet<String>,
}

pub struct TaskDiscoverer;

impl TaskDiscoverer {
    pub async fn discover(
        client: &dyn VcsClient,
        parent: &Repository,
        fork: &Repository,
        base: &Ref,
        head: &Ref,
        config: &RepoConfig,
    ) -> Result<Discovered, SubmitError> {
        let diff = client
            .get_diff_files(&parent.name, &base.sha, &head.sha)
            .await
            .map_err(SubmitError::vcs("getting file list for diff"))?;

        let files = client
            .get_file_list(&fork.name, &head.sha)
            .await
            .map_err(SubmitError::vcs("getting file list for head"))?;

        let discovered = Discovered {
            diff_dirs: diff.iter().map(|path| parent_dir(path)).collect(),
            task_dirs: files
                .iter()
                .filter(|path| base_name(path) == TASK_DESCRIPTOR && !config.is_ignored(path))
                .map(|path| parent_dir(path))
                .collect(),
        };

        debug!(
            diff_dirs = discovered.diff_dirs.len(),
            task_dirs = discovered.task_dirs.len(),
            "Discovered task directories"
        );

        Ok(discovered)
    }
}
