//! Task selection and dependency expansion

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::{debug, warn};

use super::discovery::Discovered;
use super::error::SubmitError;
use crate::domain::names::{descriptor_path, is_within};
use crate::domain::{RepoConfig, TaskSettings};
use crate::integrations::VcsClient;

const ROOT_DIR: &str = ".";

/// Where descriptors are read from and who to tell when one is broken
pub struct DescriptorSource<'a> {
    pub client: &'a dyn VcsClient,
    /// Repository and commit the descriptors are fetched at
    pub repo: &'a str,
    pub sha: &'a str,
    /// Repository receiving the error comment
    pub parent: &'a str,
    /// Pull request to comment on; 0 for none
    pub ticket_id: i64,
}

pub struct TaskSelector;

impl TaskSelector {
    /// Directories to build before dependency expansion.
    ///
    /// A full build takes every task directory. Otherwise each task directory
    /// touched by the diff is taken, plus the deepest task directory enclosing
    /// each touched directory. The root is always included.
    pub fn select_initial(discovered: &Discovered, full: bool) -> BTreeSet<String> {
        if full {
            let mut selected = discovered.task_dirs.clone();
            selected.insert(ROOT_DIR.to_string());
            return selected;
        }

        let mut selected: BTreeSet<String> = discovered
            .task_dirs
            .intersection(&discovered.diff_dirs)
            .cloned()
            .collect();

        for dir in &discovered.diff_dirs {
            let enclosing = discovered
                .task_dirs
                .iter()
                .filter(|task_dir| is_within(dir, task_dir))
                .max_by_key(|task_dir| task_dir.len());

            if let Some(task_dir) = enclosing {
                selected.insert(task_dir.clone());
            }
        }

        selected.insert(ROOT_DIR.to_string());
        selected
    }

    /// Fetch and parse each selected descriptor, pulling in declared
    /// dependencies until nothing new turns up.
    ///
    /// Every directory is fetched once. The result is keyed and therefore
    /// ordered by directory path.
    pub async fn expand(
        source: &DescriptorSource<'_>,
        initial: BTreeSet<String>,
        config: &RepoConfig,
    ) -> Result<BTreeMap<String, TaskSettings>, SubmitError> {
        let mut worklist: VecDeque<String> = initial.iter().cloned().collect();
        let mut seen = initial;
        let mut selected = BTreeMap::new();

        while let Some(dir) = worklist.pop_front() {
            let path = descriptor_path(&dir);
            let content = match source.client.get_file(source.repo, source.sha, &path).await {
                Ok(content) => content,
                Err(e) if e.is_not_found() && dir == ROOT_DIR => {
                    debug!("No descriptor at repository root");
                    continue;
                }
                Err(e) => {
                    return Err(SubmitError::vcs(format!("fetching {}", path))(e));
                }
            };

            let settings = match TaskSettings::parse(&content, false, config) {
                Ok(settings) => settings,
                Err(source_err) => {
                    let err = SubmitError::Descriptor {
                        dir: dir.clone(),
                        source: source_err,
                    };
                    Self::report(source, &err).await;
                    return Err(err);
                }
            };

            for dep in &settings.dependencies {
                if seen.insert(dep.clone()) {
                    debug!(dir = %dir, dependency = %dep, "Adding dependency");
                    worklist.push_back(dep.clone());
                }
            }

            selected.insert(dir, settings);
        }

        Ok(selected)
    }

    async fn report(source: &DescriptorSource<'_>, err: &SubmitError) {
        if source.ticket_id == 0 {
            return;
        }

        let message = format!("CI had an error processing your pull request: {}", err);
        if let Err(e) = source
            .client
            .comment_error(source.parent, source.ticket_id, &message)
            .await
        {
            warn!(ticket = source.ticket_id, error = %e, "Failed to comment on pull request");
        }
    }
}
