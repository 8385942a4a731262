//! Repository configuration loading

use tracing::debug;

use super::error::SubmitError;
use crate::domain::names::REPO_CONFIG_FILE;
use crate::domain::{RepoConfig, Repository};
use crate::integrations::VcsClient;

/// Loads `tinyci.yml` from the tip of the parent's default branch
pub struct RepoConfigLoader;

impl RepoConfigLoader {
    pub async fn load(
        client: &dyn VcsClient,
        parent: &Repository,
        main_branch: &str,
    ) -> Result<RepoConfig, SubmitError> {
        let git_ref = format!("refs/{}", main_branch);
        let content = client
            .get_file(&parent.name, &git_ref, REPO_CONFIG_FILE)
            .await
            .map_err(SubmitError::vcs(format!(
                "fetching {} from {}",
                REPO_CONFIG_FILE, git_ref
            )))?;

        let config = RepoConfig::parse(&content).map_err(SubmitError::RepoConfig)?;
        debug!(queue = %config.queue, ignored = config.ignore_dirs.len(), "Loaded repository config");
        Ok(config)
    }
}
