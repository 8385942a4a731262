//! Parent and fork repository resolution

use std::sync::Arc;

use tracing::{debug, info};

use super::error::SubmitError;
use crate::db::Store;
use crate::domain::names::owner_repo;
use crate::domain::{HostRepository, Repository, User};
use crate::integrations::{VcsClient, VcsClientFactory};

/// Lookups retried after a create-on-miss insert
const CREATE_RETRIES: usize = 1;

/// Repositories a submission acts on, plus a client for the parent's owner
pub struct ResolvedRepositories {
    pub parent: Repository,
    pub fork: Repository,
    pub host_parent: HostRepository,
    pub host_fork: HostRepository,
    /// Submitting user of a manual submission
    pub user: Option<User>,
    pub client: Arc<dyn VcsClient>,
}

impl ResolvedRepositories {
    /// Default branch of the parent as `heads/<branch>`
    pub fn main_branch(&self) -> String {
        self.host_parent.main_branch()
    }
}

pub struct RepositoryResolver {
    store: Arc<dyn Store>,
    vcs: Arc<dyn VcsClientFactory>,
}

impl RepositoryResolver {
    pub fn new(store: Arc<dyn Store>, vcs: Arc<dyn VcsClientFactory>) -> Self {
        Self { store, vcs }
    }

    /// Resolve both repositories.
    ///
    /// `user` is the submitting user for manual submissions, as returned by
    /// [`RepositoryResolver::select_parent`].
    pub async fn resolve(
        &self,
        parent_name: &str,
        fork_name: &str,
        user: Option<User>,
    ) -> Result<ResolvedRepositories, SubmitError> {
        let parent = self.parent(parent_name).await?;
        let client = self.owner_client(&parent)?;

        let host_parent = client
            .get_repository(&parent.name)
            .await
            .map_err(SubmitError::vcs("checking access to parent repository"))?;

        let host_fork = client
            .get_repository(fork_name)
            .await
            .map_err(SubmitError::vcs("obtaining fork information"))?;
        owner_repo(&host_fork.full_name)?;

        let fork = self.fork(&parent, &host_fork).await?;

        Ok(ResolvedRepositories {
            parent,
            fork,
            host_parent,
            host_fork,
            user,
            client,
        })
    }

    /// Determine the parent of a manual submission with the submitter's
    /// own credentials.
    ///
    /// An unregistered or disabled fork that the host reports as a fork is
    /// built against its upstream; anything else is its own parent.
    pub async fn select_parent(
        &self,
        fork_name: &str,
        submitted_by: &str,
    ) -> Result<(String, User), SubmitError> {
        let user = self
            .store
            .get_user(submitted_by)
            .await
            .map_err(SubmitError::store("obtaining submitting user"))?;

        let token = user
            .token
            .as_ref()
            .ok_or_else(|| SubmitError::MissingCredentials(user.username.clone()))?;
        let client = self.vcs.client(token);

        let host_fork = client
            .get_repository(fork_name)
            .await
            .map_err(SubmitError::vcs("obtaining fork repository; probably no access"))?;

        let enabled = match self.store.get_repository(&host_fork.full_name).await {
            Ok(repo) => !repo.disabled,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(SubmitError::store("looking up fork repository")(e)),
        };

        let parent = match (&host_fork.parent, enabled, host_fork.fork) {
            (Some(upstream), false, true) => {
                info!(parent = %upstream, "Selected parent of fork");
                upstream.clone()
            }
            _ => {
                info!(fork = %host_fork.full_name, "Selected fork; is directly enabled");
                host_fork.full_name.clone()
            }
        };

        owner_repo(&parent)?;
        Ok((parent, user))
    }

    async fn parent(&self, name: &str) -> Result<Repository, SubmitError> {
        let parent = self
            .store
            .get_repository(name)
            .await
            .map_err(SubmitError::store("obtaining parent repository"))?;

        if parent.disabled {
            return Err(SubmitError::NotEnabled(parent.name));
        }

        if parent.owner_token().is_none() {
            return Err(SubmitError::NoOwner(parent.name));
        }

        Ok(parent)
    }

    fn owner_client(&self, repo: &Repository) -> Result<Arc<dyn VcsClient>, SubmitError> {
        repo.owner_token()
            .map(|token| self.vcs.client(token))
            .ok_or_else(|| SubmitError::NoOwner(repo.name.clone()))
    }

    /// Look the fork up, creating it on first sight
    async fn fork(
        &self,
        parent: &Repository,
        host_fork: &HostRepository,
    ) -> Result<Repository, SubmitError> {
        let owner = parent
            .owner
            .as_ref()
            .map(|o| o.username.clone())
            .ok_or_else(|| SubmitError::NoOwner(parent.name.clone()))?;

        for attempt in 0..=CREATE_RETRIES {
            match self.store.get_repository(&host_fork.full_name).await {
                Ok(repo) => return Ok(repo),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(SubmitError::store("looking up fork repository")(e)),
            }

            if attempt == CREATE_RETRIES {
                break;
            }

            debug!(fork = %host_fork.full_name, "Creating fork record");
            match self
                .store
                .put_repositories(&owner, std::slice::from_ref(host_fork), true)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_already_exists() => {
                    debug!(fork = %host_fork.full_name, "Fork record created concurrently");
                }
                Err(e) => return Err(SubmitError::store("creating fork record")(e)),
            }
        }

        Err(SubmitError::RetryExhausted {
            context: format!("locating fork record {:?}", host_fork.full_name),
        })
    }
}
