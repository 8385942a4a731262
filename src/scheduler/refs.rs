//! Ref resolution

use std::sync::Arc;

use tracing::debug;

use super::error::SubmitError;
use crate::db::Store;
use crate::domain::names::owner_repo;
use crate::domain::{select_ref_name, Ref, Repository};
use crate::integrations::VcsClient;

const INSERT_RETRIES: usize = 1;

pub struct RefResolver {
    store: Arc<dyn Store>,
}

impl RefResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Find or create the ref for `sha` in `repo`.
    ///
    /// A concurrent insert of the same (repository, sha) is not an error;
    /// the loser picks up the winner's record on the next lookup.
    pub async fn resolve(
        &self,
        client: &dyn VcsClient,
        repo: &Repository,
        sha: &str,
    ) -> Result<Ref, SubmitError> {
        let names = client
            .get_refs(&repo.name, sha)
            .await
            .map_err(SubmitError::vcs(format!("listing refs of {} at {}", repo.name, sha)))?;
        let ref_name = select_ref_name(names, sha);

        owner_repo(&repo.name)?;

        for attempt in 0..=INSERT_RETRIES {
            match self.store.get_ref_by_name_and_sha(&repo.name, sha).await {
                Ok(found) => return Ok(found),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(SubmitError::store("looking up ref")(e)),
            }

            if attempt == INSERT_RETRIES {
                break;
            }

            let mut git_ref = Ref::new(repo.clone(), ref_name.clone(), sha);
            match self.store.put_ref(&git_ref).await {
                Ok(id) => {
                    git_ref.id = id;
                    return Ok(git_ref);
                }
                Err(e) if e.is_already_exists() => {
                    debug!(repo = %repo.name, sha, "Ref inserted concurrently");
                }
                Err(e) => return Err(SubmitError::store("inserting ref")(e)),
            }
        }

        Err(SubmitError::RetryExhausted {
            context: format!("locating ref {} in {}", sha, repo.name),
        })
    }
}
