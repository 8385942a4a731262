//! Superseding earlier work on a branch

use std::sync::Arc;

use tracing::{info, warn};

use crate::db::Store;
use crate::domain::Ref;
use crate::integrations::VcsClient;

/// Supersedes earlier work on the ref being built. Nothing here fails the
/// submission.
pub struct CancellationCoordinator {
    store: Arc<dyn Store>,
}

impl CancellationCoordinator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn cancel_previous(&self, client: &dyn VcsClient, parent: &str, head: &Ref) {
        match self
            .store
            .cancel_ref_by_name(head.repository.id, &head.ref_name)
            .await
        {
            Ok(()) => info!(repo = %head.repository.name, git_ref = %head.ref_name, "Canceled previous runs"),
            Err(e) => warn!(
                repo = %head.repository.name,
                git_ref = %head.ref_name,
                error = %e,
                "Could not cancel previous runs"
            ),
        }

        if let Err(e) = client.clear_states(parent, &head.sha).await {
            warn!(repo = %parent, sha = %head.sha, error = %e, "Could not clear commit states");
        }
    }
}
