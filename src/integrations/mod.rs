//! VCS host integration
//!
//! The scheduler only talks to the host through [`VcsClient`]. Clients are
//! produced per credential by a [`VcsClientFactory`] so every call runs with
//! the token of whoever the work is being done for.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{HostRepository, OAuthToken, ValidationError};

pub mod github;
pub use github::{GitHubClient, GitHubClientFactory};

/// Common integration error type
#[derive(Error, Debug)]
pub enum IntegrationError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Authentication required")]
    AuthRequired,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited, retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid repository: {0}")]
    InvalidRepository(#[from] ValidationError),

    #[error("{0}")]
    Other(String),
}

impl IntegrationError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, IntegrationError::NotFound(_))
    }
}

/// Commit status to report for a context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitState {
    /// The run is queued
    Pending,
    /// A worker picked the run up
    Started,
    Finished { success: bool, message: String },
    Error { message: String },
}

impl CommitState {
    /// Host state string
    pub fn state(&self) -> &'static str {
        match self {
            CommitState::Pending | CommitState::Started => "pending",
            CommitState::Finished { success: true, .. } => "success",
            CommitState::Finished { success: false, .. } => "failure",
            CommitState::Error { .. } => "error",
        }
    }

    pub fn description(&self) -> String {
        match self {
            CommitState::Pending => "The run will be starting soon.".to_string(),
            CommitState::Started => "The run has started!".to_string(),
            CommitState::Finished { message, .. } => {
                format!("The run finished: {}! {}", self.state(), message)
            }
            CommitState::Error { message } => message.clone(),
        }
    }
}

/// Where a commit status is posted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTarget {
    pub owner: String,
    pub repo: String,
    /// Status context, usually the run name
    pub context: String,
    pub sha: String,
    pub url: String,
}

impl StatusTarget {
    pub fn new(
        repo_name: &str,
        context: impl Into<String>,
        sha: impl Into<String>,
        url: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let (owner, repo) = crate::domain::names::owner_repo(repo_name)?;
        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            context: context.into(),
            sha: sha.into(),
            url: url.into(),
        })
    }
}

/// Capabilities the scheduler needs from the VCS host
#[async_trait]
pub trait VcsClient: Send + Sync {
    /// Repository metadata by `owner/name`
    async fn get_repository(&self, name: &str) -> Result<HostRepository, IntegrationError>;

    /// Resolve a symbolic ref (e.g. `heads/master`) to a commit
    async fn get_sha(&self, repo: &str, ref_name: &str) -> Result<String, IntegrationError>;

    /// Names of heads and tags pointing at `sha`, without the `refs/` prefix
    async fn get_refs(&self, repo: &str, sha: &str) -> Result<Vec<String>, IntegrationError>;

    /// File contents at a ref or SHA; `NotFound` if the file is absent
    async fn get_file(&self, repo: &str, git_ref: &str, path: &str)
        -> Result<Vec<u8>, IntegrationError>;

    /// Paths changed between two commits
    async fn get_diff_files(
        &self,
        repo: &str,
        base: &str,
        head: &str,
    ) -> Result<Vec<String>, IntegrationError>;

    /// Every file path in the tree at `sha`
    async fn get_file_list(&self, repo: &str, sha: &str) -> Result<Vec<String>, IntegrationError>;

    async fn set_status(
        &self,
        target: &StatusTarget,
        state: CommitState,
    ) -> Result<(), IntegrationError>;

    /// Overwrite every status on `sha` with an error noting it was superseded
    async fn clear_states(&self, repo: &str, sha: &str) -> Result<(), IntegrationError>;

    /// Leave a comment on a pull request
    async fn comment_error(
        &self,
        repo: &str,
        ticket_id: i64,
        message: &str,
    ) -> Result<(), IntegrationError>;
}

/// Produces a host client acting with the given credentials
pub trait VcsClientFactory: Send + Sync {
    fn client(&self, token: &OAuthToken) -> Arc<dyn VcsClient>;
}
