//! Scheduler errors

use std::fmt;

use thiserror::Error;

use crate::db::StoreError;
use crate::domain::{SettingsError, ValidationError};
use crate::integrations::IntegrationError;

/// Processing stage of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Validating,
    ResolvingRepositories,
    ResolvingRefs,
    LoadingConfig,
    SelectingTasks,
    CancelingPrevious,
    Materializing,
    Done,
    Failed,
}

impl SubmissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionState::Validating => "validating",
            SubmissionState::ResolvingRepositories => "resolving repositories",
            SubmissionState::ResolvingRefs => "resolving refs",
            SubmissionState::LoadingConfig => "loading config",
            SubmissionState::SelectingTasks => "selecting tasks",
            SubmissionState::CancelingPrevious => "canceling previous",
            SubmissionState::Materializing => "materializing",
            SubmissionState::Done => "done",
            SubmissionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification for mapping onto transport status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Precondition,
    Descriptor,
    Conflict,
    External,
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("{state}: {source}")]
    Stage {
        state: SubmissionState,
        #[source]
        source: Box<SubmitError>,
    },

    #[error("validating submission: {0}")]
    Validation(#[from] ValidationError),

    #[error("repository {0:?} is not enabled")]
    NotEnabled(String),

    #[error("no owner for repository {0:?}")]
    NoOwner(String),

    #[error("user {0:?} has no VCS credentials")]
    MissingCredentials(String),

    #[error("{context}: retry exhausted")]
    RetryExhausted { context: String },

    #[error("invalid repository configuration: {0}")]
    RepoConfig(#[source] SettingsError),

    #[error("validating task settings for directory {dir:?}: {source}")]
    Descriptor {
        dir: String,
        #[source]
        source: SettingsError,
    },

    #[error("{context}: {source}")]
    Vcs {
        context: String,
        #[source]
        source: IntegrationError,
    },

    #[error("{context}: {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },
}

impl SubmitError {
    /// Adapter for `map_err` on host calls
    pub fn vcs(context: impl Into<String>) -> impl FnOnce(IntegrationError) -> SubmitError {
        let context = context.into();
        move |source| SubmitError::Vcs { context, source }
    }

    /// Adapter for `map_err` on store calls
    pub fn store(context: impl Into<String>) -> impl FnOnce(StoreError) -> SubmitError {
        let context = context.into();
        move |source| SubmitError::Store { context, source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SubmitError::Stage { source, .. } => source.kind(),
            SubmitError::Validation(_) => ErrorKind::Validation,
            SubmitError::NotEnabled(_)
            | SubmitError::NoOwner(_)
            | SubmitError::MissingCredentials(_) => ErrorKind::Precondition,
            SubmitError::RetryExhausted { .. } => ErrorKind::Conflict,
            SubmitError::RepoConfig(_) | SubmitError::Descriptor { .. } => ErrorKind::Descriptor,
            SubmitError::Vcs { source, .. } => match source {
                IntegrationError::NotFound(_) => ErrorKind::NotFound,
                IntegrationError::InvalidRepository(_) => ErrorKind::Validation,
                _ => ErrorKind::External,
            },
            SubmitError::Store { source, .. } => match source {
                StoreError::NotFound(_) => ErrorKind::NotFound,
                StoreError::AlreadyExists(_) => ErrorKind::Conflict,
                _ => ErrorKind::External,
            },
        }
    }

    /// Stage the failure happened in, if recorded
    pub fn state(&self) -> Option<SubmissionState> {
        match self {
            SubmitError::Stage { state, .. } => Some(*state),
            _ => None,
        }
    }

    /// The underlying error with stage wrapping removed
    pub fn root(&self) -> &SubmitError {
        match self {
            SubmitError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}
