//! Submission scheduler - turns a submission into queue items
//!
//! This module provides:
//! - `SubmissionProcessor`: Runs a submission through every stage
//! - `RepositoryResolver` / `RefResolver`: Find or create repositories and refs
//! - `TaskSelector`: Picks task directories and expands dependencies
//! - `StatusNotifier`: Posts commit statuses in the background

mod cancellation;
mod discovery;
mod error;
mod materialize;
mod processor;
mod refs;
mod repo_config;
mod repositories;
mod selection;
mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use cancellation::CancellationCoordinator;
pub use discovery::{Discovered, TaskDiscoverer};
pub use error::{ErrorKind, SubmissionState, SubmitError};
pub use materialize::TaskMaterializer;
pub use processor::{Processed, SubmissionProcessor};
pub use refs::RefResolver;
pub use repo_config::RepoConfigLoader;
pub use repositories::{RepositoryResolver, ResolvedRepositories};
pub use selection::{DescriptorSource, TaskSelector};
pub use status::{StatusNotifier, StatusPosts, GLOBAL_CONTEXT};
