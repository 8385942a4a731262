//! Domain models for ci-dispatch

mod git_ref;
pub mod names;
mod repository;
mod settings;
mod submission;
mod task;

pub use git_ref::*;
pub use names::ValidationError;
pub use repository::*;
pub use settings::*;
pub use submission::*;
pub use task::*;
