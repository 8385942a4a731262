//! ci-dispatch - CI submission resolution and task selection

pub mod config;
pub mod db;
pub mod domain;
pub mod integrations;
pub mod queue;
pub mod scheduler;
