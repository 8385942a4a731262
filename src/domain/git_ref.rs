//! Ref domain model

use serde::{Deserialize, Serialize};

use super::Repository;

/// An immutable (repository, commit) pairing with an advisory ref name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ref {
    pub id: i64,
    pub repository: Repository,
    pub ref_name: String,
    pub sha: String,
}

impl Ref {
    pub fn new(repository: Repository, ref_name: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            id: 0,
            repository,
            ref_name: ref_name.into(),
            sha: sha.into(),
        }
    }
}

/// Pick the ref name for a commit from the names the host reports.
///
/// The lexicographically smallest name wins; with no names the SHA itself
/// is used.
pub fn select_ref_name(mut names: Vec<String>, sha: &str) -> String {
    names.sort();
    names.into_iter().next().unwrap_or_else(|| sha.to_string())
}
