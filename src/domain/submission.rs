//! Submission input and the persisted submission record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::names::{is_owner_repo, is_sha, qualify_branch, ValidationError};
use super::{Ref, User};

/// A request to evaluate a commit for CI work
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    /// Parent repository; may be empty for manual submissions
    #[serde(default)]
    pub parent: String,
    pub fork: String,
    /// Head commit, or a branch name to resolve against the fork
    pub head_sha: String,
    #[serde(default)]
    pub base_sha: String,
    /// Pull request number; 0 when there is none
    #[serde(default)]
    pub ticket_id: i64,
    #[serde(default)]
    pub submitted_by: String,
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub manual: bool,
}

impl Submission {
    /// Check the submission and return it with branch names qualified.
    ///
    /// Performs no I/O; a submission that fails here has had no side effects.
    pub fn validated(mut self) -> Result<Self, ValidationError> {
        self.head_sha = self.head_sha.trim().to_string();
        self.base_sha = self.base_sha.trim().to_string();

        if !self.manual && !is_owner_repo(&self.parent) {
            return Err(invalid("parent is invalid"));
        }

        if self.manual && !self.parent.is_empty() && !is_owner_repo(&self.parent) {
            return Err(invalid("parent is invalid"));
        }

        if self.all && !self.manual {
            return Err(invalid("hook-triggered submissions may not force all"));
        }

        if !is_owner_repo(&self.fork) {
            return Err(invalid("fork is invalid"));
        }

        if self.head_sha.is_empty() {
            return Err(invalid("head sha is empty"));
        }

        if !is_sha(&self.head_sha) {
            self.head_sha = qualify_branch(&self.head_sha)?;
        }

        if !self.manual {
            if self.base_sha.is_empty() {
                return Err(invalid("base sha is empty"));
            }
            if !is_sha(&self.base_sha) {
                self.base_sha = qualify_branch(&self.base_sha)?;
            }
        }

        if self.manual && self.submitted_by.is_empty() {
            return Err(invalid("invalid submission -- no `submitted by` field supplied"));
        }

        Ok(self)
    }
}

fn invalid(msg: &str) -> ValidationError {
    ValidationError::Submission(msg.to_string())
}

/// Durable anchor every task of one processed event links to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub id: i64,
    pub ticket_id: i64,
    pub user: Option<User>,
    pub head_ref: Ref,
    pub base_ref: Ref,
    pub created_at: DateTime<Utc>,
}

impl SubmissionRecord {
    pub fn new(ticket_id: i64, user: Option<User>, head_ref: Ref, base_ref: Ref) -> Self {
        Self {
            id: 0,
            ticket_id,
            user,
            head_ref,
            base_ref,
            created_at: Utc::now(),
        }
    }
}
