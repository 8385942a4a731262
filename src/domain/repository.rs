//! Repository and user domain model

use serde::{Deserialize, Serialize};

use super::names::DEFAULT_MAIN_BRANCH;

/// VCS access token for a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub token: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// A user known to the system; owners act on behalf of repositories
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub token: Option<OAuthToken>,
}

impl User {
    pub fn new(username: impl Into<String>, token: Option<OAuthToken>) -> Self {
        Self {
            id: 0,
            username: username.into(),
            token,
        }
    }
}

/// Repository metadata as reported by the VCS host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRepository {
    pub full_name: String,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub private: bool,
}

impl HostRepository {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            ..Default::default()
        }
    }

    /// The default branch in `heads/<branch>` form
    pub fn main_branch(&self) -> String {
        match self.default_branch.as_deref() {
            Some(branch) if !branch.is_empty() => format!("heads/{}", branch),
            _ => DEFAULT_MAIN_BRANCH.to_string(),
        }
    }
}

/// A persisted repository record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub id: i64,
    pub name: String,
    pub owner: Option<User>,
    pub disabled: bool,
    pub private: bool,
    pub auto_created: bool,
    pub host: HostRepository,
}

impl Repository {
    /// Build an unsaved record from host metadata
    pub fn from_host(host: &HostRepository, owner: Option<User>, auto_created: bool) -> Self {
        Self {
            id: 0,
            name: host.full_name.clone(),
            owner,
            // created repositories stay disabled until someone enables them
            disabled: true,
            private: host.private,
            auto_created,
            host: host.clone(),
        }
    }

    /// Token of the owning user, if there is one
    pub fn owner_token(&self) -> Option<&OAuthToken> {
        self.owner.as_ref().and_then(|o| o.token.as_ref())
    }
}
