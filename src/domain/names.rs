//! Repository names, SHAs, branch names and task directory paths

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Name of the per-directory task descriptor
pub const TASK_DESCRIPTOR: &str = "task.yml";

/// Name of the repository-wide configuration file
pub const REPO_CONFIG_FILE: &str = "tinyci.yml";

/// Ref used when the host reports no default branch
pub const DEFAULT_MAIN_BRANCH: &str = "heads/master";

/// Display alias for the repository root directory
pub const ROOT_ALIAS: &str = "*root*";

/// Errors produced while validating names and refs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("parsing repository name {0:?}: invalid number of parts")]
    RepoNameParts(String),

    #[error("repository name {0:?} has an empty part")]
    RepoNameEmptyPart(String),

    #[error("repository name {0:?} contains invalid characters")]
    RepoNameCharacters(String),

    #[error("invalid branch name {0:?}")]
    InvalidBranch(String),

    #[error("{0}")]
    Submission(String),
}

fn sha_pattern() -> Option<&'static Regex> {
    static SHA: OnceLock<Option<Regex>> = OnceLock::new();
    SHA.get_or_init(|| Regex::new("^[0-9a-fA-F]{40}$").ok()).as_ref()
}

/// Split an `owner/name` repository name into its parts
pub fn owner_repo(name: &str) -> Result<(&str, &str), ValidationError> {
    let parts: Vec<&str> = name.split('/').collect();
    if parts.len() != 2 {
        return Err(ValidationError::RepoNameParts(name.to_string()));
    }

    for part in &parts {
        if part.is_empty() {
            return Err(ValidationError::RepoNameEmptyPart(name.to_string()));
        }
        if part.starts_with('.')
            || part.ends_with('.')
            || part.contains(&['<', '>', '&', '%'][..])
        {
            return Err(ValidationError::RepoNameCharacters(name.to_string()));
        }
    }

    Ok((parts[0], parts[1]))
}

pub fn is_owner_repo(name: &str) -> bool {
    owner_repo(name).is_ok()
}

/// True if the string looks like a full SHA-1 digest
pub fn is_sha(sha: &str) -> bool {
    sha_pattern().is_some_and(|re| re.is_match(sha))
}

/// True for the all-zero SHA the host sends for new or deleted branches
pub fn is_zero_sha(sha: &str) -> bool {
    sha.len() == 40 && sha.bytes().all(|b| b == b'0')
}

/// Normalize a branch name into `heads/<branch>` form.
///
/// `refs/heads/` is stripped, `.`/`..`/empty segments are dropped and a
/// leading `/` is rejected.
pub fn qualify_branch(branch: &str) -> Result<String, ValidationError> {
    if is_sha(branch) {
        return Err(ValidationError::InvalidBranch(format!(
            "{} is a sha, not a branch",
            branch
        )));
    }

    if branch.starts_with('/') {
        return Err(ValidationError::InvalidBranch(branch.to_string()));
    }

    let trimmed = branch.trim();
    let trimmed = trimmed.strip_prefix("refs/heads/").unwrap_or(trimmed);

    let cleaned: Vec<&str> = trimmed
        .split('/')
        .map(str::trim)
        .filter(|p| !p.is_empty() && *p != "." && *p != "..")
        .collect();

    match cleaned.as_slice() {
        [] | ["heads"] => Err(ValidationError::InvalidBranch(branch.to_string())),
        ["heads", ..] => Ok(cleaned.join("/")),
        _ => Ok(format!("heads/{}", cleaned.join("/"))),
    }
}

/// Directory portion of a slash-separated repository path (`.` for top level)
pub fn parent_dir(path: &str) -> String {
    let path = path.trim_end_matches('/');
    match path.rsplit_once('/') {
        Some(("", _)) => "/".to_string(),
        Some((dir, _)) => dir.to_string(),
        None => ".".to_string(),
    }
}

/// Last segment of a slash-separated repository path
pub fn base_name(path: &str) -> &str {
    let path = path.trim_end_matches('/');
    path.rsplit_once('/').map(|(_, base)| base).unwrap_or(path)
}

/// Canonical form of a task directory as declared in a descriptor
pub fn normalize_dir(dir: &str) -> String {
    let mut dir = dir.trim();
    while let Some(rest) = dir.strip_prefix("./") {
        dir = rest;
    }
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        ".".to_string()
    } else {
        dir.to_string()
    }
}

/// Path of the task descriptor inside a task directory
pub fn descriptor_path(dir: &str) -> String {
    if dir == "." || dir.is_empty() {
        TASK_DESCRIPTOR.to_string()
    } else {
        format!("{}/{}", dir, TASK_DESCRIPTOR)
    }
}

/// Display alias used in run names; the root directory becomes `*root*`
pub fn dir_alias(dir: &str) -> &str {
    if dir == "." || dir.is_empty() {
        ROOT_ALIAS
    } else {
        dir
    }
}

/// True if `dir` is `ancestor` or lies beneath it
pub fn is_within(dir: &str, ancestor: &str) -> bool {
    if ancestor == "." {
        return true;
    }
    dir == ancestor
        || dir
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}
