//! GitHub REST client

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};

use super::{CommitState, IntegrationError, StatusTarget, VcsClient, VcsClientFactory};
use crate::domain::names::{is_zero_sha, owner_repo};
use crate::domain::{HostRepository, OAuthToken};

/// GitHub caps status descriptions at 140 characters
const MAX_STATUS_DESCRIPTION: usize = 140;

const STATUS_PAGE_SIZE: usize = 100;

const OVERRIDDEN_DESCRIPTION: &str = "The run that this test was a part of has been overridden by a new run. Pushing a new change will remove this error.";

#[derive(Debug, Clone, Deserialize)]
struct RepositoryResponse {
    full_name: String,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    fork: bool,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    parent: Option<ParentResponse>,
}

#[derive(Debug, Clone, Deserialize)]
struct ParentResponse {
    full_name: String,
}

impl RepositoryResponse {
    fn to_host_repository(&self) -> HostRepository {
        HostRepository {
            full_name: self.full_name.clone(),
            default_branch: self.default_branch.clone(),
            fork: self.fork,
            parent: self.parent.as_ref().map(|p| p.full_name.clone()),
            private: self.private,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GitObject {
    sha: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RefResponse {
    #[serde(rename = "ref")]
    name: String,
    object: GitObject,
}

#[derive(Debug, Clone, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct CompareFile {
    filename: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CompareResponse {
    #[serde(default)]
    files: Vec<CompareFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RepoStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    target_url: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    context: String,
}

/// GitHub client acting with a single user's token
#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    token: Option<String>,
    api_url: String,
    readonly: bool,
}

impl GitHubClient {
    pub fn new(token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            token,
            api_url: "https://api.github.com".to_string(),
            readonly: false,
        }
    }

    /// Create a client with a custom API URL (for GitHub Enterprise)
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Suppress every write call
    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    fn with_http_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn repo_url(&self, name: &str) -> Result<String, IntegrationError> {
        let (owner, repo) = owner_repo(name)?;
        Ok(format!("{}/repos/{}/{}", self.api_url, owner, repo))
    }

    fn build_request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "ci-dispatch/0.1.0")
            .header("X-GitHub-Api-Version", "2022-11-28");

        if let Some(ref token) = self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        req
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, IntegrationError> {
        let response = self.build_request(Method::GET, url).send().await?;
        let response = self.check_status(response, url).await?;
        response
            .json()
            .await
            .map_err(|e| IntegrationError::ParseError(e.to_string()))
    }

    async fn post_json<B: Serialize>(&self, url: &str, body: &B) -> Result<(), IntegrationError> {
        let response = self.build_request(Method::POST, url).json(body).send().await?;
        self.check_status(response, url).await?;
        Ok(())
    }

    async fn check_status(
        &self,
        response: reqwest::Response,
        url: &str,
    ) -> Result<reqwest::Response, IntegrationError> {
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(IntegrationError::NotFound(url.to_string()));
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(IntegrationError::AuthRequired);
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || (status == reqwest::StatusCode::FORBIDDEN
                && response.headers().get("x-ratelimit-remaining").and_then(|h| h.to_str().ok())
                    == Some("0"))
        {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(IntegrationError::RateLimited { retry_after });
        }

        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(IntegrationError::AuthRequired);
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(IntegrationError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }

        Ok(response)
    }

    async fn list_statuses(&self, repo: &str, sha: &str) -> Result<Vec<RepoStatus>, IntegrationError> {
        let base = format!("{}/commits/{}/statuses", self.repo_url(repo)?, sha);
        let mut statuses = Vec::new();

        for page in 1.. {
            let url = format!("{}?per_page={}&page={}", base, STATUS_PAGE_SIZE, page);
            let batch: Vec<RepoStatus> = self.get_json(&url).await?;
            let done = batch.len() < STATUS_PAGE_SIZE;
            statuses.extend(batch);
            if done {
                break;
            }
        }

        Ok(statuses)
    }
}

/// Truncate a status description to what GitHub accepts
pub fn cap_description(description: &str) -> String {
    description.chars().take(MAX_STATUS_DESCRIPTION).collect()
}

#[async_trait]
impl VcsClient for GitHubClient {
    async fn get_repository(&self, name: &str) -> Result<HostRepository, IntegrationError> {
        let url = self.repo_url(name)?;
        let repo: RepositoryResponse = self.get_json(&url).await?;
        Ok(repo.to_host_repository())
    }

    async fn get_sha(&self, repo: &str, ref_name: &str) -> Result<String, IntegrationError> {
        let url = format!("{}/git/ref/{}", self.repo_url(repo)?, ref_name);
        let git_ref: RefResponse = self.get_json(&url).await?;
        Ok(git_ref.object.sha)
    }

    async fn get_refs(&self, repo: &str, sha: &str) -> Result<Vec<String>, IntegrationError> {
        let base = format!("{}/git/refs", self.repo_url(repo)?);
        let mut names = Vec::new();

        for page in 1.. {
            let url = format!("{}?per_page=100&page={}", base, page);
            let refs: Vec<RefResponse> = self.get_json(&url).await?;
            let done = refs.len() < 100;

            names.extend(
                refs.into_iter()
                    .filter(|r| r.object.sha == sha)
                    .map(|r| r.name.strip_prefix("refs/").unwrap_or(&r.name).to_string()),
            );

            if done {
                break;
            }
        }

        Ok(names)
    }

    async fn get_file(
        &self,
        repo: &str,
        git_ref: &str,
        path: &str,
    ) -> Result<Vec<u8>, IntegrationError> {
        let url = format!("{}/contents/{}?ref={}", self.repo_url(repo)?, path, git_ref);
        let response = self
            .build_request(Method::GET, &url)
            .header("Accept", "application/vnd.github.raw")
            .send()
            .await?;
        let response = self.check_status(response, &url).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn get_diff_files(
        &self,
        repo: &str,
        base: &str,
        head: &str,
    ) -> Result<Vec<String>, IntegrationError> {
        if is_zero_sha(base) {
            return self.get_file_list(repo, head).await;
        }

        if is_zero_sha(head) {
            return Err(IntegrationError::Other("branch deleted".to_string()));
        }

        let url = format!("{}/compare/{}...{}", self.repo_url(repo)?, base, head);
        let compare: CompareResponse = self.get_json(&url).await?;
        Ok(compare.files.into_iter().map(|f| f.filename).collect())
    }

    async fn get_file_list(&self, repo: &str, sha: &str) -> Result<Vec<String>, IntegrationError> {
        let url = format!("{}/git/trees/{}?recursive=1", self.repo_url(repo)?, sha);
        let tree: TreeResponse = self.get_json(&url).await?;

        if tree.truncated {
            tracing::warn!(repo, sha, "Tree listing was truncated by the host");
        }

        Ok(tree
            .tree
            .into_iter()
            .filter(|e| e.kind == "blob")
            .map(|e| e.path)
            .collect())
    }

    async fn set_status(
        &self,
        target: &StatusTarget,
        state: CommitState,
    ) -> Result<(), IntegrationError> {
        if self.readonly {
            return Ok(());
        }

        let url = format!(
            "{}/repos/{}/{}/statuses/{}",
            self.api_url, target.owner, target.repo, target.sha
        );

        let body = RepoStatus {
            state: state.state().to_string(),
            target_url: Some(target.url.clone()),
            description: Some(cap_description(&state.description())),
            context: target.context.clone(),
        };

        self.post_json(&url, &body).await
    }

    async fn clear_states(&self, repo: &str, sha: &str) -> Result<(), IntegrationError> {
        if self.readonly {
            return Ok(());
        }

        let statuses = self.list_statuses(repo, sha).await?;
        let url = format!("{}/statuses/{}", self.repo_url(repo)?, sha);
        let mut seen = HashSet::new();

        for mut status in statuses {
            // the context must be kept for the status to be overwritten
            if !seen.insert(status.context.clone()) {
                continue;
            }

            status.state = "error".to_string();
            status.description = Some(OVERRIDDEN_DESCRIPTION.to_string());
            self.post_json(&url, &status).await?;
        }

        Ok(())
    }

    async fn comment_error(
        &self,
        repo: &str,
        ticket_id: i64,
        message: &str,
    ) -> Result<(), IntegrationError> {
        if self.readonly {
            return Ok(());
        }

        let url = format!("{}/issues/{}/comments", self.repo_url(repo)?, ticket_id);
        self.post_json(&url, &serde_json::json!({ "body": message })).await
    }
}

/// Builds [`GitHubClient`]s that share one connection pool
#[derive(Clone)]
pub struct GitHubClientFactory {
    client: Client,
    api_url: String,
    readonly: bool,
}

impl GitHubClientFactory {
    pub fn new(api_url: impl Into<String>, readonly: bool) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into(),
            readonly,
        }
    }
}

impl VcsClientFactory for GitHubClientFactory {
    fn client(&self, token: &OAuthToken) -> Arc<dyn VcsClient> {
        Arc::new(
            GitHubClient::new(Some(token.token.clone()))
                .with_http_client(self.client.clone())
                .with_api_url(self.api_url.clone())
                .with_readonly(self.readonly),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_description() {
        let long = "x".repeat(200);
        assert_eq!(cap_description(&long).len(), 140);
        assert_eq!(cap_description("short"), "short");

        let wide = "é".repeat(150);
        assert_eq!(cap_description(&wide).chars().count(), 140);
    }

    #[test]
    fn test_repo_url() {
        let client = GitHubClient::new(None).with_api_url("https://ghe.example.com/api/v3/");
        assert_eq!(
            client.repo_url("erikh/foo").unwrap(),
            "https://ghe.example.com/api/v3/repos/erikh/foo"
        );
        assert!(matches!(
            client.repo_url("erikh"),
            Err(IntegrationError::InvalidRepository(_))
        ));
    }

    #[test]
    fn test_repository_response_conversion() {
        let json = r#"{
            "full_name": "erikh2/foo",
            "default_branch": "main",
            "fork": true,
            "private": false,
            "parent": { "full_name": "erikh/foo" }
        }"#;
        let repo: RepositoryResponse = serde_json::from_str(json).unwrap();
        let host = repo.to_host_repository();
        assert_eq!(host.full_name, "erikh2/foo");
        assert_eq!(host.main_branch(), "heads/main");
        assert!(host.fork);
        assert_eq!(host.parent.as_deref(), Some("erikh/foo"));
    }

    #[tokio::test]
    async fn test_readonly_suppresses_writes() {
        let client = GitHubClient::new(None)
            .with_api_url("http://127.0.0.1:9")
            .with_readonly(true);
        let target = StatusTarget::new("erikh/foo", "*root*:test", "abc", "http://x").unwrap();

        assert!(client.set_status(&target, CommitState::Pending).await.is_ok());
        assert!(client.clear_states("erikh/foo", "abc").await.is_ok());
        assert!(client.comment_error("erikh/foo", 1, "boom").await.is_ok());
    }
}
