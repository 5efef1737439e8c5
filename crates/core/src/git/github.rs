//! GitHub REST API client for opening rebase pull requests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::GitHubConfig;
use crate::errors::CodeHostError;

/// Parameters of a pull request to open.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
    pub draft: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: String,
}

/// Where pull requests are opened.
#[async_trait]
pub trait CodeHost: Send + Sync {
    async fn create_pull_request(&self, pr: &NewPullRequest) -> Result<PullRequest, CodeHostError>;

    /// Ask `users` and `teams` (team slugs) to review pull request `number`.
    async fn request_reviewers(
        &self,
        number: u64,
        users: &[String],
        teams: &[String],
    ) -> Result<(), CodeHostError>;
}

/// Asynchronous GitHub REST API client bound to one repository.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    repo: String,
    token: String,
}

impl GitHubClient {
    pub fn new(
        api_url: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CodeHostError> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let repo = repo.into();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("rebaiser/0.1"));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        info!(api_url = %api_url, repo = %repo, "created GitHubClient");
        Ok(Self {
            http,
            api_url,
            repo,
            token: token.into(),
        })
    }

    /// Build from the `github` section; fails without a token.
    pub fn from_config(config: &GitHubConfig) -> Result<Self, CodeHostError> {
        let token = config.token.clone().ok_or_else(|| {
            CodeHostError::AuthenticationFailed("no GitHub token configured".into())
        })?;
        Self::new(
            config.api_url.clone(),
            config.repo.clone(),
            token,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn pulls_url(&self) -> String {
        format!("{}/repos/{}/pulls", self.api_url, self.repo)
    }

    async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, CodeHostError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(CodeHostError::AuthenticationFailed(format!(
                "HTTP {}",
                status
            )));
        }
        if status.as_u16() == 429 {
            let reset = resp
                .headers()
                .get("x-ratelimit-reset")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown")
                .to_string();
            return Err(CodeHostError::RateLimited { reset_at: reset });
        }
        let body = resp.text().await.unwrap_or_default();
        Err(CodeHostError::ApiError {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl CodeHost for GitHubClient {
    #[instrument(skip(self, pr), fields(repo = %self.repo, head = %pr.head, base = %pr.base))]
    async fn create_pull_request(&self, pr: &NewPullRequest) -> Result<PullRequest, CodeHostError> {
        let resp = self
            .http
            .post(self.pulls_url())
            .bearer_auth(&self.token)
            .json(pr)
            .send()
            .await?;
        let resp = Self::check_response(resp).await?;
        let created: PullRequest = resp.json().await?;
        info!(number = created.number, url = %created.html_url, "created pull request");
        Ok(created)
    }

    #[instrument(skip(self), fields(repo = %self.repo))]
    async fn request_reviewers(
        &self,
        number: u64,
        users: &[String],
        teams: &[String],
    ) -> Result<(), CodeHostError> {
        if users.is_empty() && teams.is_empty() {
            debug!("no reviewers to request");
            return Ok(());
        }
        let url = format!("{}/{}/requested_reviewers", self.pulls_url(), number);
        let payload = reviewers_payload(users, teams);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        Self::check_response(resp).await?;
        info!(number, "requested reviewers");
        Ok(())
    }
}

/// Team slugs may be given as `org/team`; the API wants only `team`.
fn reviewers_payload(users: &[String], teams: &[String]) -> serde_json::Value {
    let team_slugs: Vec<&str> = teams
        .iter()
        .map(|t| t.rsplit('/').next().unwrap_or(t))
        .collect();
    serde_json::json!({ "reviewers": users, "team_reviewers": team_slugs })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reviewers_payload_strips_org() {
        let payload = reviewers_payload(
            &["octocat".to_string()],
            &["acme/firmware".to_string(), "platform".to_string()],
        );
        assert_eq!(payload["reviewers"][0], "octocat");
        assert_eq!(payload["team_reviewers"][0], "firmware");
        assert_eq!(payload["team_reviewers"][1], "platform");
    }

    #[test]
    fn test_new_pull_request_serialization() {
        let pr = NewPullRequest {
            title: "AI-assisted rebase - 2025-01-01".into(),
            body: "body".into(),
            head: "ai-rebase-1".into(),
            base: "main".into(),
            draft: true,
        };
        let json = serde_json::to_value(&pr).unwrap();
        assert_eq!(json["head"], "ai-rebase-1");
        assert_eq!(json["draft"], true);
    }

    #[test]
    fn test_from_config_requires_token() {
        let config = GitHubConfig::default();
        assert!(matches!(
            GitHubClient::from_config(&config),
            Err(CodeHostError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn test_pulls_url() {
        let client = GitHubClient::new(
            "https://api.github.com/",
            "acme/internal",
            "tok",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.pulls_url(), "https://api.github.com/repos/acme/internal/pulls");
    }
}
