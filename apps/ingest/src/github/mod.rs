//! GitHub client: issue listing (REST `since` queries and GraphQL cursor
//! paging) and the issue writes moderation performs.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

pub mod pagination;
pub mod queries;
pub mod types;

use crate::models::issue::{IssuePayload, RepoRef};
use crate::moderation::tracker::IssueTracker;
use crate::sync::models::RepoSyncConfig;
use crate::sync::source::UpstreamSource;
use pagination::{collect_pages, Page};
use queries::ISSUES_PAGE_QUERY;
use types::{GraphQlResponse, IssuesPageData, RestIssue};

const GITHUB_API_URL: &str = "https://api.github.com";
const GITHUB_GRAPHQL_URL: &str = "https://api.github.com/graphql";
const GITHUB_API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("jokebox-ingest/", env!("CARGO_PKG_VERSION"));
pub const PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("GraphQL error: {0}")]
    GraphQl(String),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("repository {0} not found")]
    RepoNotFound(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    token: String,
}

impl GitHubClient {
    pub fn new(client: Client, token: String) -> Self {
        Self { client, token }
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header("accept", "application/vnd.github+json")
            .header("x-github-api-version", GITHUB_API_VERSION)
            .header("user-agent", USER_AGENT)
    }

    /// `https://api.github.com/repos/{owner}/{name}/issues/{segments...}` with
    /// every segment percent-encoded (labels may be non-ASCII).
    fn issues_url(&self, repo: &RepoRef, segments: &[&str]) -> Result<Url, GitHubError> {
        let mut url =
            Url::parse(GITHUB_API_URL).map_err(|e| GitHubError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| GitHubError::InvalidUrl(GITHUB_API_URL.to_string()))?
            .extend(["repos", repo.owner.as_str(), repo.name.as_str(), "issues"])
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, GitHubError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        Err(GitHubError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GitHubError> {
        let body = self.send(request).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Issues updated at or after `since`, optionally restricted to one label.
    /// Walks numbered pages until a short page comes back.
    pub async fn list_issues_since(
        &self,
        repo: &RepoRef,
        label: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<IssuePayload>, GitHubError> {
        let url = self.issues_url(repo, &[])?;
        let since = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut issues = Vec::new();
        let mut page = 1u32;

        loop {
            let mut query = vec![
                ("state", "all".to_string()),
                ("since", since.clone()),
                ("sort", "updated".to_string()),
                ("direction", "asc".to_string()),
                ("per_page", PAGE_SIZE.to_string()),
                ("page", page.to_string()),
            ];
            if let Some(label) = label {
                query.push(("labels", label.to_string()));
            }

            let batch: Vec<RestIssue> = self
                .send_json(self.request(Method::GET, url.clone()).query(&query))
                .await?;
            let fetched = batch.len();
            issues.extend(batch.into_iter().filter_map(|i| i.into_payload(repo)));
            debug!("Fetched page {page} of {repo} since {since}: {fetched} issues");

            if fetched < PAGE_SIZE as usize {
                break;
            }
            page += 1;
        }

        Ok(issues)
    }

    async fn issues_page(
        &self,
        repo: &RepoRef,
        labels: &[String],
        cursor: Option<String>,
    ) -> Result<Page<IssuePayload>, GitHubError> {
        let url =
            Url::parse(GITHUB_GRAPHQL_URL).map_err(|e| GitHubError::InvalidUrl(e.to_string()))?;
        let labels = if labels.is_empty() {
            serde_json::Value::Null
        } else {
            json!(labels)
        };
        let body = json!({
            "query": ISSUES_PAGE_QUERY,
            "variables": {
                "owner": repo.owner,
                "name": repo.name,
                "labels": labels,
                "first": PAGE_SIZE,
                "cursor": cursor,
            }
        });

        let response: GraphQlResponse<IssuesPageData> =
            self.send_json(self.request(Method::POST, url).json(&body)).await?;
        if !response.errors.is_empty() {
            let messages: Vec<String> = response.errors.into_iter().map(|e| e.message).collect();
            return Err(GitHubError::GraphQl(messages.join("; ")));
        }
        let repository = response
            .data
            .and_then(|d| d.repository)
            .ok_or_else(|| GitHubError::RepoNotFound(repo.full_name()))?;
        Ok(repository.issues.into_page(repo))
    }

    /// Every issue carrying any of `labels` (all issues when empty).
    pub async fn list_issues(
        &self,
        repo: &RepoRef,
        labels: &[String],
    ) -> Result<Vec<IssuePayload>, GitHubError> {
        let issues = collect_pages(|cursor| self.issues_page(repo, labels, cursor)).await?;
        info!("Fetched {} issues from {repo}", issues.len());
        Ok(issues)
    }
}

#[async_trait]
impl IssueTracker for GitHubClient {
    async fn add_labels(&self, repo: &RepoRef, number: u64, labels: &[&str]) -> Result<(), GitHubError> {
        let url = self.issues_url(repo, &[&number.to_string(), "labels"])?;
        self.send(self.request(Method::POST, url).json(&json!({ "labels": labels })))
            .await?;
        Ok(())
    }

    async fn remove_label(&self, repo: &RepoRef, number: u64, label: &str) -> Result<(), GitHubError> {
        let url = self.issues_url(repo, &[&number.to_string(), "labels", label])?;
        match self.send(self.request(Method::DELETE, url)).await {
            Ok(_) => Ok(()),
            Err(GitHubError::Api { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn comment(&self, repo: &RepoRef, number: u64, body: &str) -> Result<(), GitHubError> {
        let url = self.issues_url(repo, &[&number.to_string(), "comments"])?;
        self.send(self.request(Method::POST, url).json(&json!({ "body": body })))
            .await?;
        Ok(())
    }

    async fn close(&self, repo: &RepoRef, number: u64) -> Result<(), GitHubError> {
        let url = self.issues_url(repo, &[&number.to_string()])?;
        self.send(self.request(Method::PATCH, url).json(&json!({ "state": "closed" })))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UpstreamSource for GitHubClient {
    /// The REST `labels` filter is an AND, so each label is queried on its
    /// own and the results merged to match GraphQL's any-label semantics.
    async fn issues_updated_since(
        &self,
        repo: &RepoSyncConfig,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<IssuePayload>> {
        let repo_ref = repo.repo_ref();
        if repo.labels.is_empty() {
            return Ok(self.list_issues_since(&repo_ref, None, since).await?);
        }

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for label in &repo.labels {
            for issue in self.list_issues_since(&repo_ref, Some(label), since).await? {
                if seen.insert(issue.id.clone()) {
                    merged.push(issue);
                }
            }
        }
        Ok(merged)
    }

    async fn all_issues(&self, repo: &RepoSyncConfig) -> anyhow::Result<Vec<IssuePayload>> {
        Ok(self.list_issues(&repo.repo_ref(), &repo.labels).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GitHubClient {
        GitHubClient::new(Client::new(), "token".to_string())
    }

    fn repo() -> RepoRef {
        RepoRef {
            owner: "jokebox".to_string(),
            name: "jokes".to_string(),
        }
    }

    #[test]
    fn test_issues_url_encodes_label_segments() {
        let url = client()
            .issues_url(&repo(), &["12", "labels", "梗图"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/jokebox/jokes/issues/12/labels/%E6%A2%97%E5%9B%BE"
        );
    }

    #[test]
    fn test_issues_url_without_segments() {
        let url = client().issues_url(&repo(), &[]).unwrap();
        assert_eq!(url.as_str(), "https://api.github.com/repos/jokebox/jokes/issues");
    }
}
