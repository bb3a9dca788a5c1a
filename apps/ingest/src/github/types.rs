//! Wire shapes of GitHub REST and GraphQL responses, and their conversion
//! into [`IssuePayload`].

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::github::pagination::Page;
use crate::models::issue::{IssueAuthor, IssuePayload, IssueState, RepoRef};

const GHOST_LOGIN: &str = "ghost";

fn ghost_author() -> IssueAuthor {
    IssueAuthor {
        login: GHOST_LOGIN.to_string(),
        avatar_url: String::new(),
        html_url: String::new(),
    }
}

fn parse_state(state: &str) -> IssueState {
    if state.eq_ignore_ascii_case("closed") {
        IssueState::Closed
    } else {
        IssueState::Open
    }
}

// ── REST ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RestLabel {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RestUser {
    pub login: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub html_url: String,
}

#[derive(Debug, Deserialize)]
pub struct RestIssue {
    pub node_id: String,
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Vec<RestLabel>,
    pub user: Option<RestUser>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub html_url: String,
    /// Present when the "issue" is a pull request.
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

impl RestIssue {
    /// `None` for pull requests, which share the issues endpoint.
    pub fn into_payload(self, repo: &RepoRef) -> Option<IssuePayload> {
        if self.pull_request.is_some() {
            return None;
        }
        Some(IssuePayload {
            id: self.node_id,
            number: self.number,
            title: self.title,
            body: self.body.unwrap_or_default(),
            labels: self.labels.into_iter().map(|l| l.name).collect(),
            author: self
                .user
                .map(|u| IssueAuthor {
                    login: u.login,
                    avatar_url: u.avatar_url,
                    html_url: u.html_url,
                })
                .unwrap_or_else(ghost_author),
            created_at: self.created_at,
            updated_at: self.updated_at,
            html_url: self.html_url,
            repo: repo.clone(),
            state: parse_state(&self.state),
        })
    }
}

// ── GraphQL ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct IssuesPageData {
    pub repository: Option<RepositoryNode>,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryNode {
    pub issues: IssueConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueConnection {
    pub page_info: PageInfo,
    #[serde(default)]
    pub nodes: Vec<Option<GraphQlIssue>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlAuthor {
    pub login: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct LabelNode {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct LabelConnection {
    #[serde(default)]
    pub nodes: Vec<Option<LabelNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlIssue {
    pub id: String,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub url: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author: Option<GraphQlAuthor>,
    pub labels: Option<LabelConnection>,
}

impl GraphQlIssue {
    pub fn into_payload(self, repo: &RepoRef) -> IssuePayload {
        IssuePayload {
            id: self.id,
            number: self.number,
            title: self.title,
            body: self.body.unwrap_or_default(),
            labels: self
                .labels
                .map(|c| c.nodes.into_iter().flatten().map(|l| l.name).collect())
                .unwrap_or_default(),
            author: self
                .author
                .map(|a| IssueAuthor {
                    login: a.login,
                    avatar_url: a.avatar_url,
                    html_url: a.url,
                })
                .unwrap_or_else(ghost_author),
            created_at: self.created_at,
            updated_at: self.updated_at,
            html_url: self.url,
            repo: repo.clone(),
            state: parse_state(&self.state),
        }
    }
}

impl IssueConnection {
    pub fn into_page(self, repo: &RepoRef) -> Page<IssuePayload> {
        Page {
            items: self
                .nodes
                .into_iter()
                .flatten()
                .map(|n| n.into_payload(repo))
                .collect(),
            has_next_page: self.page_info.has_next_page,
            end_cursor: self.page_info.end_cursor,
        }
    }
}
