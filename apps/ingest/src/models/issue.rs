use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoRef {
    type Err = String;

    /// Parses `owner/name`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(RepoRef {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(format!("'{s}' is not in owner/name form")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueAuthor {
    pub login: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub html_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    #[default]
    Open,
    Closed,
}

/// An upstream issue, already validated and parsed by the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuePayload {
    /// Globally stable node id.
    pub id: String,
    /// Per-repository issue number, needed for tracker writes.
    pub number: u64,
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub body: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<String>,
    pub author: IssueAuthor,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub html_url: String,
    pub repo: RepoRef,
    #[serde(default)]
    pub state: IssueState,
}

impl IssuePayload {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueAction {
    Labeled,
    Edited,
    Closed,
    #[serde(other)]
    Other,
}

/// An issue event with its classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueEvent {
    pub action: IssueAction,
    pub issue: IssuePayload,
    /// The label that was just added, for `labeled` events.
    #[serde(default)]
    pub label: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_repo_ref_parse() {
        let repo: RepoRef = "jokebox/jokes".parse().unwrap();
        assert_eq!(repo.owner, "jokebox");
        assert_eq!(repo.name, "jokes");
        assert_eq!(repo.to_string(), "jokebox/jokes");
    }

    #[test]
    fn test_repo_ref_rejects_bad_forms() {
        assert!("jokes".parse::<RepoRef>().is_err());
        assert!("/jokes".parse::<RepoRef>().is_err());
        assert!("a/b/c".parse::<RepoRef>().is_err());
    }

    #[test]
    fn test_issue_event_deserializes() {
        let event: IssueEvent = serde_json::from_value(json!({
            "action": "labeled",
            "label": "joke",
            "issue": {
                "id": "I_kwDOAbc",
                "number": 12,
                "title": "加班",
                "body": null,
                "labels": ["joke"],
                "author": {"login": "alice", "avatarUrl": "https://a/x.png", "htmlUrl": "https://github.com/alice"},
                "createdAt": "2024-05-01T10:00:00Z",
                "updatedAt": "2024-05-01T10:00:00Z",
                "htmlUrl": "https://github.com/jokebox/jokes/issues/12",
                "repo": {"owner": "jokebox", "name": "jokes"}
            }
        }))
        .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(event.action, IssueAction::Labeled);
        assert_eq!(event.issue.body, "");
        assert_eq!(event.issue.state, IssueState::Open);
        assert!(event.issue.has_label("joke"));
    }

    #[test]
    fn test_unknown_action_is_other() {
        let action: IssueAction = serde_json::from_value(json!("reopened")).unwrap();
        assert_eq!(action, IssueAction::Other);
    }
}
