use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::issue::{IssuePayload, RepoRef};
use crate::models::item::ContentType;

/// Labels that pin a content type, per repository.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeLabels {
    #[serde(default)]
    pub meme: Vec<String>,
    #[serde(default)]
    pub text: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSyncConfig {
    pub owner: String,
    pub repo: String,
    /// Issues carrying any of these labels are synced.
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub type_labels: Option<TypeLabels>,
}

impl RepoSyncConfig {
    pub fn repo_ref(&self) -> RepoRef {
        RepoRef {
            owner: self.owner.clone(),
            name: self.repo.clone(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    pub fn matches(&self, repo: &RepoRef) -> bool {
        self.owner.eq_ignore_ascii_case(&repo.owner) && self.repo.eq_ignore_ascii_case(&repo.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Single,
    Incremental,
    Full,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncRequest {
    pub mode: SyncMode,
    /// Already-fetched record, `single` mode only.
    #[serde(default)]
    pub issue: Option<IssuePayload>,
    /// `owner/name`, `single` mode only.
    #[serde(default)]
    pub repo: Option<String>,
    /// Watermark override, `incremental` mode only.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub content_type: Option<ContentType>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[cfg(test)]
impl SyncRequest {
    pub fn incremental(since: Option<DateTime<Utc>>) -> Self {
        SyncRequest {
            mode: SyncMode::Incremental,
            issue: None,
            repo: None,
            since,
            content_type: None,
            tags: None,
        }
    }

    pub fn full() -> Self {
        SyncRequest {
            mode: SyncMode::Full,
            ..SyncRequest::incremental(None)
        }
    }
}

/// Report of one sync run. `items_synced + items_skipped` always equals the
/// number of candidate rows the run produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub run_id: Uuid,
    pub mode: SyncMode,
    pub items_synced: usize,
    pub items_skipped: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}
