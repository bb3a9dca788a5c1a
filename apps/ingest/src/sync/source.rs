use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::issue::IssuePayload;
use crate::sync::models::RepoSyncConfig;

/// Read side of the upstream content source.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Issues carrying any of the repo's labels, updated at or after `since`.
    async fn issues_updated_since(
        &self,
        repo: &RepoSyncConfig,
        since: DateTime<Utc>,
    ) -> Result<Vec<IssuePayload>>;

    /// Every issue carrying any of the repo's labels.
    async fn all_issues(&self, repo: &RepoSyncConfig) -> Result<Vec<IssuePayload>>;
}
