use async_trait::async_trait;

use crate::github::GitHubError;
use crate::models::issue::RepoRef;

pub const LABEL_DUPLICATE: &str = "duplicate";
pub const LABEL_VIOLATION: &str = "violation";
pub const LABEL_APPROVED: &str = "approved";
pub const LABEL_PENDING: &str = "pending";

/// Labels that mark a finished moderation pass.
pub const TERMINAL_LABELS: &[&str] = &[LABEL_DUPLICATE, LABEL_VIOLATION, LABEL_APPROVED];

/// Write side of the upstream issue tracker.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn add_labels(&self, repo: &RepoRef, number: u64, labels: &[&str]) -> Result<(), GitHubError>;

    /// Removing a label the issue does not carry is not an error.
    async fn remove_label(&self, repo: &RepoRef, number: u64, label: &str) -> Result<(), GitHubError>;

    async fn comment(&self, repo: &RepoRef, number: u64, body: &str) -> Result<(), GitHubError>;

    async fn close(&self, repo: &RepoRef, number: u64) -> Result<(), GitHubError>;
}
