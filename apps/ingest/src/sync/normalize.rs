use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::issue::IssuePayload;
use crate::models::item::{ContentType, Item, ModerationStatus};
use crate::similarity::markdown::has_image;
use crate::sync::models::RepoSyncConfig;

/// Type from the repo's label mapping, else meme when the body embeds an
/// image, else text. Meme labels are checked before text labels.
pub fn detect_content_type(issue: &IssuePayload, config: Option<&RepoSyncConfig>) -> ContentType {
    if let Some(type_labels) = config.and_then(|c| c.type_labels.as_ref()) {
        if type_labels.meme.iter().any(|l| issue.has_label(l)) {
            return ContentType::Meme;
        }
        if type_labels.text.iter().any(|l| issue.has_label(l)) {
            return ContentType::Text;
        }
    }
    if has_image(&issue.body) {
        ContentType::Meme
    } else {
        ContentType::Text
    }
}

/// Converts an upstream issue into a storable row. Rows entering through
/// sync were moderated upstream and are marked approved.
pub fn normalize_issue(
    issue: IssuePayload,
    config: Option<&RepoSyncConfig>,
    content_type: Option<ContentType>,
    tags: Vec<String>,
    synced_at: DateTime<Utc>,
) -> Item {
    let content_type = content_type.unwrap_or_else(|| detect_content_type(&issue, config));
    Item {
        source_repo: issue.repo.full_name(),
        id: issue.id,
        title: issue.title,
        body: issue.body,
        url: issue.html_url,
        created_at: issue.created_at,
        updated_at: issue.updated_at,
        author_username: issue.author.login,
        content_type,
        moderation_status: ModerationStatus::Approved,
        tags,
        synced_at,
    }
}

/// Keeps the first occurrence of each id.
pub fn dedupe_by_id(items: Vec<Item>) -> Vec<Item> {
    let mut seen = HashSet::with_capacity(items.len());
    let before = items.len();
    let unique: Vec<Item> = items
        .into_iter()
        .filter(|item| seen.insert(item.id.clone()))
        .collect();
    if unique.len() != before {
        debug!("Dropped {} duplicate candidate rows", before - unique.len());
    }
    unique
}
