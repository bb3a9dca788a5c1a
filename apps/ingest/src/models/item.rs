use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Meme,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Meme => "meme",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ContentType::Text),
            "meme" => Ok(ContentType::Meme),
            other => Err(format!("unknown content type '{other}'")),
        }
    }
}

/// Moves only forward: `Pending` to `Approved` or `Rejected`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ModerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationStatus::Pending => "pending",
            ModerationStatus::Approved => "approved",
            ModerationStatus::Rejected => "rejected",
        }
    }

    /// Status that results from an incoming write over `self`.
    /// Terminal states are never overwritten. The store's upsert SQL applies
    /// the same rule in its `moderation_status` CASE.
    #[cfg(test)]
    pub fn advance(self, incoming: ModerationStatus) -> ModerationStatus {
        match self {
            ModerationStatus::Pending => incoming,
            terminal => terminal,
        }
    }
}

/// A persisted joke or meme, keyed by the upstream node id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub body: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author_username: String,
    pub source_repo: String,
    pub content_type: ContentType,
    pub moderation_status: ModerationStatus,
    /// Empty means "no replacement"; existing tags survive the upsert.
    pub tags: Vec<String>,
    pub synced_at: DateTime<Utc>,
}
