use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

use crate::retry::RetryPolicy;
use crate::sync::models::{RepoSyncConfig, TypeLabels};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub github_token: String,
    /// Moderation classifier key. When unset every classification attempt fails
    /// and submissions land in manual review.
    pub openai_api_key: Option<String>,
    /// Tagging model key. When unset tag extraction returns no tags.
    pub anthropic_api_key: Option<String>,
    pub similarity_corpus_url: Option<String>,
    pub sync_repos: Vec<RepoSyncConfig>,
    pub moderation_retry: RetryPolicy,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let defaults = RetryPolicy::default();
        let moderation_retry = RetryPolicy {
            max_attempts: parse_env("MODERATION_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            base_delay: parse_env("MODERATION_BASE_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            attempt_timeout: parse_env("MODERATION_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.attempt_timeout),
        };

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            github_token: require_env("GITHUB_TOKEN")?,
            openai_api_key: optional_env("OPENAI_API_KEY"),
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            similarity_corpus_url: optional_env("SIMILARITY_CORPUS_URL"),
            sync_repos: load_sync_repos(optional_env("SYNC_REPOS").as_deref()),
            moderation_retry,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    optional_env(key)
        .map(|v| {
            v.parse::<T>()
                .with_context(|| format!("Environment variable '{key}' has an invalid value"))
        })
        .transpose()
}

/// Parses `SYNC_REPOS` (a JSON array of repo configs). Falls back to the
/// built-in list when unset, malformed, or empty.
pub fn load_sync_repos(raw: Option<&str>) -> Vec<RepoSyncConfig> {
    let Some(raw) = raw else {
        return default_sync_repos();
    };
    match serde_json::from_str::<Vec<RepoSyncConfig>>(raw) {
        Ok(repos) if !repos.is_empty() => repos,
        Ok(_) => {
            warn!("SYNC_REPOS is an empty list, using built-in defaults");
            default_sync_repos()
        }
        Err(e) => {
            warn!("SYNC_REPOS is not valid JSON ({e}), using built-in defaults");
            default_sync_repos()
        }
    }
}

pub fn default_sync_repos() -> Vec<RepoSyncConfig> {
    vec![
        RepoSyncConfig {
            owner: "jokebox".to_string(),
            repo: "jokes".to_string(),
            labels: vec!["approved".to_string()],
            type_labels: Some(TypeLabels {
                meme: vec!["meme".to_string(), "梗图".to_string()],
                text: vec!["joke".to_string(), "段子".to_string()],
            }),
        },
        RepoSyncConfig {
            owner: "jokebox".to_string(),
            repo: "memes".to_string(),
            labels: vec!["approved".to_string()],
            type_labels: Some(TypeLabels {
                meme: vec!["meme".to_string()],
                text: vec![],
            }),
        },
    ]
}
