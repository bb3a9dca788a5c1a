//! Similarity corpus: a TTL cache over a snapshot of accepted items.
//!
//! The snapshot comes from an external source, not from the `items` table the
//! sync orchestrator writes, so newly synced items become visible to duplicate
//! detection only once the snapshot publisher has picked them up and the TTL
//! here has lapsed.
//!
//! A refresh never blocks readers: while one caller refreshes, everyone else
//! is served the current snapshot, or an empty one before the first load.
//! Image hashing during a refresh is bounded by [`REFRESH_BUDGET`]; images
//! still unhashed then are picked up by the next refresh.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::similarity::markdown::{extract_image_urls, normalize_text, strip_images};
use crate::similarity::phash::{ImageHash, ImageHasher};

pub const CORPUS_TTL: Duration = Duration::from_secs(5 * 60);
/// Upper bound for one refresh, snapshot download and image hashing included.
pub const REFRESH_BUDGET: Duration = Duration::from_secs(25);
/// A URL that failed to hash is not fetched again before this has passed.
const FAILED_HASH_RETRY: Duration = Duration::from_secs(60 * 60);
const HASH_CONCURRENCY: usize = 16;

/// One accepted item as published in the snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusRecord {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub body: String,
    /// Hex aHashes, when the publisher precomputed them.
    #[serde(default)]
    pub image_hashes: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorpusEntry {
    pub id: String,
    pub url: Option<String>,
    pub text: String,
    pub image_urls: Vec<String>,
    pub image_hashes: Vec<ImageHash>,
}

#[async_trait]
pub trait CorpusSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<CorpusRecord>>;
}

/// Reads a JSON array of [`CorpusRecord`] from a URL.
pub struct HttpCorpusSource {
    client: Client,
    url: String,
}

impl HttpCorpusSource {
    pub fn new(client: Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl CorpusSource for HttpCorpusSource {
    async fn fetch(&self) -> Result<Vec<CorpusRecord>> {
        let records = self
            .client
            .get(&self.url)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .context("corpus snapshot request failed")?
            .error_for_status()
            .context("corpus snapshot returned an error status")?
            .json::<Vec<CorpusRecord>>()
            .await
            .context("corpus snapshot is not a JSON array of records")?;
        Ok(records)
    }
}

/// Used when no snapshot URL is configured.
pub struct NoCorpus;

#[async_trait]
impl CorpusSource for NoCorpus {
    async fn fetch(&self) -> Result<Vec<CorpusRecord>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Copy)]
enum MemoEntry {
    Hashed(ImageHash),
    Failed { at: Instant },
}

impl MemoEntry {
    fn is_settled(&self) -> bool {
        match self {
            MemoEntry::Hashed(_) => true,
            MemoEntry::Failed { at } => at.elapsed() < FAILED_HASH_RETRY,
        }
    }
}

#[derive(Default)]
struct Snapshot {
    entries: Option<Arc<Vec<CorpusEntry>>>,
    fetched_at: Option<Instant>,
}

/// Process-wide corpus cache. Construct once and share by `Arc`.
pub struct SimilarityCorpus {
    source: Arc<dyn CorpusSource>,
    hasher: ImageHasher,
    ttl: Duration,
    snapshot: Mutex<Snapshot>,
    /// Held for the whole of a refresh.
    refreshing: Mutex<()>,
    /// URL → hash outcome, kept across refreshes.
    hash_memo: Arc<Mutex<HashMap<String, MemoEntry>>>,
}

impl SimilarityCorpus {
    pub fn new(source: Arc<dyn CorpusSource>, hasher: ImageHasher, ttl: Duration) -> Self {
        Self {
            source,
            hasher,
            ttl,
            snapshot: Mutex::new(Snapshot::default()),
            refreshing: Mutex::new(()),
            hash_memo: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the current snapshot, refreshing it if expired. A failed
    /// refresh serves the previous snapshot, or an empty one if none exists.
    pub async fn entries(&self) -> Arc<Vec<CorpusEntry>> {
        if let Some(entries) = self.fresh_snapshot().await {
            return entries;
        }

        let Ok(_refreshing) = self.refreshing.try_lock() else {
            debug!("Similarity corpus refresh in progress, serving current snapshot");
            return self.current_snapshot().await;
        };
        // Another caller may have finished a refresh in between
        if let Some(entries) = self.fresh_snapshot().await {
            return entries;
        }

        let deadline = Instant::now() + REFRESH_BUDGET;
        let records = match tokio::time::timeout_at(deadline, self.source.fetch()).await {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                warn!("Similarity corpus refresh failed, serving previous snapshot: {e:#}");
                return self.current_snapshot().await;
            }
            Err(_) => {
                warn!("Similarity corpus refresh timed out after {REFRESH_BUDGET:?}, serving previous snapshot");
                return self.current_snapshot().await;
            }
        };

        self.hash_missing(&records, deadline).await;
        let entries = {
            let memo = self.hash_memo.lock().await;
            Arc::new(build_entries(records, &memo))
        };
        info!("Similarity corpus refreshed: {} entries", entries.len());

        let mut snapshot = self.snapshot.lock().await;
        snapshot.entries = Some(Arc::clone(&entries));
        snapshot.fetched_at = Some(Instant::now());
        entries
    }

    async fn fresh_snapshot(&self) -> Option<Arc<Vec<CorpusEntry>>> {
        let snapshot = self.snapshot.lock().await;
        match (&snapshot.entries, snapshot.fetched_at) {
            (Some(entries), Some(fetched_at)) if fetched_at.elapsed() < self.ttl => {
                Some(Arc::clone(entries))
            }
            _ => None,
        }
    }

    async fn current_snapshot(&self) -> Arc<Vec<CorpusEntry>> {
        self.snapshot
            .lock()
            .await
            .entries
            .clone()
            .unwrap_or_else(|| Arc::new(Vec::new()))
    }

    /// Hashes the snapshot images the memo has no settled outcome for.
    /// Outcomes are memoised as each image finishes, so work done before
    /// `deadline` survives an expired budget.
    async fn hash_missing(&self, records: &[CorpusRecord], deadline: Instant) {
        let pending: Vec<String> = {
            let memo = self.hash_memo.lock().await;
            let mut seen = HashSet::new();
            records
                .iter()
                .filter(|record| record.image_hashes.is_none())
                .flat_map(|record| extract_image_urls(&record.body))
                .filter(|url| !memo.get(url).is_some_and(|entry| entry.is_settled()))
                .filter(|url| seen.insert(url.clone()))
                .collect()
        };
        if pending.is_empty() {
            return;
        }

        let permits = Arc::new(Semaphore::new(HASH_CONCURRENCY));
        let mut tasks = JoinSet::new();
        for url in pending {
            let hasher = self.hasher.clone();
            let memo = Arc::clone(&self.hash_memo);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                let entry = match hasher.hash_url(&url).await {
                    Some(hash) => MemoEntry::Hashed(hash),
                    None => MemoEntry::Failed { at: Instant::now() },
                };
                memo.lock().await.insert(url, entry);
            });
        }

        let drained = async { while tasks.join_next().await.is_some() {} };
        let finished = tokio::time::timeout_at(deadline, drained).await.is_ok();
        if !finished {
            warn!(
                "Similarity corpus refresh budget spent, {} images left for the next refresh",
                tasks.len()
            );
        }
    }
}

fn build_entries(records: Vec<CorpusRecord>, memo: &HashMap<String, MemoEntry>) -> Vec<CorpusEntry> {
    records
        .into_iter()
        .map(|record| {
            let image_urls = extract_image_urls(&record.body);
            let image_hashes = match &record.image_hashes {
                Some(hexes) => hexes
                    .iter()
                    .filter_map(|h| ImageHash::from_hex(h).ok())
                    .collect(),
                None => image_urls
                    .iter()
                    .filter_map(|url| match memo.get(url) {
                        Some(MemoEntry::Hashed(hash)) => Some(*hash),
                        _ => None,
                    })
                    .collect(),
            };
            CorpusEntry {
                text: normalize_text(&strip_images(&record.body)),
                id: record.id,
                url: record.url,
                image_urls,
                image_hashes,
            }
        })
        .collect()
}
