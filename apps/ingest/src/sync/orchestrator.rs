//! Sync Orchestrator: reconciles the item store with upstream issues.
//!
//! A run has two phases. Collect fetches and normalises candidate rows for
//! the requested mode; any failure there is fatal to the run. Persist writes
//! the candidates chunk by chunk, falling back to row-at-a-time writes for a
//! chunk whose set-based statement fails, so only the offending rows are
//! skipped.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::issue::RepoRef;
use crate::models::item::Item;
use crate::sync::models::{RepoSyncConfig, SyncMode, SyncRequest, SyncResult};
use crate::sync::normalize::{dedupe_by_id, normalize_issue};
use crate::sync::source::UpstreamSource;
use crate::sync::store::ItemStore;
use crate::tagging::taxonomy::{self, ValidatedTags};
use crate::tagging::ContentTagger;

/// Rows per set-based upsert statement.
pub const BATCH_SIZE: usize = 100;

/// Incremental lookback when neither `since` nor a stored row is available.
pub fn default_lookback() -> Duration {
    Duration::hours(24)
}

#[derive(Debug, Default, PartialEq, Eq)]
struct PersistReport {
    synced: usize,
    skipped: usize,
    errors: Vec<String>,
}

pub struct SyncOrchestrator {
    source: Arc<dyn UpstreamSource>,
    store: Arc<dyn ItemStore>,
    tagger: Arc<ContentTagger>,
    repos: Vec<RepoSyncConfig>,
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn UpstreamSource>,
        store: Arc<dyn ItemStore>,
        tagger: Arc<ContentTagger>,
        repos: Vec<RepoSyncConfig>,
    ) -> Self {
        Self {
            source,
            store,
            tagger,
            repos,
        }
    }

    /// Runs one sync. Never fails: problems are reported in the result.
    pub async fn sync(&self, request: SyncRequest) -> SyncResult {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let timestamp = Utc::now();
        let mode = request.mode;
        info!(%run_id, ?mode, "Starting sync run");

        let candidates = match self.collect(run_id, request, timestamp).await {
            Ok(items) => dedupe_by_id(items),
            Err(e) => {
                error!(%run_id, "Sync fetch phase failed: {:#}", e);
                return SyncResult {
                    run_id,
                    mode,
                    items_synced: 0,
                    items_skipped: 0,
                    errors: vec![format!("{e:#}")],
                    duration_ms: elapsed_ms(started),
                    timestamp,
                    success: false,
                };
            }
        };

        let report = self.persist(run_id, &candidates).await;
        let duration_ms = elapsed_ms(started);
        info!(
            %run_id,
            synced = report.synced,
            skipped = report.skipped,
            duration_ms,
            "Sync run finished"
        );

        SyncResult {
            run_id,
            mode,
            items_synced: report.synced,
            items_skipped: report.skipped,
            errors: report.errors,
            duration_ms,
            timestamp,
            success: true,
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Collect phase
    // ────────────────────────────────────────────────────────────────────────

    async fn collect(
        &self,
        run_id: Uuid,
        request: SyncRequest,
        synced_at: DateTime<Utc>,
    ) -> Result<Vec<Item>> {
        match request.mode {
            SyncMode::Single => self.collect_single(request, synced_at).await.map(|i| vec![i]),
            SyncMode::Incremental => {
                let since = match request.since {
                    Some(since) => since,
                    None => self.watermark(synced_at).await?,
                };
                info!(%run_id, %since, "Incremental sync watermark");
                let mut items = Vec::new();
                for repo in &self.repos {
                    let issues = self
                        .source
                        .issues_updated_since(repo, since)
                        .await
                        .with_context(|| format!("listing issues for {}", repo.full_name()))?;
                    info!(%run_id, repo = %repo.full_name(), count = issues.len(), "Fetched updated issues");
                    items.extend(
                        issues
                            .into_iter()
                            .map(|issue| normalize_issue(issue, Some(repo), None, vec![], synced_at)),
                    );
                }
                Ok(items)
            }
            SyncMode::Full => {
                let mut items = Vec::new();
                for repo in &self.repos {
                    let issues = self
                        .source
                        .all_issues(repo)
                        .await
                        .with_context(|| format!("listing issues for {}", repo.full_name()))?;
                    info!(%run_id, repo = %repo.full_name(), count = issues.len(), "Fetched issues");
                    items.extend(
                        issues
                            .into_iter()
                            .map(|issue| normalize_issue(issue, Some(repo), None, vec![], synced_at)),
                    );
                }
                Ok(items)
            }
        }
    }

    /// Max stored `synced_at`, else now minus the default lookback.
    async fn watermark(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let latest = self
            .store
            .max_synced_at()
            .await
            .context("reading sync watermark")?;
        Ok(latest.unwrap_or_else(|| now - default_lookback()))
    }

    async fn collect_single(&self, request: SyncRequest, synced_at: DateTime<Utc>) -> Result<Item> {
        let issue = request
            .issue
            .ok_or_else(|| anyhow!("single mode requires an issue"))?;
        let repo: RepoRef = request
            .repo
            .as_deref()
            .ok_or_else(|| anyhow!("single mode requires a repo"))?
            .parse()
            .map_err(|e: String| anyhow!(e))?;
        let config = self.repos.iter().find(|c| c.matches(&repo));

        let tags = match request.tags {
            Some(tags) => match taxonomy::validate(&tags) {
                ValidatedTags::Known(tags) => tags,
                ValidatedTags::NoneKnown => {
                    if !tags.is_empty() {
                        warn!("Ignoring tag override with no known tags: {:?}", tags);
                    }
                    vec![]
                }
            },
            None => self.tagger.extract_tags(&issue.title, &issue.body).await,
        };

        let mut item = normalize_issue(issue, config, request.content_type, tags, synced_at);
        item.source_repo = repo.full_name();
        Ok(item)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Persist phase
    // ────────────────────────────────────────────────────────────────────────

    async fn persist(&self, run_id: Uuid, items: &[Item]) -> PersistReport {
        let mut report = PersistReport::default();
        for (index, chunk) in items.chunks(BATCH_SIZE).enumerate() {
            match self.store.upsert_batch(chunk).await {
                Ok(()) => report.synced += chunk.len(),
                Err(e) => {
                    warn!(
                        %run_id,
                        chunk = index,
                        rows = chunk.len(),
                        "Batch upsert failed ({}), falling back to single rows",
                        e
                    );
                    for item in chunk {
                        match self.store.upsert_one(item).await {
                            Ok(()) => report.synced += 1,
                            Err(e) => {
                                warn!(%run_id, id = %item.id, "Row upsert failed: {}", e);
                                report.skipped += 1;
                                report.errors.push(format!("{}: {}", item.id, e));
                            }
                        }
                    }
                }
            }
        }
        report
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::LlmError;
    use crate::models::item::{ContentType, ModerationStatus};
    use crate::sync::normalize::tests::issue;
    use crate::sync::store::tests::MemoryStore;
    use crate::sync::models::TypeLabels;
    use crate::tagging::tagger::tests::FakeModel;
    use crate::models::issue::IssuePayload;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSource {
        issues: HashMap<String, Vec<IssuePayload>>,
        unreachable: bool,
        since_seen: Mutex<Vec<DateTime<Utc>>>,
    }

    impl FakeSource {
        fn with(repo: &str, issues: Vec<IssuePayload>) -> Self {
            FakeSource {
                issues: HashMap::from([(repo.to_string(), issues)]),
                ..FakeSource::default()
            }
        }

        fn listing(&self, repo: &RepoSyncConfig) -> Result<Vec<IssuePayload>> {
            if self.unreachable {
                return Err(anyhow!("connection refused"));
            }
            Ok(self.issues.get(&repo.full_name()).cloned().unwrap_or_default())
        }
    }

    #[async_trait]
    impl UpstreamSource for FakeSource {
        async fn issues_updated_since(
            &self,
            repo: &RepoSyncConfig,
            since: DateTime<Utc>,
        ) -> Result<Vec<IssuePayload>> {
            self.since_seen.lock().unwrap().push(since);
            self.listing(repo)
        }

        async fn all_issues(&self, repo: &RepoSyncConfig) -> Result<Vec<IssuePayload>> {
            self.listing(repo)
        }
    }

    fn repo_config() -> RepoSyncConfig {
        RepoSyncConfig {
            owner: "jokebox".to_string(),
            repo: "jokes".to_string(),
            labels: vec!["approved".to_string()],
            type_labels: Some(TypeLabels {
                meme: vec!["梗图".to_string()],
                text: vec!["段子".to_string()],
            }),
        }
    }

    fn issues(n: usize) -> Vec<IssuePayload> {
        (0..n)
            .map(|i| issue(&format!("I_{i}"), &format!("笑话 {i}"), &["approved"]))
            .collect()
    }

    fn orchestrator_with(
        source: Arc<FakeSource>,
        store: Arc<MemoryStore>,
        model: Arc<FakeModel>,
    ) -> SyncOrchestrator {
        SyncOrchestrator::new(
            source,
            store,
            Arc::new(ContentTagger::new(model)),
            vec![repo_config()],
        )
    }

    fn orchestrator(source: Arc<FakeSource>, store: Arc<MemoryStore>) -> SyncOrchestrator {
        orchestrator_with(source, store, FakeModel::answering(Err(LlmError::MissingApiKey)))
    }

    /// Row contents without the per-run timestamp.
    fn contents(store: &MemoryStore) -> Vec<Item> {
        store
            .snapshot()
            .into_iter()
            .map(|mut item| {
                item.synced_at = DateTime::<Utc>::MIN_UTC;
                item
            })
            .collect()
    }

    #[tokio::test]
    async fn test_full_sync_is_idempotent() {
        let store = Arc::new(MemoryStore::default());
        let sync = orchestrator(Arc::new(FakeSource::with("jokebox/jokes", issues(5))), store.clone());

        let first = sync.sync(SyncRequest::full()).await;
        let after_first = contents(&store);
        let second = sync.sync(SyncRequest::full()).await;

        assert!(first.success && second.success);
        assert_eq!(first.items_synced, 5);
        assert_eq!(second.items_synced, first.items_synced);
        assert_eq!(contents(&store), after_first);
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn test_poison_row_is_isolated() {
        let store = Arc::new(MemoryStore::with_poisoned(&["I_49"]));
        let sync = orchestrator(Arc::new(FakeSource::with("jokebox/jokes", issues(100))), store.clone());

        let result = sync.sync(SyncRequest::full()).await;

        assert!(result.success);
        assert_eq!(result.items_synced, 99);
        assert_eq!(result.items_skipped, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("I_49"));
        assert_eq!(store.snapshot().len(), 99);
        assert!(store.get("I_49").is_none());
        assert_eq!(*store.single_calls.lock().unwrap(), 100);
    }

    #[tokio::test]
    async fn test_rows_are_written_in_chunks() {
        let store = Arc::new(MemoryStore::with_poisoned(&["I_120"]));
        let sync = orchestrator(Arc::new(FakeSource::with("jokebox/jokes", issues(250))), store.clone());

        let result = sync.sync(SyncRequest::full()).await;

        assert_eq!(*store.batch_calls.lock().unwrap(), vec![100, 100, 50]);
        // Only the chunk holding the bad row falls back.
        assert_eq!(*store.single_calls.lock().unwrap(), 100);
        assert_eq!(result.items_synced + result.items_skipped, 250);
        assert_eq!(result.items_skipped, 1);
    }

    #[tokio::test]
    async fn test_unreachable_source_fails_run() {
        let store = Arc::new(MemoryStore::default());
        let source = Arc::new(FakeSource {
            unreachable: true,
            ..FakeSource::default()
        });
        let sync = orchestrator(source, store.clone());

        let result = sync.sync(SyncRequest::full()).await;

        assert!(!result.success);
        assert_eq!(result.items_synced, 0);
        assert_eq!(result.items_skipped, 0);
        assert!(result.errors[0].contains("jokebox/jokes"));
        assert!(store.batch_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_incremental_watermark_defaults_to_lookback() {
        let store = Arc::new(MemoryStore::default());
        let source = Arc::new(FakeSource::with("jokebox/jokes", issues(2)));
        let sync = orchestrator(source.clone(), store.clone());

        let before = Utc::now();
        let result = sync.sync(SyncRequest::incremental(None)).await;

        assert!(result.success);
        assert_eq!(result.items_synced, 2);
        let since = last_since(&source);
        assert!(since <= before - default_lookback() + Duration::minutes(1));
        assert!(since >= before - default_lookback() - Duration::minutes(1));
    }

    #[tokio::test]
    async fn test_incremental_watermark_uses_latest_synced_row() {
        let store = Arc::new(MemoryStore::default());
        let source = Arc::new(FakeSource::with("jokebox/jokes", issues(2)));
        let sync = orchestrator(source.clone(), store.clone());

        sync.sync(SyncRequest::full()).await;
        let latest = store.snapshot().iter().map(|i| i.synced_at).max().unwrap();
        sync.sync(SyncRequest::incremental(None)).await;

        assert_eq!(last_since(&source), latest);
    }

    #[tokio::test]
    async fn test_incremental_explicit_since_wins() {
        let store = Arc::new(MemoryStore::default());
        let source = Arc::new(FakeSource::with("jokebox/jokes", vec![]));
        let sync = orchestrator(source.clone(), store);
        let since = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let result = sync.sync(SyncRequest::incremental(Some(since))).await;

        assert!(result.success);
        assert_eq!(result.items_synced, 0);
        assert_eq!(last_since(&source), since);
    }

    fn last_since(source: &FakeSource) -> DateTime<Utc> {
        *source.since_seen.lock().unwrap().last().unwrap()
    }

    #[tokio::test]
    async fn test_resync_without_tags_keeps_existing_tags() {
        let store = Arc::new(MemoryStore::default());
        let model = FakeModel::answering(Ok(json!({"tags": ["职场", "自嘲"]})));
        let sync = orchestrator_with(
            Arc::new(FakeSource::with("jokebox/jokes", issues(1))),
            store.clone(),
            model,
        );

        let single = SyncRequest {
            mode: SyncMode::Single,
            issue: Some(issue("I_0", "笑话 0", &["approved"])),
            repo: Some("jokebox/jokes".to_string()),
            since: None,
            content_type: None,
            tags: None,
        };
        assert!(sync.sync(single).await.success);
        assert_eq!(store.get("I_0").unwrap().tags, vec!["职场", "自嘲"]);

        let full = sync.sync(SyncRequest::full()).await;
        assert!(full.success);
        assert_eq!(store.get("I_0").unwrap().tags, vec!["职场", "自嘲"]);
    }

    #[tokio::test]
    async fn test_single_mode_uses_overrides() {
        let store = Arc::new(MemoryStore::default());
        let model = FakeModel::answering(Ok(json!({"tags": ["动物"]})));
        let sync = orchestrator_with(Arc::new(FakeSource::default()), store.clone(), model.clone());

        let result = sync
            .sync(SyncRequest {
                mode: SyncMode::Single,
                issue: Some(issue("I_7", "纯文字", &[])),
                repo: Some("jokebox/jokes".to_string()),
                since: None,
                content_type: Some(ContentType::Meme),
                tags: Some(vec!["反转".to_string(), "宇宙".to_string()]),
            })
            .await;

        assert!(result.success);
        assert_eq!(result.items_synced, 1);
        let item = store.get("I_7").unwrap();
        assert_eq!(item.content_type, ContentType::Meme);
        assert_eq!(item.tags, vec!["反转"]);
        assert_eq!(item.moderation_status, ModerationStatus::Approved);
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_mode_requires_issue_and_repo() {
        let store = Arc::new(MemoryStore::default());
        let sync = orchestrator(Arc::new(FakeSource::default()), store);

        let result = sync
            .sync(SyncRequest {
                mode: SyncMode::Single,
                ..SyncRequest::full()
            })
            .await;

        assert!(!result.success);
        assert_eq!(result.items_synced + result.items_skipped, 0);
        assert_eq!(result.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_candidates_counted_once() {
        let store = Arc::new(MemoryStore::default());
        let source = Arc::new(FakeSource::with("jokebox/jokes", issues(3)));
        let sync = SyncOrchestrator::new(
            source,
            store.clone(),
            Arc::new(ContentTagger::new(FakeModel::answering(Err(LlmError::MissingApiKey)))),
            vec![repo_config(), repo_config()],
        );

        let result = sync.sync(SyncRequest::full()).await;

        assert_eq!(result.items_synced, 3);
        assert_eq!(store.snapshot().len(), 3);
    }
}
