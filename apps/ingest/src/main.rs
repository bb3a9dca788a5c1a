mod config;
mod db;
mod errors;
mod github;
mod llm_client;
mod models;
mod moderation;
mod retry;
mod routes;
mod similarity;
mod state;
mod sync;
mod tagging;

use anyhow::Result;
use reqwest::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::github::GitHubClient;
use crate::llm_client::LlmClient;
use crate::moderation::classifier::OpenAiModerationClient;
use crate::moderation::SafetyModerator;
use crate::retry::RetryPolicy;
use crate::routes::build_router;
use crate::similarity::corpus::{CorpusSource, HttpCorpusSource, NoCorpus, SimilarityCorpus, CORPUS_TTL};
use crate::similarity::phash::{HttpImageFetcher, ImageHasher};
use crate::similarity::DuplicateDetector;
use crate::state::AppState;
use crate::sync::store::PgItemStore;
use crate::sync::SyncOrchestrator;
use crate::tagging::ContentTagger;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ingest service v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL (runs migrations)
    let db = create_pool(&config.database_url).await?;

    // One HTTP connection pool shared by every outbound client
    let http = Client::new();

    let github = Arc::new(GitHubClient::new(http.clone(), config.github_token.clone()));
    info!("GitHub client initialized for {} repos", config.sync_repos.len());

    // Duplicate detection over the shared corpus cache
    let hasher = ImageHasher::new(Arc::new(HttpImageFetcher::new(http.clone())));
    let corpus_source: Arc<dyn CorpusSource> = match &config.similarity_corpus_url {
        Some(url) => Arc::new(HttpCorpusSource::new(http.clone(), url.clone())),
        None => {
            info!("SIMILARITY_CORPUS_URL not set, duplicate detection has an empty corpus");
            Arc::new(NoCorpus)
        }
    };
    let corpus = Arc::new(SimilarityCorpus::new(corpus_source, hasher.clone(), CORPUS_TTL));
    let detector = DuplicateDetector::new(corpus, hasher);

    let classifier = Arc::new(OpenAiModerationClient::new(
        http.clone(),
        config.openai_api_key.clone(),
    ));
    let moderator = Arc::new(SafetyModerator::new(
        detector,
        classifier,
        github.clone(),
        config.moderation_retry.clone(),
        config.sync_repos.clone(),
    ));

    // Initialize LLM client for tagging
    let llm = LlmClient::new(
        http,
        config.anthropic_api_key.clone(),
        RetryPolicy::default(),
    );
    info!("LLM client initialized (model: {})", llm_client::MODEL);
    let tagger = Arc::new(ContentTagger::new(Arc::new(llm)));

    let orchestrator = Arc::new(SyncOrchestrator::new(
        github,
        Arc::new(PgItemStore::new(db.clone())),
        tagger,
        config.sync_repos.clone(),
    ));

    // Build app state
    let state = AppState {
        db,
        config: config.clone(),
        moderator,
        orchestrator,
    };

    // Build router
    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
