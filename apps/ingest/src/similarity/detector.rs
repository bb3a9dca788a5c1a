use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::similarity::corpus::{CorpusEntry, SimilarityCorpus};
use crate::similarity::markdown::{extract_image_urls, normalize_text, strip_images};
use crate::similarity::phash::{ImageHash, ImageHasher};
use crate::similarity::text;

/// Why a submission was judged a duplicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchReason {
    SameImageUrl { url: String },
    SimilarImage { distance: u32 },
    SimilarText { ratio: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarItem {
    pub id: String,
    pub url: Option<String>,
    pub reason: MatchReason,
}

/// A submission prepared for comparison.
#[derive(Debug, Clone, Default)]
pub struct Candidate {
    pub text: String,
    pub image_urls: Vec<String>,
    pub image_hashes: Vec<ImageHash>,
}

impl Candidate {
    /// Splits a markdown body into normalised text and image URLs.
    /// Hashes are filled in separately because they need network access.
    pub fn from_markdown(body: &str) -> Self {
        Candidate {
            text: normalize_text(&strip_images(body)),
            image_urls: extract_image_urls(body),
            image_hashes: Vec::new(),
        }
    }
}

/// Compares one candidate against one corpus entry. Checks run cheapest
/// first: reused image URL, then image fingerprints, then text.
pub fn match_entry(candidate: &Candidate, entry: &CorpusEntry) -> Option<MatchReason> {
    if let Some(url) = candidate
        .image_urls
        .iter()
        .find(|url| entry.image_urls.contains(url))
    {
        return Some(MatchReason::SameImageUrl { url: url.clone() });
    }

    for ours in &candidate.image_hashes {
        for theirs in &entry.image_hashes {
            if ours.is_similar(theirs) {
                return Some(MatchReason::SimilarImage {
                    distance: ours.distance(theirs),
                });
            }
        }
    }

    text::similar_ratio(&candidate.text, &entry.text).map(|ratio| MatchReason::SimilarText { ratio })
}

/// First corpus entry (in corpus order) that matches, skipping `exclude_id`.
pub fn first_match<'a>(
    candidate: &Candidate,
    corpus: &'a [CorpusEntry],
    exclude_id: Option<&str>,
) -> Option<(&'a CorpusEntry, MatchReason)> {
    corpus
        .iter()
        .filter(|entry| Some(entry.id.as_str()) != exclude_id)
        .find_map(|entry| match_entry(candidate, entry).map(|reason| (entry, reason)))
}

#[derive(Clone)]
pub struct DuplicateDetector {
    corpus: Arc<SimilarityCorpus>,
    hasher: ImageHasher,
}

impl DuplicateDetector {
    pub fn new(corpus: Arc<SimilarityCorpus>, hasher: ImageHasher) -> Self {
        Self { corpus, hasher }
    }

    /// Finds an accepted item that `body` duplicates, if any.
    pub async fn find_similar(&self, body: &str, exclude_id: Option<&str>) -> Option<SimilarItem> {
        let mut candidate = Candidate::from_markdown(body);
        let corpus = self.corpus.entries().await;
        if corpus.is_empty() {
            debug!("Similarity corpus is empty, skipping duplicate check");
            return None;
        }

        if !candidate.image_urls.is_empty() {
            candidate.image_hashes = self.hasher.hash_all(&candidate.image_urls).await;
        }

        let (entry, reason) = first_match(&candidate, &corpus, exclude_id)?;
        info!("Submission matches existing item {} ({:?})", entry.id, reason);
        Some(SimilarItem {
            id: entry.id.clone(),
            url: entry.url.clone(),
            reason,
        })
    }
}
