//! Safety Moderator: decides the fate of one submission issue.
//!
//! Order of checks: duplicate detection, empty content, then one classifier
//! call covering the text and every image. The classifier is called through
//! the retry policy; when it stays unavailable the submission waits for a
//! human instead of being approved.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::models::issue::{IssueAction, IssueEvent, IssuePayload, IssueState};
use crate::moderation::categories::mapped_labels;
use crate::moderation::classifier::{ModerationClassifier, ModerationInput};
use crate::moderation::messages::{
    duplicate_comment, violation_comment, APPROVED_COMMENT, APPROVED_MESSAGE,
    EMPTY_CONTENT_COMMENT, EMPTY_CONTENT_MESSAGE, FLAGGED_UNMAPPED_COMMENT,
    FLAGGED_UNMAPPED_MESSAGE, REVIEW_UNAVAILABLE_COMMENT, REVIEW_UNAVAILABLE_MESSAGE,
};
use crate::moderation::tracker::{
    IssueTracker, LABEL_APPROVED, LABEL_DUPLICATE, LABEL_PENDING, LABEL_VIOLATION,
    TERMINAL_LABELS,
};
use crate::retry::RetryPolicy;
use crate::similarity::markdown::{extract_image_urls, strip_images};
use crate::similarity::{DuplicateDetector, SimilarItem};
use crate::sync::models::RepoSyncConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeType {
    Similar,
    Violation,
    Approved,
    Pending,
    Skipped,
}

/// Result of one moderation pass, returned as the webhook response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModerationOutcome {
    #[serde(rename = "type")]
    pub outcome: OutcomeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
}

impl ModerationOutcome {
    fn new(outcome: OutcomeType, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: Some(message.into()),
            categories: None,
        }
    }

    pub fn skipped(reason: &str) -> Self {
        Self::new(OutcomeType::Skipped, reason)
    }
}

/// Internal decision, before it is rendered into side effects and an outcome.
#[derive(Debug, Clone, PartialEq)]
enum Verdict {
    Duplicate(SimilarItem),
    EmptyContent,
    ClassifierUnavailable,
    /// Flagged, but no raised category has a reviewer-facing label.
    /// Kept as a pending review rather than a violation.
    FlaggedUnmapped(Vec<String>),
    Violation(Vec<&'static str>),
    Approved,
}

impl Verdict {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            Verdict::Duplicate(_) | Verdict::Violation(_) | Verdict::Approved
        )
    }

    fn label(&self) -> &'static str {
        match self {
            Verdict::Duplicate(_) => LABEL_DUPLICATE,
            Verdict::Violation(_) => LABEL_VIOLATION,
            Verdict::Approved => LABEL_APPROVED,
            Verdict::EmptyContent
            | Verdict::ClassifierUnavailable
            | Verdict::FlaggedUnmapped(_) => LABEL_PENDING,
        }
    }

    fn comment(&self) -> String {
        match self {
            Verdict::Duplicate(item) => duplicate_comment(&duplicate_link(item)),
            Verdict::Violation(labels) => violation_comment(labels),
            Verdict::Approved => APPROVED_COMMENT.to_string(),
            Verdict::EmptyContent => EMPTY_CONTENT_COMMENT.to_string(),
            Verdict::ClassifierUnavailable => REVIEW_UNAVAILABLE_COMMENT.to_string(),
            Verdict::FlaggedUnmapped(_) => FLAGGED_UNMAPPED_COMMENT.to_string(),
        }
    }

    fn into_outcome(self) -> ModerationOutcome {
        match self {
            Verdict::Duplicate(item) => {
                ModerationOutcome::new(OutcomeType::Similar, duplicate_link(&item))
            }
            Verdict::Violation(labels) => ModerationOutcome {
                outcome: OutcomeType::Violation,
                message: Some(labels.join("、")),
                categories: Some(labels.into_iter().map(String::from).collect()),
            },
            Verdict::Approved => ModerationOutcome::new(OutcomeType::Approved, APPROVED_MESSAGE),
            Verdict::EmptyContent => {
                ModerationOutcome::new(OutcomeType::Pending, EMPTY_CONTENT_MESSAGE)
            }
            Verdict::ClassifierUnavailable => {
                ModerationOutcome::new(OutcomeType::Pending, REVIEW_UNAVAILABLE_MESSAGE)
            }
            Verdict::FlaggedUnmapped(codes) => ModerationOutcome {
                outcome: OutcomeType::Pending,
                message: Some(FLAGGED_UNMAPPED_MESSAGE.to_string()),
                categories: Some(codes),
            },
        }
    }
}

fn duplicate_link(item: &SimilarItem) -> String {
    item.url.clone().unwrap_or_else(|| item.id.clone())
}

pub struct SafetyModerator {
    detector: DuplicateDetector,
    classifier: Arc<dyn ModerationClassifier>,
    tracker: Arc<dyn IssueTracker>,
    retry: RetryPolicy,
    repos: Vec<RepoSyncConfig>,
}

impl SafetyModerator {
    pub fn new(
        detector: DuplicateDetector,
        classifier: Arc<dyn ModerationClassifier>,
        tracker: Arc<dyn IssueTracker>,
        retry: RetryPolicy,
        repos: Vec<RepoSyncConfig>,
    ) -> Self {
        Self {
            detector,
            classifier,
            tracker,
            retry,
            repos,
        }
    }

    /// Moderates the event's issue unless the event should not trigger a pass.
    pub async fn handle_event(&self, event: &IssueEvent) -> ModerationOutcome {
        if let Some(reason) = self.skip_reason(event) {
            info!(
                issue = %event.issue.id,
                action = ?event.action,
                "Skipping moderation: {}",
                reason
            );
            return ModerationOutcome::skipped(reason);
        }
        self.moderate(&event.issue).await
    }

    fn skip_reason(&self, event: &IssueEvent) -> Option<&'static str> {
        let issue = &event.issue;
        if TERMINAL_LABELS.iter().any(|l| issue.has_label(l)) {
            return Some("issue already moderated");
        }
        if issue.state == IssueState::Closed {
            return Some("issue is closed");
        }
        match event.action {
            IssueAction::Labeled => {
                let Some(config) = self.repos.iter().find(|c| c.matches(&issue.repo)) else {
                    return Some("repository is not configured");
                };
                let triggers = config.type_labels.as_ref().is_some_and(|t| {
                    event
                        .label
                        .as_ref()
                        .is_some_and(|label| t.meme.contains(label) || t.text.contains(label))
                });
                if triggers {
                    None
                } else {
                    Some("label does not trigger moderation")
                }
            }
            IssueAction::Edited if issue.has_label(LABEL_PENDING) => None,
            IssueAction::Edited => Some("edited issue is not awaiting review"),
            IssueAction::Closed => Some("issue is closed"),
            IssueAction::Other => Some("event is not handled"),
        }
    }

    /// Runs one moderation pass and applies its side effects to the issue.
    /// Always produces a decision.
    pub async fn moderate(&self, issue: &IssuePayload) -> ModerationOutcome {
        let verdict = self.decide(issue).await;
        self.apply_side_effects(issue, &verdict).await;
        let outcome = verdict.into_outcome();
        info!(issue = %issue.id, outcome = ?outcome.outcome, "Moderation finished");
        outcome
    }

    async fn decide(&self, issue: &IssuePayload) -> Verdict {
        let similar = self
            .detector
            .find_similar(&issue.body, Some(issue.id.as_str()))
            .await;
        if let Some(similar) = similar {
            return Verdict::Duplicate(similar);
        }

        let text = strip_images(&issue.body).trim().to_string();
        let image_urls = extract_image_urls(&issue.body);
        if text.is_empty() && image_urls.is_empty() {
            return Verdict::EmptyContent;
        }

        let mut inputs = Vec::with_capacity(image_urls.len() + 1);
        if !text.is_empty() {
            inputs.push(ModerationInput::text(text));
        }
        inputs.extend(image_urls.into_iter().map(ModerationInput::image));

        let classifier = &self.classifier;
        let inputs = &inputs;
        let classification = match self
            .retry
            .run("Moderation", |_| classifier.classify(inputs))
            .await
        {
            Ok(classification) => classification,
            Err(e) => {
                warn!(issue = %issue.id, "Moderation classifier unavailable: {}", e);
                return Verdict::ClassifierUnavailable;
            }
        };

        if !classification.flagged {
            return Verdict::Approved;
        }
        let labels = mapped_labels(&classification.categories);
        if labels.is_empty() {
            warn!(
                issue = %issue.id,
                "Flagged with no mapped category: {:?}",
                classification.categories
            );
            Verdict::FlaggedUnmapped(classification.categories.into_iter().collect())
        } else {
            Verdict::Violation(labels)
        }
    }

    /// Tracker writes are best effort: failures are logged and never change
    /// the decision.
    async fn apply_side_effects(&self, issue: &IssuePayload, verdict: &Verdict) {
        let repo = &issue.repo;
        let number = issue.number;

        if let Err(e) = self.tracker.add_labels(repo, number, &[verdict.label()]).await {
            warn!(issue = %issue.id, "Failed to add label: {}", e);
        }
        if let Err(e) = self.tracker.comment(repo, number, &verdict.comment()).await {
            warn!(issue = %issue.id, "Failed to comment: {}", e);
        }
        if !verdict.is_terminal() {
            return;
        }
        if let Err(e) = self.tracker.close(repo, number).await {
            warn!(issue = %issue.id, "Failed to close issue: {}", e);
        }
        if issue.has_label(LABEL_PENDING) {
            if let Err(e) = self.tracker.remove_label(repo, number, LABEL_PENDING).await {
                warn!(issue = %issue.id, "Failed to remove pending label: {}", e);
            }
        }
    }
}
