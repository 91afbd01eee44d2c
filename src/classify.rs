//! Classification adapter.
//!
//! The pipeline only sees [`Classifier`], which always yields a [`Category`].
//! Model failures are absorbed here.

use crate::error::ModelError;
use crate::model::Category;
use async_trait::async_trait;
use tracing::warn;

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, subject: &str, body: &str) -> Category;
}

/// A zero-shot style model: scores `text` against the candidate labels,
/// best match first.
#[async_trait]
pub trait LabelModel: Send + Sync {
    async fn rank(&self, text: &str, candidates: &[&str]) -> Result<Vec<String>, ModelError>;
}

pub fn candidate_labels() -> Vec<&'static str> {
    Category::ALL.iter().map(|c| c.label()).collect()
}

/// Asks a [`LabelModel`] for the top label and falls back to keyword
/// matching when the model errors or answers outside the candidate set.
pub struct ZeroShotClassifier<M> {
    model: M,
    fallback: KeywordClassifier,
}

impl<M: LabelModel> ZeroShotClassifier<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            fallback: KeywordClassifier,
        }
    }
}

#[async_trait]
impl<M: LabelModel> Classifier for ZeroShotClassifier<M> {
    async fn classify(&self, subject: &str, body: &str) -> Category {
        let text = format!("{subject}\n{body}");
        let answer = self
            .model
            .rank(&text, &candidate_labels())
            .await
            .and_then(|labels| labels.into_iter().next().ok_or(ModelError::NoLabels));
        match answer {
            Ok(label) => match label.parse::<Category>() {
                Ok(category) => category,
                Err(e) => {
                    warn!(%e, "model answered outside the candidate set, using keyword fallback");
                    self.fallback.pick(subject, body)
                }
            },
            Err(e) => {
                warn!(%e, "using keyword fallback");
                self.fallback.pick(subject, body)
            }
        }
    }
}

/// Cheap rule-based classifier. Used standalone when no model is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

const OUT_OF_OFFICE: &[&str] = &[
    "out of office",
    "out-of-office",
    "auto-reply",
    "automatic reply",
    "autoreply",
    "on vacation",
    "on leave",
];
const MEETING_BOOKED: &[&str] = &[
    "meeting booked",
    "meeting confirmed",
    "invitation accepted",
    "calendar invite",
    "has been scheduled",
    "is confirmed for",
];
const NOT_INTERESTED: &[&str] = &[
    "not interested",
    "unfortunately",
    "regret to inform",
    "not moving forward",
    "other candidates",
    "position has been filled",
];
const SPAM: &[&str] = &[
    "unsubscribe",
    "winner",
    "free money",
    "act now",
    "limited time offer",
    "click here",
    "lottery",
];
const INTERESTED: &[&str] = &[
    "interested",
    "interview",
    "shortlisted",
    "next steps",
    "schedule a call",
    "would love to",
    "offer letter",
];

impl KeywordClassifier {
    pub fn pick(&self, subject: &str, body: &str) -> Category {
        let text = format!("{subject}\n{body}").to_lowercase();
        let hit = |words: &[&str]| words.iter().any(|w| text.contains(w));

        // Order matters: "not interested" must win over "interested".
        if hit(OUT_OF_OFFICE) {
            Category::OutOfOffice
        } else if hit(MEETING_BOOKED) {
            Category::MeetingBooked
        } else if hit(NOT_INTERESTED) {
            Category::NotInterested
        } else if hit(SPAM) {
            Category::Spam
        } else if hit(INTERESTED) {
            Category::Interested
        } else {
            Category::NotInterested
        }
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, subject: &str, body: &str) -> Category {
        self.pick(subject, body)
    }
}
