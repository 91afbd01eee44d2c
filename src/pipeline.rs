//! Per-message orchestration: body -> parse -> classify -> store -> publish
//! -> (live + Interested) notify.

use crate::body::RawMessage;
use crate::bus::{EventBus, NEW_EMAIL};
use crate::classify::Classifier;
use crate::error::ParseError;
use crate::model::{Category, EmailRecord, IngestionEvent, Origin};
use crate::notify::Notifier;
use crate::parse::parse_email;
use crate::store::EmailStore;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CONCURRENCY: usize = 8;

/// What happened to one message that made it past parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub seq: u32,
    pub category: Category,
    pub stored: bool,
    /// Sinks that accepted the notification; `None` when none was due.
    pub notified: Option<usize>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub parse_failures: usize,
    pub stored: usize,
    pub notified: usize,
}

impl BatchReport {
    fn add(&mut self, outcome: &Result<Processed, ParseError>) {
        match outcome {
            Ok(p) => {
                self.processed += 1;
                self.stored += usize::from(p.stored);
                self.notified += usize::from(p.notified.is_some());
            }
            Err(_) => self.parse_failures += 1,
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    classifier: Arc<dyn Classifier>,
    store: Arc<dyn EmailStore>,
    bus: EventBus<IngestionEvent>,
    notifier: Notifier,
    concurrency: usize,
}

impl Pipeline {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        store: Arc<dyn EmailStore>,
        bus: EventBus<IngestionEvent>,
        notifier: Notifier,
    ) -> Self {
        Self {
            classifier,
            store,
            bus,
            notifier,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Runs every message of one fetch through the pipeline. Messages are in
    /// flight concurrently and may finish in any order; a failure on one never
    /// stops the rest.
    pub async fn process_batch(
        &self,
        account: &str,
        messages: Vec<RawMessage>,
        origin: Origin,
    ) -> BatchReport {
        let total = messages.len();
        let report = stream::iter(messages)
            .map(|raw| self.process(account, raw, origin))
            .buffer_unordered(self.concurrency)
            .fold(BatchReport::default(), |mut report, outcome| async move {
                report.add(&outcome);
                report
            })
            .await;
        info!(
            account,
            ?origin,
            total,
            processed = report.processed,
            parse_failures = report.parse_failures,
            stored = report.stored,
            notified = report.notified,
            "batch done"
        );
        report
    }

    pub async fn process(
        &self,
        account: &str,
        raw: RawMessage,
        origin: Origin,
    ) -> Result<Processed, ParseError> {
        let seq = raw.seq;
        let email = match raw.into_reader().await.and_then(|body| parse_email(seq, &body)) {
            Ok(email) => email,
            Err(e) => {
                error!(account, seq, %e, "failed to parse email");
                return Err(e);
            }
        };

        let category = self.classifier.classify(&email.subject, &email.body_text).await;
        info!(account, seq, from = %email.from, subject = %email.subject, %category, "email classified");

        let received = chrono::Utc::now().to_rfc3339();
        let record = EmailRecord::new(&email, category, account, &received);
        let stored = match self.store.store(&record, account).await {
            Ok(id) => {
                debug!(account, seq, %id, "email stored");
                true
            }
            Err(e) => {
                warn!(account, seq, %e, "failed to store email");
                false
            }
        };

        let event = IngestionEvent::new(&email, category, account, &received);
        let subscribers = self.bus.publish(NEW_EMAIL, event.clone());
        debug!(account, seq, subscribers, "event published");

        let notified = if origin.is_live() && category == Category::Interested {
            Some(self.notifier.dispatch(&event).await)
        } else {
            None
        };

        Ok(Processed {
            seq,
            category,
            stored,
            notified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::KeywordClassifier;
    use crate::error::StorageError;
    use crate::store::RecordId;
    use async_trait::async_trait;

    struct Refusing;

    #[async_trait]
    impl EmailStore for Refusing {
        async fn store(&self, _record: &EmailRecord, _account: &str) -> Result<RecordId, StorageError> {
            Err(StorageError::MissingId)
        }
    }

    fn message(seq: u32, subject: &str, body: &str) -> RawMessage {
        let raw = format!("From: a@example.com\r\nSubject: {subject}\r\n\r\n{body}\r\n");
        RawMessage::from_bytes(seq, raw.into_bytes())
    }

    #[async_std::test]
    async fn storage_failure_still_publishes() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(NEW_EMAIL);
        let pipeline = Pipeline::new(
            Arc::new(KeywordClassifier),
            Arc::new(Refusing),
            bus,
            Notifier::default(),
        );

        let outcome = pipeline
            .process("Account-1", message(1, "Lunch", "see you"), Origin::Live)
            .await
            .unwrap();
        assert!(!outcome.stored);
        assert_eq!(outcome.notified, None);

        let event = sub.next().await.unwrap();
        assert_eq!(event.subject, "Lunch");
        assert_eq!(event.account, "Account-1");
    }

    #[async_std::test]
    async fn report_counts_failures() {
        let pipeline = Pipeline::new(
            Arc::new(KeywordClassifier),
            Arc::new(Refusing),
            EventBus::new(),
            Notifier::default(),
        )
        .with_concurrency(0);

        let batch = vec![
            message(1, "a", "b"),
            RawMessage::from_bytes(2, Vec::new()),
            message(3, "c", "d"),
        ];
        let report = pipeline.process_batch("Account-1", batch, Origin::Backfill).await;
        assert_eq!(
            report,
            BatchReport {
                processed: 2,
                parse_failures: 1,
                stored: 0,
                notified: 0
            }
        );
    }
}
