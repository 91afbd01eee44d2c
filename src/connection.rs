//! One supervised session per account: connect, backfill, then watch.

use crate::config::{AccountConfig, IngestConfig};
use crate::error::TransportError;
use crate::model::Origin;
use crate::pipeline::Pipeline;
use crate::state::{ConnectionEvent, ConnectionState};
use crate::transport::{ImapTransport, MailTransport, MailboxEvent};
use async_std::task::{self, JoinHandle};
use chrono::{Days, NaiveDate, Utc};
use futures::future::join_all;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    pub lookback_days: u32,
    pub mailbox: String,
    pub idle_timeout: Duration,
}

impl From<&IngestConfig> for MonitorSettings {
    fn from(config: &IngestConfig) -> Self {
        Self {
            lookback_days: config.lookback_days,
            mailbox: config.mailbox.clone(),
            idle_timeout: config.idle_timeout(),
        }
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

// Ids above the high-water mark, i.e. not yet handed to the pipeline
fn unseen(uids: &[u32], high_water: u32) -> Vec<u32> {
    uids.iter().copied().filter(|&uid| uid > high_water).collect()
}

/// Owns a transport and walks it through the connection lifecycle. The
/// transport is never shared; the pipeline is the only way out.
pub struct Connection<T> {
    label: String,
    transport: T,
    pipeline: Pipeline,
    lookback_days: u32,
    /// Highest UID already processed on this session.
    high_water: u32,
    state: ConnectionState,
    history: Vec<ConnectionState>,
}

impl<T: MailTransport> Connection<T> {
    pub fn new(label: &str, transport: T, pipeline: Pipeline, lookback_days: u32) -> Self {
        Self {
            label: label.to_string(),
            transport,
            pipeline,
            lookback_days,
            high_water: 0,
            state: ConnectionState::Disconnected,
            history: vec![ConnectionState::Disconnected],
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Every state entered so far, oldest first.
    pub fn history(&self) -> &[ConnectionState] {
        &self.history
    }

    fn apply(&mut self, event: ConnectionEvent) {
        match self.state.next(event) {
            Ok(next) => {
                debug!(account = %self.label, from = %self.state, to = %next, "transition");
                self.state = next;
                self.history.push(self.state.clone());
            }
            Err(e) => error!(account = %self.label, %e, "ignored transition"),
        }
    }

    /// Runs until the session ends or fails. Nothing is returned: every
    /// outcome is logged and recorded in the state.
    pub async fn run(&mut self) {
        match self.drive().await {
            Ok(()) => info!(account = %self.label, "connection ended"),
            Err(e) => {
                error!(account = %self.label, %e, "IMAP error, monitoring stopped");
                self.apply(ConnectionEvent::Fault(e.to_string()));
            }
        }
        self.transport.close().await;
    }

    async fn drive(&mut self) -> Result<(), TransportError> {
        self.apply(ConnectionEvent::Connect);
        self.transport.connect().await?;
        self.apply(ConnectionEvent::SessionReady);
        info!(account = %self.label, "IMAP connected");

        self.backfill().await?;
        self.apply(ConnectionEvent::BackfillDone);
        info!(account = %self.label, "listening for new mail");

        loop {
            match self.transport.wait_for_mail().await? {
                MailboxEvent::NewMail(count) => {
                    info!(account = %self.label, count, "new email(s) received");
                    self.apply(ConnectionEvent::NewMail);
                    self.fetch_new().await?;
                }
                MailboxEvent::KeepAlive => continue,
                MailboxEvent::Closed => {
                    self.apply(ConnectionEvent::Closed);
                    return Ok(());
                }
            }
        }
    }

    async fn backfill(&mut self) -> Result<(), TransportError> {
        self.apply(ConnectionEvent::BackfillStarted);
        let since = today()
            .checked_sub_days(Days::new(u64::from(self.lookback_days)))
            .unwrap_or(NaiveDate::MIN);
        let uids = self.transport.search_since(since).await?;
        if uids.is_empty() {
            info!(account = %self.label, days = self.lookback_days, "no emails in lookback window");
            return Ok(());
        }
        self.high_water = uids.iter().copied().max().unwrap_or(self.high_water);
        let messages = self.transport.fetch(&uids).await?;
        self.pipeline
            .process_batch(&self.label, messages, Origin::Backfill)
            .await;
        Ok(())
    }

    // Everything from today above the high-water mark, however many
    // notifications it took to announce it
    async fn fetch_new(&mut self) -> Result<(), TransportError> {
        let uids = self.transport.search_since(today()).await?;
        let fresh = unseen(&uids, self.high_water);
        let Some(&top) = fresh.last() else {
            debug!(account = %self.label, high_water = self.high_water, "nothing new since today");
            return Ok(());
        };
        self.high_water = top;
        let messages = self.transport.fetch(&fresh).await?;
        self.pipeline
            .process_batch(&self.label, messages, Origin::Live)
            .await;
        Ok(())
    }
}

/// Spawns and supervises one independent task per account.
pub struct ConnectionManager {
    pipeline: Pipeline,
    settings: MonitorSettings,
    tasks: Vec<(String, JoinHandle<ConnectionState>)>,
}

impl ConnectionManager {
    pub fn new(pipeline: Pipeline, settings: MonitorSettings) -> Self {
        Self {
            pipeline,
            settings,
            tasks: Vec::new(),
        }
    }

    /// Starts monitoring `account` over IMAP. Failures stay inside the
    /// account's task and are only logged.
    pub fn start_monitoring(&mut self, account: AccountConfig) {
        let label = account.label.clone();
        let transport = ImapTransport::new(account, &self.settings.mailbox, self.settings.idle_timeout);
        self.start_with(&label, transport);
    }

    pub fn start_with<T>(&mut self, label: &str, transport: T)
    where
        T: MailTransport + 'static,
    {
        info!(account = %label, "starting monitor");
        let mut connection = Connection::new(label, transport, self.pipeline.clone(), self.settings.lookback_days);
        let handle = task::spawn(async move {
            connection.run().await;
            connection.state().clone()
        });
        self.tasks.push((label.to_string(), handle));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for every account task and returns each final state.
    pub async fn join(self) -> Vec<(String, ConnectionState)> {
        let (labels, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        labels.into_iter().zip(join_all(handles).await).collect()
    }
}
