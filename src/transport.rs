use crate::body::RawMessage;
use crate::config::AccountConfig;
use crate::error::TransportError;
use async_imap::extensions::idle::IdleResponse;
use async_imap::imap_proto::types::{MailboxDatum, Response as ImapResponse, Status};
use async_imap::types::UnsolicitedResponse;
use async_imap::Client as AsyncImapClient;
use async_imap::Session as ImapSession;
use async_native_tls::TlsConnector;
use async_std::io::{Read, Write};
use async_std::net::TcpStream;
use async_trait::async_trait;
use chrono::NaiveDate;
use core::fmt;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// What the mailbox watch reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxEvent {
    /// At least this many messages arrived.
    NewMail(u32),
    /// Nothing relevant happened before the watch expired.
    KeepAlive,
    /// The server ended the session.
    Closed,
}

/// The protocol session one connection drives. Messages are addressed by
/// UID, which stays stable while the session is open.
#[async_trait]
pub trait MailTransport: Send {
    /// Opens the session and selects the monitored mailbox.
    async fn connect(&mut self) -> Result<(), TransportError>;
    /// UIDs of messages received on or after `since`, ascending.
    async fn search_since(&mut self, since: NaiveDate) -> Result<Vec<u32>, TransportError>;
    /// Full raw bodies for the given UIDs.
    async fn fetch(&mut self, uids: &[u32]) -> Result<Vec<RawMessage>, TransportError>;
    /// Blocks until the server reports a change or the watch times out.
    async fn wait_for_mail(&mut self) -> Result<MailboxEvent, TransportError>;
    /// Stops watching and releases the session. Errors are only logged.
    async fn close(&mut self);
}

pub trait ImapStream: Read + Write + Unpin + Send + fmt::Debug {}

impl<T> ImapStream for T where T: Read + Write + Unpin + Send + fmt::Debug {}

type Session = ImapSession<Box<dyn ImapStream>>;

/// IMAP `SINCE` date, e.g. `17-Oct-2026`.
pub fn imap_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

// EXISTS carries the new mailbox size; the difference is what arrived
pub(crate) fn arrived(previous: Option<u32>, exists: u32) -> u32 {
    match previous {
        Some(prev) if exists > prev => exists - prev,
        _ => 1,
    }
}

/// Compact IMAP set for ascending ids: `[1, 2, 3, 7, 9, 10]` -> `1:3,7,9:10`.
pub fn sequence_set(ids: &[u32]) -> String {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for &id in ids {
        match runs.last_mut() {
            Some((_, end)) if end.checked_add(1) == Some(id) => *end = id,
            Some((_, end)) if *end == id => {}
            _ => runs.push((id, id)),
        }
    }
    runs.iter()
        .map(|&(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}:{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

async fn open_stream(account: &AccountConfig) -> Result<Box<dyn ImapStream>, TransportError> {
    let addr = format!("{}:{}", account.host, account.port);
    let tcp = TcpStream::connect(&addr)
        .await
        .map_err(|source| TransportError::Connect {
            addr: addr.clone(),
            source,
        })?;
    if !account.tls {
        warn!(account = %account.label, "transport security disabled");
        return Ok(Box::new(tcp));
    }
    let tls = TlsConnector::new()
        .use_sni(true)
        .connect(account.host.as_str(), tcp)
        .await
        .map_err(|source| TransportError::Tls {
            host: account.host.clone(),
            source,
        })?;
    Ok(Box::new(tls))
}

pub struct ImapTransport {
    account: AccountConfig,
    mailbox: String,
    idle_timeout: Duration,
    session: Option<Session>,
    exists: Option<u32>,
}

impl ImapTransport {
    pub fn new(account: AccountConfig, mailbox: &str, idle_timeout: Duration) -> Self {
        Self {
            account,
            mailbox: mailbox.to_string(),
            idle_timeout,
            session: None,
            exists: None,
        }
    }

    // Mailbox changes the server reported while no IDLE was running
    fn drain_unsolicited(&mut self, session: &mut Session) -> Option<u32> {
        let mut grew = 0;
        while let Ok(response) = session.unsolicited_responses.try_recv() {
            match response {
                UnsolicitedResponse::Exists(exists) => {
                    if self.exists.map_or(true, |prev| exists > prev) {
                        grew += arrived(self.exists, exists);
                    }
                    self.exists = Some(exists);
                }
                UnsolicitedResponse::Expunge(_) => {
                    self.exists = self.exists.map(|n| n.saturating_sub(1));
                }
                other => trace!(account = %self.account.label, "ignoring unsolicited {:?}", other),
            }
        }
        (grew > 0).then_some(grew)
    }

    // Untagged data seen while idling, reduced to what the watcher cares about
    fn interpret(&mut self, response: &IdleResponse) -> MailboxEvent {
        let IdleResponse::NewData(data) = response else {
            return MailboxEvent::KeepAlive;
        };
        match data.parsed() {
            ImapResponse::MailboxData(MailboxDatum::Exists(exists)) => {
                let count = arrived(self.exists, *exists);
                self.exists = Some(*exists);
                info!(account = %self.account.label, exists, count, "mailbox grew");
                MailboxEvent::NewMail(count)
            }
            ImapResponse::Expunge(_) => {
                self.exists = self.exists.map(|n| n.saturating_sub(1));
                MailboxEvent::KeepAlive
            }
            ImapResponse::Data {
                status: Status::Bye,
                information,
                ..
            } => {
                info!(account = %self.account.label, ?information, "server said BYE");
                MailboxEvent::Closed
            }
            other => {
                debug!(account = %self.account.label, "ignoring idle data {:?}", other);
                MailboxEvent::KeepAlive
            }
        }
    }
}

#[async_trait]
impl MailTransport for ImapTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        info!(
            account = %self.account.label,
            host = %self.account.host,
            port = self.account.port,
            tls = self.account.tls,
            "IMAP connecting"
        );
        let client = AsyncImapClient::new(open_stream(&self.account).await?);
        let mut session = client
            .login(&self.account.user, &self.account.password)
            .await
            .map_err(|(source, _client)| TransportError::Login {
                user: self.account.user.clone(),
                source,
            })?;

        // Read-only: ingestion never changes flags
        let mailbox = session.examine(&self.mailbox).await?;
        self.exists = Some(mailbox.exists);
        info!(account = %self.account.label, mailbox = %self.mailbox, exists = mailbox.exists, "mailbox opened");
        self.session = Some(session);
        Ok(())
    }

    async fn search_since(&mut self, since: NaiveDate) -> Result<Vec<u32>, TransportError> {
        let session = self.session.as_mut().ok_or(TransportError::NotConnected)?;
        let query = format!("SINCE {}", imap_date(since));
        let mut uids: Vec<u32> = session.uid_search(&query).await?.into_iter().collect();
        uids.sort_unstable();
        debug!(account = %self.account.label, %query, hits = uids.len(), "search done");
        Ok(uids)
    }

    async fn fetch(&mut self, uids: &[u32]) -> Result<Vec<RawMessage>, TransportError> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let session = self.session.as_mut().ok_or(TransportError::NotConnected)?;
        let set = sequence_set(uids);

        let fetches: Vec<_> = session.uid_fetch(&set, "RFC822").await?.collect().await;
        let mut messages = Vec::with_capacity(fetches.len());
        for item in fetches {
            let fetch = item?;
            let uid = fetch.uid.unwrap_or(fetch.message);
            trace!(account = %self.account.label, uid, "fetched");
            let body = fetch.body().map(<[u8]>::to_vec).unwrap_or_default();
            messages.push(RawMessage::from_bytes(uid, body));
        }
        Ok(messages)
    }

    async fn wait_for_mail(&mut self) -> Result<MailboxEvent, TransportError> {
        let mut session = self.session.take().ok_or(TransportError::NotConnected)?;
        if let Some(count) = self.drain_unsolicited(&mut session) {
            debug!(account = %self.account.label, count, "mail arrived outside IDLE");
            self.session = Some(session);
            return Ok(MailboxEvent::NewMail(count));
        }
        let mut idle = session.idle();
        idle.init().await?;

        let (wait, _stop) = idle.wait_with_timeout(self.idle_timeout);
        let response = match wait.await {
            Ok(response) => response,
            Err(async_imap::error::Error::ConnectionLost) => return Ok(MailboxEvent::Closed),
            Err(e) => return Err(e.into()),
        };
        let event = self.interpret(&response);

        let session = idle.done().await?;
        self.session = Some(session);
        Ok(event)
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            match session.logout().await {
                Ok(()) => info!(account = %self.account.label, "logged out"),
                Err(e) => debug!(account = %self.account.label, %e, "logout failed"),
            }
        }
    }
}
