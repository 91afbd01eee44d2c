use thiserror::Error;

/// Connection-level fault. Fatal for the owning connection only.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("TCP connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("TLS handshake with {host} failed: {source}")]
    Tls {
        host: String,
        #[source]
        source: async_native_tls::Error,
    },
    #[error("IMAP login for {user} failed: {source}")]
    Login {
        user: String,
        #[source]
        source: async_imap::error::Error,
    },
    #[error("IMAP protocol error: {0}")]
    Imap(#[from] async_imap::error::Error),
    #[error("Session is not open")]
    NotConnected,
}

/// Per-message fault. The message is dropped, the batch continues.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Message {seq} has an empty body")]
    Empty { seq: u32 },
    #[error("Body stream of message {seq} failed: {source}")]
    Stream {
        seq: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("Message {seq} is not a parseable RFC 5322 message")]
    Malformed { seq: u32 },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Index request failed: {0}")]
    Http(#[source] Box<ureq::Error>),
    #[error("Index response was unreadable: {0}")]
    Response(#[from] std::io::Error),
    #[error("Index response carried no document id")]
    MissingId,
    #[error("Storage backend rejected the record: {0}")]
    Rejected(String),
}

impl From<ureq::Error> for StorageError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, response) => {
                let body = response.into_string().unwrap_or_default();
                StorageError::Rejected(format!("HTTP {code}: {body}"))
            }
            other => StorageError::Http(Box::new(other)),
        }
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Webhook delivery failed: {0}")]
    Http(#[source] Box<ureq::Error>),
    #[error("Sink refused delivery with HTTP {0}")]
    Refused(u16),
}

impl From<ureq::Error> for NotifyError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, _) => NotifyError::Refused(code),
            other => NotifyError::Http(Box::new(other)),
        }
    }
}

/// Failure reported by a classification model. Never leaves the classifier.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Classification model unavailable: {0}")]
    Unavailable(String),
    #[error("Classification model returned no labels")]
    NoLabels,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
    #[error("Could not read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not decode config file {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
