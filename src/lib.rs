//! Multi-account mail ingestion.
//!
//! Each configured account gets its own IMAP session that backfills a
//! lookback window and then watches the mailbox. Every fetched message is
//! parsed, classified, indexed and published on an [`bus::EventBus`];
//! interesting live messages also go out to the notification sinks.

pub mod body;
pub mod bus;
pub mod classify;
pub mod config;
pub mod connection;
pub mod error;
pub mod model;
pub mod notify;
pub mod parse;
pub mod pipeline;
pub mod push;
pub mod state;
pub mod store;
pub mod transport;

pub use bus::EventBus;
pub use config::{AccountConfig, IngestConfig};
pub use connection::{Connection, ConnectionManager, MonitorSettings};
pub use model::{Category, IngestionEvent, Origin, ParsedEmail};
pub use pipeline::Pipeline;
pub use state::ConnectionState;
