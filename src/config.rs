use crate::error::ConfigError;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Highest numbered `EMAIL_USER_<n>` slot that is looked at.
pub const MAX_ACCOUNTS: usize = 8;

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct AccountConfig {
    pub label: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    #[serde(default = "default_tls")]
    pub tls: bool,
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("label", &self.label)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("tls", &self.tls)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default = "default_lookback")]
    pub lookback_days: u32,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    #[serde(default = "default_idle")]
    pub idle_timeout: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub slack_webhook_url: Option<String>,
    #[serde(default)]
    pub generic_webhook_url: Option<String>,
    #[serde(default = "default_es_url")]
    pub elasticsearch_url: String,
    #[serde(default = "default_es_index")]
    pub elasticsearch_index: String,
    #[serde(default = "default_push_addr")]
    pub push_addr: Option<String>,
}

fn default_host() -> String {
    "imap.gmail.com".to_string()
}

// Account slots 1 and 2 are conventionally Gmail and Outlook
fn default_host_for(slot: usize) -> String {
    match slot {
        2 => "imap.outlook.com".to_string(),
        _ => default_host(),
    }
}

fn default_port() -> u16 {
    993
}

fn default_tls() -> bool {
    true
}

fn default_lookback() -> u32 {
    30
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

// IDLE is re-issued after this many seconds; servers drop idlers after ~29 min
fn default_idle() -> u64 {
    300
}

fn default_concurrency() -> usize {
    crate::pipeline::DEFAULT_CONCURRENCY
}

fn default_es_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_es_index() -> String {
    "emails".to_string()
}

fn default_push_addr() -> Option<String> {
    Some("127.0.0.1:3001".to_string())
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            lookback_days: default_lookback(),
            mailbox: default_mailbox(),
            idle_timeout: default_idle(),
            concurrency: default_concurrency(),
            slack_webhook_url: None,
            generic_webhook_url: None,
            elasticsearch_url: default_es_url(),
            elasticsearch_index: default_es_index(),
            push_addr: default_push_addr(),
        }
    }
}

fn parsed<T: FromStr>(key: &str, value: Option<String>) -> Result<Option<T>, ConfigError> {
    match value {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
            }),
    }
}

fn flag(key: &str, value: Option<String>) -> Result<Option<bool>, ConfigError> {
    match value.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(None),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(Some(true)),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(Some(false)),
        Some(_) => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: value.unwrap_or_default(),
        }),
    }
}

// Empty strings count as unset
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl IngestConfig {
    /// Reads `INGEST_CONFIG` (a JSON file) when set, the environment otherwise.
    pub fn load() -> Result<Self, ConfigError> {
        match non_empty(std::env::var("INGEST_CONFIG").ok()) {
            Some(path) => Self::from_json_file(&path),
            None => Self::from_lookup(|key| std::env::var(key).ok()),
        }
    }

    pub fn from_json_file(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Decode {
            path: path.to_string(),
            source,
        })
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));
        let defaults = Self::default();

        let mut accounts = Vec::new();
        for n in 1..=MAX_ACCOUNTS {
            let mut user = get(&format!("EMAIL_USER_{n}"));
            let mut password = get(&format!("EMAIL_PASS_{n}"));
            if n == 1 && user.is_none() && password.is_none() {
                user = get("EMAIL_USER");
                password = get("EMAIL_PASS");
            }
            let (user, password) = match (user, password) {
                (Some(user), Some(password)) => (user, password),
                (None, None) => continue,
                _ => {
                    warn!(account = n, "incomplete credentials, skipping account");
                    continue;
                }
            };
            let port_key = format!("IMAP_PORT_{n}");
            let tls_key = format!("IMAP_TLS_{n}");
            accounts.push(AccountConfig {
                label: get(&format!("EMAIL_LABEL_{n}")).unwrap_or_else(|| format!("Account-{n}")),
                host: get(&format!("IMAP_HOST_{n}")).unwrap_or_else(|| default_host_for(n)),
                port: parsed(&port_key, get(&port_key))?.unwrap_or_else(default_port),
                user,
                password,
                tls: flag(&tls_key, get(&tls_key))?.unwrap_or_else(default_tls),
            });
        }
        info!(accounts = accounts.len(), "accounts configured");

        Ok(Self {
            accounts,
            lookback_days: parsed("INGEST_LOOKBACK_DAYS", get("INGEST_LOOKBACK_DAYS"))?
                .unwrap_or(defaults.lookback_days),
            mailbox: get("INGEST_MAILBOX").unwrap_or(defaults.mailbox),
            idle_timeout: parsed("INGEST_IDLE_TIMEOUT_SECS", get("INGEST_IDLE_TIMEOUT_SECS"))?
                .unwrap_or(defaults.idle_timeout),
            concurrency: parsed("INGEST_CONCURRENCY", get("INGEST_CONCURRENCY"))?
                .unwrap_or(defaults.concurrency),
            slack_webhook_url: get("SLACK_WEBHOOK_URL"),
            generic_webhook_url: get("GENERIC_WEBHOOK_URL"),
            elasticsearch_url: get("ELASTICSEARCH_URL").unwrap_or(defaults.elasticsearch_url),
            elasticsearch_index: get("ELASTICSEARCH_INDEX").unwrap_or(defaults.elasticsearch_index),
            // Set-but-empty disables the endpoint
            push_addr: match lookup("PUSH_ADDR") {
                Some(addr) => non_empty(Some(addr)),
                None => defaults.push_addr,
            },
        })
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<IngestConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        IngestConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config, IngestConfig::default());
        assert!(config.accounts.is_empty());
        assert_eq!(config.lookback_days, 30);
        assert_eq!(config.idle_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn numbered_accounts_and_skips() {
        let config = from_pairs(&[
            ("EMAIL_USER_1", "a@gmail.com"),
            ("EMAIL_PASS_1", "pw1"),
            ("EMAIL_USER_2", "b@outlook.com"),
            // no password for 2
            ("EMAIL_USER_3", "c@corp.example"),
            ("EMAIL_PASS_3", "pw3"),
            ("IMAP_HOST_3", "imap.corp.example"),
            ("IMAP_PORT_3", "143"),
            ("IMAP_TLS_3", "false"),
            ("EMAIL_LABEL_3", "Work"),
        ])
        .unwrap();
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[0].label, "Account-1");
        assert_eq!(config.accounts[0].host, "imap.gmail.com");
        assert_eq!(config.accounts[0].port, 993);
        assert!(config.accounts[0].tls);
        let work = &config.accounts[1];
        assert_eq!(work.label, "Work");
        assert_eq!(work.host, "imap.corp.example");
        assert_eq!(work.port, 143);
        assert!(!work.tls);
    }

    #[test]
    fn second_slot_defaults_to_outlook() {
        let config = from_pairs(&[
            ("EMAIL_USER_1", "a@gmail.com"),
            ("EMAIL_PASS_1", "pw1"),
            ("EMAIL_USER_2", "b@outlook.com"),
            ("EMAIL_PASS_2", "pw2"),
            ("EMAIL_USER_3", "c@gmail.com"),
            ("EMAIL_PASS_3", "pw3"),
        ])
        .unwrap();
        let hosts: Vec<&str> = config.accounts.iter().map(|a| a.host.as_str()).collect();
        assert_eq!(hosts, ["imap.gmail.com", "imap.outlook.com", "imap.gmail.com"]);
    }

    #[test]
    fn unsuffixed_pair_is_first_account() {
        let config = from_pairs(&[("EMAIL_USER", "me@gmail.com"), ("EMAIL_PASS", "pw")]).unwrap();
        assert_eq!(config.accounts.len(), 1);
        assert_eq!(config.accounts[0].user, "me@gmail.com");
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = from_pairs(&[("INGEST_LOOKBACK_DAYS", "a month")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "INGEST_LOOKBACK_DAYS"));
        assert!(from_pairs(&[
            ("EMAIL_USER_1", "a"),
            ("EMAIL_PASS_1", "b"),
            ("IMAP_TLS_1", "maybe")
        ])
        .is_err());
    }

    #[test]
    fn empty_push_addr_disables_endpoint() {
        assert_eq!(from_pairs(&[("PUSH_ADDR", "")]).unwrap().push_addr, None);
        assert_eq!(
            from_pairs(&[("PUSH_ADDR", "0.0.0.0:8080")]).unwrap().push_addr.as_deref(),
            Some("0.0.0.0:8080")
        );
    }

    #[test]
    fn json_defaults_match() {
        let config: IngestConfig = serde_json::from_str(
            r#"{"accounts":[{"label":"A","user":"u","password":"p"}],"lookback_days":7}"#,
        )
        .unwrap();
        assert_eq!(config.lookback_days, 7);
        assert_eq!(config.accounts[0].port, 993);
        assert_eq!(config.mailbox, "INBOX");
        assert_eq!(config.push_addr.as_deref(), Some("127.0.0.1:3001"));
    }

    #[test]
    fn debug_redacts_password() {
        let account = AccountConfig {
            label: "A".into(),
            host: default_host(),
            port: 993,
            user: "u".into(),
            password: "hunter2".into(),
            tls: true,
        };
        assert!(!format!("{account:?}").contains("hunter2"));
    }
}
