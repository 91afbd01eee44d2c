use crate::error::StorageError;
use crate::model::EmailRecord;
use async_std::task::spawn_blocking;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

pub type RecordId = String;

#[async_trait]
pub trait EmailStore: Send + Sync {
    async fn store(&self, record: &EmailRecord, account: &str) -> Result<RecordId, StorageError>;
}

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Search-index backed store speaking the Elasticsearch document API.
#[derive(Clone)]
pub struct ElasticStore {
    base_url: String,
    index: String,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
struct IndexResponse {
    #[serde(rename = "_id")]
    id: Option<String>,
}

#[derive(Deserialize)]
struct HealthResponse {
    status: String,
}

impl ElasticStore {
    pub fn new(base_url: &str, index: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
            agent: ureq::AgentBuilder::new().timeout(HTTP_TIMEOUT).build(),
        }
    }

    pub fn index_url(&self) -> String {
        format!("{}/{}", self.base_url, self.index)
    }

    /// Cluster health status ("green", "yellow", "red").
    pub async fn ping(&self) -> Result<String, StorageError> {
        let agent = self.agent.clone();
        let url = format!("{}/_cluster/health", self.base_url);
        spawn_blocking(move || -> Result<String, StorageError> {
            let health: HealthResponse = agent.get(&url).call()?.into_json()?;
            Ok(health.status)
        })
        .await
    }

    /// Creates the index with the record mapping unless it already exists.
    pub async fn ensure_index(&self) -> Result<bool, StorageError> {
        let agent = self.agent.clone();
        let url = self.index_url();
        let created = spawn_blocking(move || -> Result<bool, StorageError> {
            match agent.head(&url).call() {
                Ok(_) => return Ok(false),
                Err(ureq::Error::Status(404, _)) => {}
                Err(e) => return Err(e.into()),
            }
            agent.put(&url).send_json(index_mapping())?;
            Ok(true)
        })
        .await?;
        if created {
            info!(index = %self.index, "created email index");
        } else {
            info!(index = %self.index, "email index already exists");
        }
        Ok(created)
    }
}

#[async_trait]
impl EmailStore for ElasticStore {
    async fn store(&self, record: &EmailRecord, account: &str) -> Result<RecordId, StorageError> {
        let mut doc = serde_json::to_value(record)
            .map_err(|e| StorageError::Rejected(e.to_string()))?;
        doc["account"] = Value::String(account.to_string());

        let agent = self.agent.clone();
        let url = format!("{}/_doc", self.index_url());
        spawn_blocking(move || -> Result<RecordId, StorageError> {
            let response: IndexResponse = agent.post(&url).send_json(doc)?.into_json()?;
            response.id.ok_or(StorageError::MissingId)
        })
        .await
    }
}

pub fn index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "from": { "type": "text" },
                "to": { "type": "text" },
                "subject": { "type": "text" },
                "text": { "type": "text" },
                "html": { "type": "text" },
                "date": { "type": "date" },
                "messageId": { "type": "keyword" },
                "account": { "type": "keyword" },
                "labels": { "type": "keyword" },
                "category": { "type": "keyword" },
                "attachments": {
                    "type": "nested",
                    "properties": {
                        "filename": { "type": "text" },
                        "contentType": { "type": "keyword" },
                        "size": { "type": "long" }
                    }
                }
            }
        }
    })
}
