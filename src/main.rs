use anyhow::Result;
use async_std::task;
use mail_ingest::classify::KeywordClassifier;
use mail_ingest::notify::{NotificationSink, Notifier, SlackSink, WebhookSink};
use mail_ingest::push::PushServer;
use mail_ingest::store::ElasticStore;
use mail_ingest::{ConnectionManager, EventBus, IngestConfig, MonitorSettings, Pipeline};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[async_std::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = IngestConfig::load()?;
    debug!(?config);
    info!("starting mail ingestion");

    let store = ElasticStore::new(&config.elasticsearch_url, &config.elasticsearch_index);
    match store.ping().await {
        Ok(status) => info!(%status, "search index reachable"),
        Err(e) => warn!(%e, "search index unreachable, records will not be stored"),
    }
    if let Err(e) = store.ensure_index().await {
        warn!(%e, "could not prepare email index");
    }

    let mut sinks: Vec<Arc<dyn NotificationSink>> = Vec::new();
    if let Some(url) = &config.slack_webhook_url {
        sinks.push(Arc::new(SlackSink::new(url.as_str())));
    }
    if let Some(url) = &config.generic_webhook_url {
        sinks.push(Arc::new(WebhookSink::new(url.as_str())));
    }
    info!(sinks = sinks.len(), "notification sinks configured");

    let bus = EventBus::new();
    let pipeline = Pipeline::new(
        Arc::new(KeywordClassifier),
        Arc::new(store),
        bus.clone(),
        Notifier::new(sinks),
    )
    .with_concurrency(config.concurrency);

    if let Some(addr) = &config.push_addr {
        let server = PushServer::bind(addr).await?;
        let bus = bus.clone();
        task::spawn(async move {
            if let Err(e) = server.run(bus).await {
                error!(%e, "push endpoint stopped");
            }
        });
    }

    let mut manager = ConnectionManager::new(pipeline, MonitorSettings::from(&config));
    for account in config.accounts.iter().cloned() {
        manager.start_monitoring(account);
    }
    if manager.is_empty() {
        warn!("no accounts configured, set EMAIL_USER_1 / EMAIL_PASS_1");
        return Ok(());
    }

    for (account, state) in manager.join().await {
        info!(%account, %state, "monitor finished");
    }
    Ok(())
}
