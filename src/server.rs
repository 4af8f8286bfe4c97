//! Composes the core's subsystems behind one value the transport layer
//! owns: store, orchestrator, writer, and an optional webhook dispatcher.
//! No global mutable state; [`crate::config::Configuration`] is immutable.

use std::sync::Arc;

use tracing::info;

use crate::config::Configuration;
use crate::error::Result;
use crate::indexer::Orchestrator;
use crate::resources::ResourceAssembler;
use crate::search::{self, SearchOptions};
use crate::store::Store;
use crate::webhook::WebhookDispatcher;
use crate::write::Writer;

pub struct Server {
    config: Configuration,
    store: Arc<Store>,
    orchestrator: Arc<Orchestrator>,
    writer: Writer,
    resources: ResourceAssembler,
    webhooks: Option<Arc<WebhookDispatcher>>,
}

impl Server {
    /// Opens (or creates) the index database, runs migrations, and — if the
    /// index holds zero projects — performs a full rebuild before returning.
    pub async fn new(config: Configuration) -> Result<Self> {
        let store = Arc::new(Store::open(&config.db_path).await?);
        let orchestrator = Arc::new(Orchestrator::new(config.root.clone(), store.clone()));

        let projects = store.list_projects().await?;
        if projects.is_empty() {
            let report = orchestrator.full_rebuild().await?;
            info!(documents = report.document_count, "startup rebuild complete");
        }

        let webhooks = if config.webhooks_enabled {
            Some(Arc::new(WebhookDispatcher::new(store.clone())))
        } else {
            None
        };

        let writer = Writer::new(
            config.root.clone(),
            orchestrator.clone(),
            webhooks.clone(),
            config.read_only,
        );
        let resources = ResourceAssembler::new(config.root.clone(), store.clone());

        Ok(Self { config, store, orchestrator, writer, resources, webhooks })
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn writer(&self) -> &Writer {
        &self.writer
    }

    pub fn resources(&self) -> &ResourceAssembler {
        &self.resources
    }

    pub fn webhooks(&self) -> Option<&Arc<WebhookDispatcher>> {
        self.webhooks.as_ref()
    }

    pub async fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<crate::models::SearchResult>> {
        search::search(&self.store, query, opts).await
    }

    /// Signals the webhook dispatcher to stop accepting new deliveries and
    /// waits up to [`crate::webhook::DEFAULT_SHUTDOWN_GRACE`] for in-flight
    /// ones to finish before returning.
    pub async fn shutdown(&self) {
        if let Some(webhooks) = &self.webhooks {
            webhooks.shutdown(crate::webhook::DEFAULT_SHUTDOWN_GRACE).await;
        }
    }
}
