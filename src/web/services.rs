// src/web/services.rs
//! Long-lived services shared by every request.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::core::ConfigManager;
use crate::extraction::{ChatExtractionClient, TextExtractor};
use crate::notify::gateway_from_config;
use crate::onboarding::CandidateOnboarding;
use crate::store::{DocumentStore, SqliteStore};
use crate::sync::{OfferPolicy, SyncEngine, SyncHandle};

pub struct AppState {
    pub engine: Arc<SyncEngine>,
    pub onboarding: CandidateOnboarding,
    pub extractor: Arc<dyn TextExtractor>,
    pub config: ConfigManager,
}

impl AppState {
    pub fn new(
        config: ConfigManager,
        store: Arc<dyn DocumentStore>,
        extractor: Arc<dyn TextExtractor>,
        engine: Arc<SyncEngine>,
    ) -> Self {
        let onboarding = CandidateOnboarding::new(store, Arc::clone(&extractor));
        Self {
            engine,
            onboarding,
            extractor,
            config,
        }
    }

    /// Opens the SQLite store and wires the engine from configuration.
    /// The returned handle keeps the change streams alive.
    pub async fn from_config(config: ConfigManager) -> Result<(Self, SyncHandle)> {
        config.ensure_directories().await?;

        let store: Arc<dyn DocumentStore> = Arc::new(
            SqliteStore::open(&config.environment.database_path)
                .await
                .context("Failed to open document store")?,
        );

        let notifier = gateway_from_config(
            config.service.notify_webhook_url.as_deref(),
            Duration::from_secs(config.service.timeout_seconds),
        )?;

        let policy = OfferPolicy {
            offer_timeout: config.sync.offer_timeout(),
            auto_confirm: config.sync.auto_confirm_hires,
        };
        info!(
            "Offer policy: timeout {:?}, auto-confirm {}",
            policy.offer_timeout, policy.auto_confirm
        );

        let engine = Arc::new(SyncEngine::new(Arc::clone(&store), notifier, policy));
        let handle = engine.start();

        let extractor: Arc<dyn TextExtractor> =
            Arc::new(ChatExtractionClient::from_config(&config.service)?);

        Ok((Self::new(config, store, extractor, engine), handle))
    }
}
