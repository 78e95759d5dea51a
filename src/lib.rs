//! Offline-first log cache, health snapshot aggregation and sync/insight
//! pipeline for a diabetes companion app.
//!
//! The host application owns the UI, the session and the health platform
//! bindings; it plugs them in through [`services::TokenProvider`] and
//! [`services::HealthDataSource`].

pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod telemetry;
pub mod utils;

use std::sync::Arc;

use crate::config::Settings;
use crate::db::{LogRepository, SqliteLogStore};
use crate::models::sync::SyncError;
use crate::services::{
    HealthDataSource, HealthSnapshotAggregator, PayloadBuilder, SyncClient, SyncCoordinator,
    TokenProvider,
};

/// The wired-up pipeline for one signed-in user.
pub struct SyncPipeline {
    pub log_store: Arc<dyn LogRepository>,
    pub aggregator: HealthSnapshotAggregator,
    pub coordinator: Arc<SyncCoordinator>,
}

impl SyncPipeline {
    pub async fn build(
        settings: &Settings,
        health_source: Arc<dyn HealthDataSource>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, SyncError> {
        let log_store: Arc<dyn LogRepository> =
            Arc::new(SqliteLogStore::connect(&settings.log_store).await?);
        Self::with_store(settings, log_store, health_source, tokens)
    }

    pub fn with_store(
        settings: &Settings,
        log_store: Arc<dyn LogRepository>,
        health_source: Arc<dyn HealthDataSource>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, SyncError> {
        let aggregator = HealthSnapshotAggregator::new(health_source, settings.health.clone());
        let builder = PayloadBuilder::new(log_store.clone(), aggregator.clone());
        let client = SyncClient::new(&settings.sync, tokens)?;
        let coordinator = Arc::new(SyncCoordinator::new(builder, client));

        tracing::info!("Sync pipeline ready against {}", settings.sync.base_url);

        Ok(Self {
            log_store,
            aggregator,
            coordinator,
        })
    }
}
