//! Store and service wiring.
//!
//! `USE_PERSISTENT_STORES=true` selects Postgres (schema applied at startup); otherwise
//! everything lives in memory.

use std::sync::Arc;

use chrono::Utc;

use presenca_infra::seed::seed_schedule;
use presenca_infra::{
    AppConfig, ConfirmationService, InMemoryStore, LogNotifier, PostgresNotifier, PostgresStore,
    RetryPolicy, ScheduleQueries, SessionCatalog, StorageConfig,
};

#[derive(Clone)]
pub struct AppServices {
    queries: Arc<dyn ScheduleQueries>,
    catalog: Arc<dyn SessionCatalog>,
    confirmations: ConfirmationService,
}

impl AppServices {
    pub fn new(
        queries: Arc<dyn ScheduleQueries>,
        catalog: Arc<dyn SessionCatalog>,
        confirmations: ConfirmationService,
    ) -> Self {
        Self {
            queries,
            catalog,
            confirmations,
        }
    }

    /// Empty in-memory stores with log-only notifications.
    pub fn in_memory(retry: RetryPolicy) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let confirmations =
            ConfirmationService::new(store.clone(), store.clone(), Arc::new(LogNotifier), retry);
        Self::new(store.clone(), store, confirmations)
    }

    pub fn queries(&self) -> &dyn ScheduleQueries {
        self.queries.as_ref()
    }

    pub fn catalog(&self) -> &dyn SessionCatalog {
        self.catalog.as_ref()
    }

    pub fn confirmations(&self) -> &ConfirmationService {
        &self.confirmations
    }
}

pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    match &config.storage {
        StorageConfig::InMemory => {
            let store = Arc::new(InMemoryStore::new());
            if config.seed_schedule {
                seed_schedule(store.as_ref(), store.as_ref(), Utc::now()).await?;
            }
            let confirmations = ConfirmationService::new(
                store.clone(),
                store.clone(),
                Arc::new(LogNotifier),
                config.retry,
            );
            tracing::info!("using in-memory stores");
            Ok(AppServices::new(store.clone(), store, confirmations))
        }
        StorageConfig::Postgres(db) => {
            let store = Arc::new(PostgresStore::connect(&db.pool_options()).await?);
            store.migrate().await?;
            if config.seed_schedule {
                seed_schedule(store.as_ref(), store.as_ref(), Utc::now()).await?;
            }
            let notifier = Arc::new(PostgresNotifier::new(store.pool().clone()));
            let confirmations =
                ConfirmationService::new(store.clone(), store.clone(), notifier, config.retry);
            tracing::info!(
                max_connections = db.max_connections,
                "using postgres stores"
            );
            Ok(AppServices::new(store.clone(), store, confirmations))
        }
    }
}
