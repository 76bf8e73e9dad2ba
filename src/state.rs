use crate::application::ports::{ConnectivityObserver, HttpTransport};
use crate::application::services::{OfflineFileStore, RequestClient, SyncQueueManager};
use crate::infrastructure::storage::SqlitePersistentStore;
use crate::shared::config::AppConfig;
use crate::shared::error::AppError;
use std::sync::Arc;
use tracing::{info, warn};

/// Default assembly of the offline layer.
///
/// Hosts that need different adapters can build the services directly; this
/// only wires the SQLite store to the given transport and connectivity.
#[derive(Clone)]
pub struct OfflineRuntime {
    pub store: Arc<SqlitePersistentStore>,
    pub files: OfflineFileStore,
    pub sync: SyncQueueManager,
    pub client: RequestClient,
}

impl OfflineRuntime {
    pub async fn bootstrap(
        config: AppConfig,
        transport: Arc<dyn HttpTransport>,
        connectivity: Arc<dyn ConnectivityObserver>,
    ) -> Result<Self, AppError> {
        config.validate().map_err(AppError::Configuration)?;

        let store = Arc::new(SqlitePersistentStore::new(&config.database));
        if !store.init().await {
            warn!("offline runtime starting without persistent storage");
        }

        let files = OfflineFileStore::new(store.clone());
        let sync = SyncQueueManager::new(
            store.clone(),
            files.clone(),
            Arc::clone(&transport),
            Arc::clone(&connectivity),
            config.sync.clone(),
        );
        sync.init().await?;

        let client = RequestClient::new(
            store.clone(),
            sync.clone(),
            files.clone(),
            transport,
            connectivity,
            config.request.clone(),
        );
        client.init();

        info!(pending = sync.get_pending_count().await, "offline runtime ready");
        Ok(Self {
            store,
            files,
            sync,
            client,
        })
    }

    pub async fn dispose(&self) {
        self.client.dispose();
        self.sync.dispose();
        self.store.dispose().await;
    }
}
