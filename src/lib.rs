//! Offline resilience layer: a persistent local store, a durable mutation
//! queue drained against the network, and a request client that arbitrates
//! between network, cache and queue.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod shared;
mod state;

pub use application::ports::{
    ConnectivityObserver, HttpRequest, HttpResponse, HttpTransport, PersistentStore,
    RequestBody, TransportError,
};
pub use application::services::{
    OfflineFileStore, RequestClient, RequestOptions, RequestOutcome, SyncOptions,
    SyncQueueManager, UploadRequest,
};
pub use domain::entities::{
    QueueItem, SyncReport, SyncStatus, UploadFile, UploadMetadata,
};
pub use domain::value_objects::{HttpMethod, QueueItemId, QueueStatus};
pub use infrastructure::connectivity::{ManualConnectivity, ProbeConnectivity};
pub use infrastructure::http::ReqwestTransport;
pub use infrastructure::storage::SqlitePersistentStore;
pub use shared::{AppConfig, AppError, Result};
pub use state::OfflineRuntime;
