pub mod offline_files;
pub mod request_client;
pub mod sync_queue;

pub use offline_files::OfflineFileStore;
pub use request_client::{RequestClient, RequestOptions, RequestOutcome, UploadRequest};
pub use sync_queue::{SyncOptions, SyncQueueManager};
