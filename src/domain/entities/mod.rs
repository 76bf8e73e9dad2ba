pub mod cache_item;
pub mod data_record;
pub mod offline_file;
pub mod queue_item;
pub mod sync;

pub use cache_item::CacheItem;
pub use data_record::DataRecord;
pub use offline_file::{
    FileAssociation, FileReference, OfflineFileRecord, UploadFile, UploadMetadata,
};
pub use queue_item::{Headers, QueueItem, QueueItemPatch};
pub use sync::{SyncProgress, SyncReport, SyncStatus};
