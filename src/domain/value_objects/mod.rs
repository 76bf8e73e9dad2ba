pub mod cache_key;
pub mod http_method;
pub mod offline_file_id;
pub mod queue_item_id;
pub mod queue_status;

pub use cache_key::CacheKey;
pub use http_method::HttpMethod;
pub use offline_file_id::OfflineFileId;
pub use queue_item_id::QueueItemId;
pub use queue_status::QueueStatus;
