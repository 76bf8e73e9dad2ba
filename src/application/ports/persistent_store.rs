use crate::domain::entities::{DataRecord, Headers, QueueItem, QueueItemPatch};
use crate::domain::value_objects::{CacheKey, HttpMethod, QueueItemId, QueueStatus};
use crate::shared::error::AppError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Durable storage with three independent namespaces: generic data, the
/// mutation queue and the response cache.
///
/// Read operations never fail. When the backing engine is unavailable they
/// resolve to `None`/empty values.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn is_available(&self) -> bool;

    async fn set_data(&self, key: &str, value: Value) -> Result<(), AppError>;
    async fn get_record(&self, key: &str) -> Option<DataRecord>;
    async fn get_data(&self, key: &str) -> Option<Value> {
        self.get_record(key).await.map(|record| record.value)
    }
    async fn delete_data(&self, key: &str) -> Result<(), AppError>;
    async fn keys(&self) -> Vec<String>;
    async fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;
    async fn clear(&self) -> Result<(), AppError>;

    /// Insert a pending item, or return the id of the pending item that
    /// already carries the same url, method and body.
    async fn add_to_queue(
        &self,
        url: &str,
        method: HttpMethod,
        headers: Headers,
        body: Option<String>,
    ) -> Result<QueueItemId, AppError>;
    /// Items in FIFO order (ascending enqueue timestamp).
    async fn get_queue_items(&self, status: Option<QueueStatus>) -> Vec<QueueItem>;
    async fn get_queue_item(&self, id: &QueueItemId) -> Option<QueueItem>;
    async fn update_queue_item(
        &self,
        id: &QueueItemId,
        patch: QueueItemPatch,
    ) -> Result<QueueItem, AppError>;
    async fn remove_from_queue(&self, id: &QueueItemId) -> Result<(), AppError>;
    async fn clear_queue(&self) -> Result<(), AppError>;
    async fn get_queue_count(&self, status: Option<QueueStatus>) -> usize;
    /// Return items stranded in `processing` by an interrupted pass to `pending`.
    async fn reset_processing(&self) -> Result<usize, AppError>;

    async fn set_cache(&self, key: &CacheKey, data: Value, ttl: Duration)
        -> Result<(), AppError>;
    /// Expired entries are deleted on read and reported as a miss.
    async fn get_cache(&self, key: &CacheKey) -> Option<Value>;
    async fn delete_cache(&self, key: &CacheKey) -> Result<(), AppError>;
    async fn clear_expired_cache(&self) -> Result<usize, AppError>;
    async fn clear_cache(&self) -> Result<(), AppError>;
}
