use super::rows::{CacheItemRow, DataRecordRow, QueueItemRow};
use crate::application::ports::PersistentStore;
use crate::domain::entities::{CacheItem, DataRecord, Headers, QueueItem, QueueItemPatch};
use crate::domain::value_objects::{CacheKey, HttpMethod, QueueItemId, QueueStatus};
use crate::infrastructure::database::ConnectionPool;
use crate::shared::config::DatabaseConfig;
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const QUEUE_COLUMNS: &str =
    "id, url, method, headers, body, timestamp, retries, status, last_error";

/// Compare-and-set attempts before `update_queue_item` gives up.
const MAX_UPDATE_ATTEMPTS: usize = 3;

/// SQLite-backed [`PersistentStore`].
///
/// `init` opens and migrates the database. If that fails the store stays in
/// degraded mode: reads resolve empty and writes are ignored, except
/// `add_to_queue`, which reports `StorageUnavailable` so a mutation is never
/// dropped without the caller knowing.
pub struct SqlitePersistentStore {
    database_url: String,
    max_connections: u32,
    pool: RwLock<Option<ConnectionPool>>,
}

impl SqlitePersistentStore {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            database_url: config.url.clone(),
            max_connections: config.max_connections,
            pool: RwLock::new(None),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            pool: RwLock::new(None),
        }
    }

    /// Open and migrate the database. Returns whether the store is usable.
    pub async fn init(&self) -> bool {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            return true;
        }

        match open(&self.database_url, self.max_connections).await {
            Ok(pool) => {
                info!(url = %self.database_url, "persistent store ready");
                *guard = Some(pool);
                true
            }
            Err(err) => {
                warn!(
                    url = %self.database_url,
                    error = %err,
                    "persistent store unavailable, continuing in degraded mode"
                );
                false
            }
        }
    }

    pub async fn dispose(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
    }

    /// Raw pool for inspection; `None` while degraded.
    pub async fn sqlite_pool(&self) -> Option<SqlitePool> {
        self.pool
            .read()
            .await
            .as_ref()
            .map(|pool| pool.get_pool().clone())
    }

    async fn fetch_queue_item(
        pool: &SqlitePool,
        id: &QueueItemId,
    ) -> Result<Option<QueueItem>, AppError> {
        let sql = format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE id = ?1");
        let row = sqlx::query_as::<_, QueueItemRow>(&sql)
            .bind(id.as_str())
            .fetch_optional(pool)
            .await?;
        row.map(QueueItem::try_from).transpose()
    }

    async fn find_pending_duplicate(
        pool: &SqlitePool,
        url: &str,
        method: HttpMethod,
        body: Option<&str>,
    ) -> Result<Option<QueueItemId>, AppError> {
        let existing: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT id FROM sync_queue
            WHERE url = ?1 AND method = ?2 AND body IS ?3 AND status = 'pending'
            ORDER BY timestamp ASC, seq ASC
            LIMIT 1
            "#,
        )
        .bind(url)
        .bind(method.as_str())
        .bind(body)
        .fetch_optional(pool)
        .await?;

        existing
            .map(|(id,)| QueueItemId::new(id).map_err(AppError::Database))
            .transpose()
    }
}

async fn open(database_url: &str, max_connections: u32) -> Result<ConnectionPool, AppError> {
    if let Some(parent) = database_file(database_url).and_then(|path| path.parent()) {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| AppError::StorageUnavailable(err.to_string()))?;
        }
    }

    let pool = ConnectionPool::new(database_url, max_connections).await?;
    pool.migrate().await?;
    Ok(pool)
}

fn database_file(database_url: &str) -> Option<&Path> {
    if database_url.contains(":memory:") || database_url.contains("mode=memory") {
        return None;
    }
    let rest = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    (!path.is_empty()).then(|| Path::new(path))
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn ignored_write(operation: &str) -> Result<(), AppError> {
    debug!(operation, "persistent store unavailable, write ignored");
    Ok(())
}

fn read_failed(operation: &str, err: impl std::fmt::Display) {
    warn!(operation, error = %err, "persistent store read failed");
}

fn decode_rows<R, T>(operation: &str, rows: Vec<R>) -> Vec<T>
where
    T: TryFrom<R, Error = AppError>,
{
    rows.into_iter()
        .filter_map(|row| match T::try_from(row) {
            Ok(value) => Some(value),
            Err(err) => {
                read_failed(operation, err);
                None
            }
        })
        .collect()
}

#[async_trait]
impl PersistentStore for SqlitePersistentStore {
    async fn is_available(&self) -> bool {
        self.pool.read().await.is_some()
    }

    async fn set_data(&self, key: &str, value: Value) -> Result<(), AppError> {
        let Some(pool) = self.sqlite_pool().await else {
            return ignored_write("set_data");
        };
        let encoded = serde_json::to_string(&value)?;

        sqlx::query(
            r#"
            INSERT INTO data_records (key, value, timestamp)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                timestamp = excluded.timestamp
            "#,
        )
        .bind(key)
        .bind(encoded)
        .bind(now_millis())
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn get_record(&self, key: &str) -> Option<DataRecord> {
        let pool = self.sqlite_pool().await?;
        let row = sqlx::query_as::<_, DataRecordRow>(
            "SELECT key, value, timestamp FROM data_records WHERE key = ?1",
        )
        .bind(key)
        .fetch_optional(&pool)
        .await;

        match row {
            Ok(row) => decode_rows("get_record", row.into_iter().collect()).pop(),
            Err(err) => {
                read_failed("get_record", err);
                None
            }
        }
    }

    async fn delete_data(&self, key: &str) -> Result<(), AppError> {
        let Some(pool) = self.sqlite_pool().await else {
            return ignored_write("delete_data");
        };
        sqlx::query("DELETE FROM data_records WHERE key = ?1")
            .bind(key)
            .execute(&pool)
            .await?;
        Ok(())
    }

    async fn keys(&self) -> Vec<String> {
        let Some(pool) = self.sqlite_pool().await else {
            return Vec::new();
        };
        match sqlx::query_as::<_, (String,)>("SELECT key FROM data_records ORDER BY key")
            .fetch_all(&pool)
            .await
        {
            Ok(rows) => rows.into_iter().map(|(key,)| key).collect(),
            Err(err) => {
                read_failed("keys", err);
                Vec::new()
            }
        }
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let Some(pool) = self.sqlite_pool().await else {
            return Vec::new();
        };
        match sqlx::query_as::<_, (String,)>(
            "SELECT key FROM data_records WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(&pool)
        .await
        {
            Ok(rows) => rows.into_iter().map(|(key,)| key).collect(),
            Err(err) => {
                read_failed("keys_with_prefix", err);
                Vec::new()
            }
        }
    }

    async fn clear(&self) -> Result<(), AppError> {
        let Some(pool) = self.sqlite_pool().await else {
            return ignored_write("clear");
        };
        sqlx::query("DELETE FROM data_records")
            .execute(&pool)
            .await?;
        Ok(())
    }

    async fn add_to_queue(
        &self,
        url: &str,
        method: HttpMethod,
        headers: Headers,
        body: Option<String>,
    ) -> Result<QueueItemId, AppError> {
        let pool = self.sqlite_pool().await.ok_or_else(|| {
            AppError::StorageUnavailable("queue is not persisted while storage is down".into())
        })?;
        let encoded_headers = serde_json::to_string(&headers)?;

        // The duplicate check and the insert are one statement, so two
        // callers racing on the same request cannot both insert.
        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let id = QueueItemId::generate();
            let inserted = sqlx::query(
                r#"
                INSERT INTO sync_queue (id, url, method, headers, body, timestamp, retries, status)
                SELECT ?1, ?2, ?3, ?4, ?5, ?6, 0, 'pending'
                WHERE NOT EXISTS (
                    SELECT 1 FROM sync_queue
                    WHERE url = ?2 AND method = ?3 AND body IS ?5 AND status = 'pending'
                )
                "#,
            )
            .bind(id.as_str())
            .bind(url)
            .bind(method.as_str())
            .bind(&encoded_headers)
            .bind(body.as_deref())
            .bind(now_millis())
            .execute(&pool)
            .await?;

            if inserted.rows_affected() == 1 {
                debug!(id = %id, url, method = %method, "queued request");
                return Ok(id);
            }

            if let Some(existing) =
                Self::find_pending_duplicate(&pool, url, method, body.as_deref()).await?
            {
                debug!(id = %existing, url, method = %method, "reused pending duplicate");
                return Ok(existing);
            }
        }

        Err(AppError::Database(format!(
            "could not enqueue {method} {url}: pending duplicate kept changing"
        )))
    }

    async fn get_queue_items(&self, status: Option<QueueStatus>) -> Vec<QueueItem> {
        let Some(pool) = self.sqlite_pool().await else {
            return Vec::new();
        };
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE status = ?1 \
                     ORDER BY timestamp ASC, seq ASC"
                );
                sqlx::query_as::<_, QueueItemRow>(&sql)
                    .bind(status.as_str())
                    .fetch_all(&pool)
                    .await
            }
            None => {
                let sql =
                    format!("SELECT {QUEUE_COLUMNS} FROM sync_queue ORDER BY timestamp ASC, seq ASC");
                sqlx::query_as::<_, QueueItemRow>(&sql)
                    .fetch_all(&pool)
                    .await
            }
        };

        match rows {
            Ok(rows) => decode_rows("get_queue_items", rows),
            Err(err) => {
                read_failed("get_queue_items", err);
                Vec::new()
            }
        }
    }

    async fn get_queue_item(&self, id: &QueueItemId) -> Option<QueueItem> {
        let pool = self.sqlite_pool().await?;
        match Self::fetch_queue_item(&pool, id).await {
            Ok(item) => item,
            Err(err) => {
                read_failed("get_queue_item", err);
                None
            }
        }
    }

    async fn update_queue_item(
        &self,
        id: &QueueItemId,
        patch: QueueItemPatch,
    ) -> Result<QueueItem, AppError> {
        let pool = self
            .sqlite_pool()
            .await
            .ok_or_else(|| AppError::StorageUnavailable(format!("cannot update {id}")))?;

        for _ in 0..MAX_UPDATE_ATTEMPTS {
            let current = Self::fetch_queue_item(&pool, id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("queue item {id}")))?;
            let next = current
                .apply_patch(&patch)
                .map_err(AppError::InvalidTransition)?;

            let updated = sqlx::query(
                r#"
                UPDATE sync_queue
                SET status = ?1, retries = ?2, last_error = ?3
                WHERE id = ?4 AND status = ?5 AND retries = ?6
                "#,
            )
            .bind(next.status.as_str())
            .bind(i64::from(next.retries))
            .bind(next.last_error.as_deref())
            .bind(id.as_str())
            .bind(current.status.as_str())
            .bind(i64::from(current.retries))
            .execute(&pool)
            .await?;

            if updated.rows_affected() == 1 {
                return Ok(next);
            }
            debug!(id = %id, "queue item changed during update, re-reading");
        }

        Err(AppError::Database(format!(
            "queue item {id} kept changing during update"
        )))
    }

    async fn remove_from_queue(&self, id: &QueueItemId) -> Result<(), AppError> {
        let Some(pool) = self.sqlite_pool().await else {
            return ignored_write("remove_from_queue");
        };
        sqlx::query("DELETE FROM sync_queue WHERE id = ?1")
            .bind(id.as_str())
            .execute(&pool)
            .await?;
        Ok(())
    }

    async fn clear_queue(&self) -> Result<(), AppError> {
        let Some(pool) = self.sqlite_pool().await else {
            return ignored_write("clear_queue");
        };
        sqlx::query("DELETE FROM sync_queue").execute(&pool).await?;
        Ok(())
    }

    async fn get_queue_count(&self, status: Option<QueueStatus>) -> usize {
        let Some(pool) = self.sqlite_pool().await else {
            return 0;
        };
        let count = match status {
            Some(status) => {
                sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM sync_queue WHERE status = ?1")
                    .bind(status.as_str())
                    .fetch_one(&pool)
                    .await
            }
            None => {
                sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM sync_queue")
                    .fetch_one(&pool)
                    .await
            }
        };

        match count {
            Ok((count,)) => usize::try_from(count).unwrap_or(0),
            Err(err) => {
                read_failed("get_queue_count", err);
                0
            }
        }
    }

    async fn reset_processing(&self) -> Result<usize, AppError> {
        let Some(pool) = self.sqlite_pool().await else {
            return Ok(0);
        };
        let result =
            sqlx::query("UPDATE sync_queue SET status = 'pending' WHERE status = 'processing'")
                .execute(&pool)
                .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn set_cache(
        &self,
        key: &CacheKey,
        data: Value,
        ttl: Duration,
    ) -> Result<(), AppError> {
        let Some(pool) = self.sqlite_pool().await else {
            return ignored_write("set_cache");
        };
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let item = CacheItem::new(key.clone(), data, now_millis(), ttl_ms);
        let encoded = serde_json::to_string(&item.data)?;

        sqlx::query(
            r#"
            INSERT INTO response_cache (key, data, timestamp, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(key) DO UPDATE SET
                data = excluded.data,
                timestamp = excluded.timestamp,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(item.key.as_str())
        .bind(encoded)
        .bind(item.timestamp)
        .bind(item.expires_at)
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn get_cache(&self, key: &CacheKey) -> Option<Value> {
        let pool = self.sqlite_pool().await?;
        let row = match sqlx::query_as::<_, CacheItemRow>(
            "SELECT key, data, timestamp, expires_at FROM response_cache WHERE key = ?1",
        )
        .bind(key.as_str())
        .fetch_optional(&pool)
        .await
        {
            Ok(row) => row?,
            Err(err) => {
                read_failed("get_cache", err);
                return None;
            }
        };

        let expires_at = row.expires_at;
        let item = match CacheItem::try_from(row) {
            Ok(item) => Some(item),
            Err(err) => {
                read_failed("get_cache", err);
                None
            }
        };

        match item {
            Some(item) if !item.is_expired(now_millis()) => Some(item.data),
            _ => {
                // Only the version that was read is evicted; a concurrent
                // refresh with a new deadline survives.
                if let Err(err) =
                    sqlx::query("DELETE FROM response_cache WHERE key = ?1 AND expires_at = ?2")
                        .bind(key.as_str())
                        .bind(expires_at)
                        .execute(&pool)
                        .await
                {
                    warn!(key = %key, error = %err, "failed to evict cache entry");
                } else {
                    debug!(key = %key, "evicted stale cache entry");
                }
                None
            }
        }
    }

    async fn delete_cache(&self, key: &CacheKey) -> Result<(), AppError> {
        let Some(pool) = self.sqlite_pool().await else {
            return ignored_write("delete_cache");
        };
        sqlx::query("DELETE FROM response_cache WHERE key = ?1")
            .bind(key.as_str())
            .execute(&pool)
            .await?;
        Ok(())
    }

    async fn clear_expired_cache(&self) -> Result<usize, AppError> {
        let Some(pool) = self.sqlite_pool().await else {
            return Ok(0);
        };
        let result = sqlx::query("DELETE FROM response_cache WHERE expires_at < ?1")
            .bind(now_millis())
            .execute(&pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn clear_cache(&self) -> Result<(), AppError> {
        let Some(pool) = self.sqlite_pool().await else {
            return ignored_write("clear_cache");
        };
        sqlx::query("DELETE FROM response_cache")
            .execute(&pool)
            .await?;
        Ok(())
    }
}
