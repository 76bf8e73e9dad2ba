use crate::domain::entities::{CacheItem, DataRecord, Headers, QueueItem};
use crate::domain::value_objects::{CacheKey, QueueItemId, QueueStatus};
use crate::shared::error::AppError;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct DataRecordRow {
    pub key: String,
    pub value: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct QueueItemRow {
    pub id: String,
    pub url: String,
    pub method: String,
    pub headers: String,
    pub body: Option<String>,
    pub timestamp: i64,
    pub retries: i64,
    pub status: String,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CacheItemRow {
    pub key: String,
    pub data: String,
    pub timestamp: i64,
    pub expires_at: i64,
}

impl TryFrom<DataRecordRow> for DataRecord {
    type Error = AppError;

    fn try_from(row: DataRecordRow) -> Result<Self, Self::Error> {
        Ok(DataRecord {
            value: serde_json::from_str(&row.value)?,
            key: row.key,
            timestamp: row.timestamp,
        })
    }
}

impl TryFrom<QueueItemRow> for QueueItem {
    type Error = AppError;

    fn try_from(row: QueueItemRow) -> Result<Self, Self::Error> {
        let headers: Headers = serde_json::from_str(&row.headers)?;
        Ok(QueueItem {
            id: QueueItemId::new(row.id).map_err(AppError::Database)?,
            method: row.method.parse().map_err(AppError::Database)?,
            status: QueueStatus::parse(&row.status).map_err(AppError::Database)?,
            retries: u32::try_from(row.retries.max(0)).unwrap_or(u32::MAX),
            url: row.url,
            headers,
            body: row.body,
            timestamp: row.timestamp,
            last_error: row.last_error,
        })
    }
}

impl TryFrom<CacheItemRow> for CacheItem {
    type Error = AppError;

    fn try_from(row: CacheItemRow) -> Result<Self, Self::Error> {
        Ok(CacheItem {
            key: CacheKey::new(row.key).map_err(AppError::Database)?,
            data: serde_json::from_str(&row.data)?,
            timestamp: row.timestamp,
            expires_at: row.expires_at,
        })
    }
}
