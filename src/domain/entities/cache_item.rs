use crate::domain::value_objects::CacheKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheItem {
    pub key: CacheKey,
    pub data: Value,
    pub timestamp: i64,
    pub expires_at: i64,
}

impl CacheItem {
    pub fn new(key: CacheKey, data: Value, now_ms: i64, ttl_ms: i64) -> Self {
        Self {
            key,
            data,
            timestamp: now_ms,
            expires_at: now_ms.saturating_add(ttl_ms.max(0)),
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }
}
