#![allow(dead_code)]

use async_trait::async_trait;
use offline_sync::application::ports::{
    HttpRequest, HttpResponse, HttpTransport, PersistentStore, RequestBody, TransportError,
};
use offline_sync::domain::entities::{DataRecord, Headers, QueueItem, QueueItemPatch};
use offline_sync::domain::value_objects::{CacheKey, QueueStatus};
use offline_sync::shared::config::{RequestConfig, SyncConfig};
use offline_sync::{
    AppError, HttpMethod, ManualConnectivity, OfflineFileStore, QueueItemId, RequestClient,
    SqlitePersistentStore, SyncQueueManager,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub url: String,
    pub method: HttpMethod,
    pub body: RequestBody,
    pub at: Instant,
}

impl RecordedCall {
    pub fn text_body(&self) -> Option<&str> {
        match &self.body {
            RequestBody::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16, String),
    Fail(TransportError),
}

/// Transport answering from a script, recording every call. Once the script
/// is empty it answers with the fallback reply.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Reply>,
    latency: Duration,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Reply::Status(200, "{}".to_string())),
            latency,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_status(&self, status: u16, body: &str) {
        self.script
            .lock()
            .expect("script lock")
            .push_back(Reply::Status(status, body.to_string()));
    }

    pub fn push_failure(&self, err: TransportError) {
        self.script
            .lock()
            .expect("script lock")
            .push_back(Reply::Fail(err));
    }

    pub fn set_fallback(&self, reply: Reply) {
        *self.fallback.lock().expect("fallback lock") = reply;
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.lock().expect("calls lock").push(RecordedCall {
            url: request.url.clone(),
            method: request.method,
            body: request.body.clone(),
            at: Instant::now(),
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let reply = self
            .script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().expect("fallback lock").clone());

        match reply {
            Reply::Status(status, body) => Ok(HttpResponse {
                status,
                headers: Headers::new(),
                body,
            }),
            Reply::Fail(err) => Err(err),
        }
    }
}

/// SQLite store that can be told to fail its next few queue writes.
pub struct FlakyStore {
    inner: Arc<SqlitePersistentStore>,
    failing_removes: AtomicUsize,
    failing_enqueues: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<SqlitePersistentStore>) -> Self {
        Self {
            inner,
            failing_removes: AtomicUsize::new(0),
            failing_enqueues: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_removes(&self, count: usize) {
        self.failing_removes.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_enqueues(&self, count: usize) {
        self.failing_enqueues.store(count, Ordering::SeqCst);
    }

    fn trip(counter: &AtomicUsize) -> Result<(), AppError> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if tripped {
            Err(AppError::Database("database is locked".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PersistentStore for FlakyStore {
    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }

    async fn set_data(&self, key: &str, value: Value) -> Result<(), AppError> {
        self.inner.set_data(key, value).await
    }

    async fn get_record(&self, key: &str) -> Option<DataRecord> {
        self.inner.get_record(key).await
    }

    async fn delete_data(&self, key: &str) -> Result<(), AppError> {
        self.inner.delete_data(key).await
    }

    async fn keys(&self) -> Vec<String> {
        self.inner.keys().await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.inner.keys_with_prefix(prefix).await
    }

    async fn clear(&self) -> Result<(), AppError> {
        self.inner.clear().await
    }

    async fn add_to_queue(
        &self,
        url: &str,
        method: HttpMethod,
        headers: Headers,
        body: Option<String>,
    ) -> Result<QueueItemId, AppError> {
        Self::trip(&self.failing_enqueues)?;
        self.inner.add_to_queue(url, method, headers, body).await
    }

    async fn get_queue_items(&self, status: Option<QueueStatus>) -> Vec<QueueItem> {
        self.inner.get_queue_items(status).await
    }

    async fn get_queue_item(&self, id: &QueueItemId) -> Option<QueueItem> {
        self.inner.get_queue_item(id).await
    }

    async fn update_queue_item(
        &self,
        id: &QueueItemId,
        patch: QueueItemPatch,
    ) -> Result<QueueItem, AppError> {
        self.inner.update_queue_item(id, patch).await
    }

    async fn remove_from_queue(&self, id: &QueueItemId) -> Result<(), AppError> {
        Self::trip(&self.failing_removes)?;
        self.inner.remove_from_queue(id).await
    }

    async fn clear_queue(&self) -> Result<(), AppError> {
        self.inner.clear_queue().await
    }

    async fn get_queue_count(&self, status: Option<QueueStatus>) -> usize {
        self.inner.get_queue_count(status).await
    }

    async fn reset_processing(&self) -> Result<usize, AppError> {
        self.inner.reset_processing().await
    }

    async fn set_cache(&self, key: &CacheKey, data: Value, ttl: Duration) -> Result<(), AppError> {
        self.inner.set_cache(key, data, ttl).await
    }

    async fn get_cache(&self, key: &CacheKey) -> Option<Value> {
        self.inner.get_cache(key).await
    }

    async fn delete_cache(&self, key: &CacheKey) -> Result<(), AppError> {
        self.inner.delete_cache(key).await
    }

    async fn clear_expired_cache(&self) -> Result<usize, AppError> {
        self.inner.clear_expired_cache().await
    }

    async fn clear_cache(&self) -> Result<(), AppError> {
        self.inner.clear_cache().await
    }
}

pub struct Harness {
    /// The underlying store, for direct inspection.
    pub store: Arc<SqlitePersistentStore>,
    /// What the services see; healthy unless told otherwise.
    pub flaky: Arc<FlakyStore>,
    pub files: OfflineFileStore,
    pub transport: Arc<ScriptedTransport>,
    pub connectivity: Arc<ManualConnectivity>,
    pub sync: SyncQueueManager,
    pub client: RequestClient,
}

/// Sync settings with every automatic trigger off, so tests drive passes.
pub fn manual_sync_config() -> SyncConfig {
    SyncConfig {
        retry_delay_ms: 0,
        sync_on_enqueue: false,
        background_interval_secs: 0,
        ..SyncConfig::default()
    }
}

pub async fn harness(online: bool, transport: ScriptedTransport) -> Harness {
    harness_with(online, transport, manual_sync_config()).await
}

pub async fn harness_with(
    online: bool,
    transport: ScriptedTransport,
    sync_config: SyncConfig,
) -> Harness {
    let store = Arc::new(SqlitePersistentStore::in_memory());
    assert!(store.init().await, "in-memory store should open");

    let flaky = Arc::new(FlakyStore::new(store.clone()));
    let transport = Arc::new(transport);
    let connectivity = Arc::new(ManualConnectivity::new(online));
    let files = OfflineFileStore::new(flaky.clone());
    let sync = SyncQueueManager::new(
        flaky.clone(),
        files.clone(),
        transport.clone(),
        connectivity.clone(),
        sync_config,
    );
    let client = RequestClient::new(
        flaky.clone(),
        sync.clone(),
        files.clone(),
        transport.clone(),
        connectivity.clone(),
        RequestConfig {
            cache_sweep_interval_secs: 0,
            ..RequestConfig::default()
        },
    );

    Harness {
        store,
        flaky,
        files,
        transport,
        connectivity,
        sync,
        client,
    }
}
