use super::offline_files::OfflineFileStore;
use super::sync_queue::SyncQueueManager;
use crate::application::ports::{
    ConnectivityObserver, HttpRequest, HttpTransport, MultipartBody, PersistentStore,
    RequestBody,
};
use crate::domain::entities::{FileAssociation, Headers, UploadFile, UploadMetadata};
use crate::domain::value_objects::{CacheKey, HttpMethod, QueueItemId};
use crate::shared::config::RequestConfig;
use crate::shared::error::AppError;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Per-call settings for [`RequestClient::request`].
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: HttpMethod,
    pub headers: Headers,
    pub body: Option<String>,
    /// Queue mutating calls made while offline or failing transiently.
    pub queue_on_offline: bool,
    /// `None` means cache GET responses only.
    pub use_cache: Option<bool>,
    pub cache_ttl: Option<Duration>,
    pub skip_queue: bool,
    pub skip_deduplication: bool,
    pub timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: HttpMethod::Get,
            headers: Headers::new(),
            body: None,
            queue_on_offline: true,
            use_cache: None,
            cache_ttl: None,
            skip_queue: false,
            skip_deduplication: false,
            timeout: None,
        }
    }
}

impl RequestOptions {
    pub fn new(method: HttpMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn json<T: Serialize>(mut self, value: &T) -> Result<Self, AppError> {
        self.body = Some(serde_json::to_string(value)?);
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn cache(mut self, enabled: bool) -> Self {
        self.use_cache = Some(enabled);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn skip_queue(mut self) -> Self {
        self.skip_queue = true;
        self
    }

    pub fn skip_deduplication(mut self) -> Self {
        self.skip_deduplication = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn caches(&self) -> bool {
        self.method == HttpMethod::Get && self.use_cache.unwrap_or(true)
    }

    fn may_queue(&self) -> bool {
        self.method.is_mutating() && self.queue_on_offline && !self.skip_queue
    }
}

/// Every call ends in exactly one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// Fresh network response.
    Immediate { data: Value, status: u16 },
    /// Served from the response cache; may be stale.
    Cached { data: Value },
    /// Accepted into the durable queue; the data does not exist yet.
    Queued { id: QueueItemId },
}

impl RequestOutcome {
    pub fn data(&self) -> Option<&Value> {
        match self {
            RequestOutcome::Immediate { data, .. } | RequestOutcome::Cached { data } => Some(data),
            RequestOutcome::Queued { .. } => None,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, RequestOutcome::Queued { .. })
    }

    pub fn is_from_cache(&self) -> bool {
        matches!(self, RequestOutcome::Cached { .. })
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub method: HttpMethod,
    pub file: UploadFile,
    pub metadata: UploadMetadata,
    pub association: FileAssociation,
    pub headers: Headers,
    pub skip_queue: bool,
    pub timeout: Option<Duration>,
}

impl UploadRequest {
    pub fn new(file: UploadFile) -> Self {
        Self {
            method: HttpMethod::Post,
            file,
            metadata: UploadMetadata::default(),
            association: FileAssociation::new(),
            headers: Headers::new(),
            skip_queue: false,
            timeout: None,
        }
    }

    pub fn metadata(mut self, metadata: UploadMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn associate(mut self, name: impl Into<String>, id: impl Into<String>) -> Self {
        self.association.insert(name.into(), id.into());
        self
    }
}

type SharedRequest = Shared<BoxFuture<'static, Result<RequestOutcome, AppError>>>;

/// The single call surface application code uses for HTTP.
#[derive(Clone)]
pub struct RequestClient {
    store: Arc<dyn PersistentStore>,
    sync: SyncQueueManager,
    files: OfflineFileStore,
    transport: Arc<dyn HttpTransport>,
    connectivity: Arc<dyn ConnectivityObserver>,
    config: RequestConfig,
    in_flight: Arc<Mutex<HashMap<CacheKey, SharedRequest>>>,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RequestClient {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        sync: SyncQueueManager,
        files: OfflineFileStore,
        transport: Arc<dyn HttpTransport>,
        connectivity: Arc<dyn ConnectivityObserver>,
        config: RequestConfig,
    ) -> Self {
        Self {
            store,
            sync,
            files,
            transport,
            connectivity,
            config,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            sweeper: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the periodic expired-cache sweep.
    pub fn init(&self) {
        if self.config.cache_sweep_interval_secs == 0 {
            return;
        }
        let Ok(mut sweeper) = self.sweeper.lock() else {
            return;
        };
        if sweeper.is_some() {
            return;
        }

        let store = Arc::clone(&self.store);
        let period = Duration::from_secs(self.config.cache_sweep_interval_secs);
        *sweeper = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match store.clear_expired_cache().await {
                    Ok(0) => {}
                    Ok(evicted) => debug!(evicted, "swept expired cache entries"),
                    Err(err) => warn!(error = %err, "cache sweep failed"),
                }
            }
        }));
    }

    pub fn dispose(&self) {
        if let Ok(mut sweeper) = self.sweeper.lock() {
            if let Some(handle) = sweeper.take() {
                handle.abort();
            }
        }
    }

    pub async fn request(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<RequestOutcome, AppError> {
        if options.skip_deduplication {
            return self.execute(url.to_string(), options).await;
        }

        let key = CacheKey::for_request(options.method, url, options.body.as_deref());
        let shared = {
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| AppError::Internal("in-flight request map poisoned".into()))?;

            match in_flight.get(&key) {
                Some(existing) => {
                    debug!(key = %key, "joining in-flight request");
                    existing.clone()
                }
                None => {
                    let shared = self.spawn_shared(key.clone(), url.to_string(), options);
                    in_flight.insert(key, shared.clone());
                    shared
                }
            }
        };

        shared.await
    }

    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<RequestOutcome, AppError> {
        self.request(url, RequestOptions { method: HttpMethod::Get, ..options }).await
    }

    pub async fn post(&self, url: &str, options: RequestOptions) -> Result<RequestOutcome, AppError> {
        self.request(url, RequestOptions { method: HttpMethod::Post, ..options }).await
    }

    pub async fn put(&self, url: &str, options: RequestOptions) -> Result<RequestOutcome, AppError> {
        self.request(url, RequestOptions { method: HttpMethod::Put, ..options }).await
    }

    pub async fn patch(&self, url: &str, options: RequestOptions) -> Result<RequestOutcome, AppError> {
        self.request(url, RequestOptions { method: HttpMethod::Patch, ..options }).await
    }

    pub async fn delete(&self, url: &str, options: RequestOptions) -> Result<RequestOutcome, AppError> {
        self.request(url, RequestOptions { method: HttpMethod::Delete, ..options }).await
    }

    /// Drop the cached GET response for `url`.
    pub async fn invalidate_cache(&self, url: &str) -> Result<(), AppError> {
        self.store
            .delete_cache(&CacheKey::for_request(HttpMethod::Get, url, None))
            .await
    }

    /// Send a multipart upload, staging the file for a later retry when the
    /// host is offline or the attempt fails transiently.
    pub async fn upload(
        &self,
        url: &str,
        upload: UploadRequest,
    ) -> Result<RequestOutcome, AppError> {
        if !self.connectivity.is_online() {
            return self.stage_upload(url, upload, AppError::Network("offline".into())).await;
        }

        let request = HttpRequest {
            url: url.to_string(),
            method: upload.method,
            headers: upload.headers.clone(),
            body: RequestBody::Multipart(MultipartBody {
                file_field: upload.metadata.field_name.clone(),
                file: upload.file.clone(),
                fields: upload.metadata.fields.clone(),
            }),
            timeout: upload.timeout.unwrap_or_else(|| self.config.timeout()),
        };

        match self.send(request).await {
            Ok((status, data)) => Ok(RequestOutcome::Immediate { data, status }),
            Err(err) if err.is_queueable() => self.stage_upload(url, upload, err).await,
            Err(err) => Err(err),
        }
    }

    fn spawn_shared(&self, key: CacheKey, url: String, options: RequestOptions) -> SharedRequest {
        let client = self.clone();
        // Spawned so the request completes and leaves the map even if
        // every caller stops waiting.
        let handle = tokio::spawn(async move {
            let result = client.execute(url, options).await;
            client.forget(&key);
            result
        });

        async move {
            handle
                .await
                .unwrap_or_else(|err| Err(AppError::Internal(err.to_string())))
        }
        .boxed()
        .shared()
    }

    fn forget(&self, key: &CacheKey) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(key);
        }
    }

    async fn execute(&self, url: String, options: RequestOptions) -> Result<RequestOutcome, AppError> {
        let method = options.method;
        let cache_key = CacheKey::for_request(method, &url, options.body.as_deref());

        if options.caches() {
            if let Some(data) = self.store.get_cache(&cache_key).await {
                debug!(url = %url, "served from cache");
                return Ok(RequestOutcome::Cached { data });
            }
        }

        if !self.connectivity.is_online() {
            if method.is_mutating() {
                return self
                    .queue_or_fail(&url, options, AppError::Network("offline".into()))
                    .await;
            }
            if !options.caches() {
                if let Some(data) = self.store.get_cache(&cache_key).await {
                    return Ok(RequestOutcome::Cached { data });
                }
            }
            return Err(AppError::NoOfflineFallback(format!("{method} {url}")));
        }

        let request = HttpRequest {
            url: url.clone(),
            method,
            headers: options.headers.clone(),
            body: RequestBody::from_optional(options.body.clone()),
            timeout: options.timeout.unwrap_or_else(|| self.config.timeout()),
        };

        match self.send(request).await {
            Ok((status, data)) => {
                if options.caches() {
                    let ttl = options.cache_ttl.unwrap_or_else(|| self.config.cache_ttl());
                    if let Err(err) = self.store.set_cache(&cache_key, data.clone(), ttl).await {
                        warn!(url = %url, error = %err, "failed to cache response");
                    }
                }
                Ok(RequestOutcome::Immediate { data, status })
            }
            Err(err) if method.is_mutating() && err.is_queueable() => {
                self.queue_or_fail(&url, options, err).await
            }
            Err(err) => Err(err),
        }
    }

    async fn send(&self, request: HttpRequest) -> Result<(u16, Value), AppError> {
        let timeout = request.timeout;
        let response = tokio::time::timeout(timeout, self.transport.send(request))
            .await
            .map_err(|_| AppError::Timeout(format!("{timeout:?}")))??;

        if !response.is_success() {
            return Err(AppError::Http {
                status: response.status,
                body: response.body,
            });
        }
        Ok((response.status, parse_body(&response.body)))
    }

    async fn queue_or_fail(
        &self,
        url: &str,
        options: RequestOptions,
        cause: AppError,
    ) -> Result<RequestOutcome, AppError> {
        if !options.may_queue() {
            return Err(cause);
        }
        let id = self
            .sync
            .enqueue(url, options.method, options.headers, options.body)
            .await?;
        info!(id = %id, url, cause = %cause, "request queued for later delivery");
        Ok(RequestOutcome::Queued { id })
    }

    async fn stage_upload(
        &self,
        url: &str,
        upload: UploadRequest,
        cause: AppError,
    ) -> Result<RequestOutcome, AppError> {
        if upload.skip_queue {
            return Err(cause);
        }
        let file_id = self
            .files
            .store_file_offline(upload.file, upload.association)
            .await?;
        let id = match self
            .sync
            .enqueue_file_upload(&file_id, url, upload.method, upload.metadata)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                if let Err(cleanup) = self.files.delete_offline_file(&file_id).await {
                    warn!(file_id = %file_id, error = %cleanup, "unqueued staged file left behind");
                }
                return Err(err);
            }
        };
        info!(id = %id, file_id = %file_id, url, cause = %cause, "upload staged for later delivery");
        Ok(RequestOutcome::Queued { id })
    }
}

/// JSON when possible, the raw text otherwise, `Null` for an empty body.
fn parse_body(body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}
