use super::offline_files::OfflineFileStore;
use crate::application::ports::{
    ConnectivityObserver, HttpRequest, HttpTransport, MultipartBody, PersistentStore,
    RequestBody, TransportError,
};
use crate::domain::delivery::{classify_response, DeliveryOutcome};
use crate::domain::entities::{
    FileReference, Headers, QueueItem, QueueItemPatch, SyncProgress, SyncReport, SyncStatus,
    UploadMetadata,
};
use crate::domain::value_objects::{HttpMethod, OfflineFileId, QueueItemId, QueueStatus};
use crate::shared::config::SyncConfig;
use crate::shared::error::AppError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub type SuccessCallback = Arc<dyn Fn(&QueueItem) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&QueueItem, &AppError) + Send + Sync>;
pub type ProgressCallback = Arc<dyn Fn(SyncProgress) + Send + Sync>;

#[derive(Clone)]
pub struct SyncOptions {
    pub max_retries: u32,
    /// Pause between delivered items.
    pub retry_delay: Duration,
    pub on_success: Option<SuccessCallback>,
    /// Called once an item is rejected or exhausts its retry budget.
    pub on_error: Option<ErrorCallback>,
    pub on_progress: Option<ProgressCallback>,
}

impl SyncOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            on_success: None,
            on_error: None,
            on_progress: None,
        }
    }

    pub fn on_success(mut self, callback: impl Fn(&QueueItem) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_error(
        mut self,
        callback: impl Fn(&QueueItem, &AppError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn on_progress(mut self, callback: impl Fn(SyncProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    fn notify_success(&self, item: &QueueItem) {
        if let Some(callback) = &self.on_success {
            callback(item);
        }
    }

    fn notify_error(&self, item: &QueueItem, err: &AppError) {
        if let Some(callback) = &self.on_error {
            callback(item, err);
        }
    }

    fn notify_progress(&self, progress: SyncProgress) {
        if let Some(callback) = &self.on_progress {
            callback(progress);
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Result of one network attempt for a queue item.
enum Attempt {
    Settled {
        outcome: DeliveryOutcome,
        status: u16,
        body: String,
        file_id: Option<OfflineFileId>,
    },
    Failed(AppError),
    /// The host could not be reached; the rest of the batch is abandoned.
    Unreachable(AppError),
}

/// Clears the `syncing` flag however the pass ends.
struct PassGuard(Arc<AtomicBool>);

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains the durable queue against the network.
///
/// Cheap to clone; clones share state, so a clone handed to a background
/// task observes the same `syncing` flag.
#[derive(Clone)]
pub struct SyncQueueManager {
    store: Arc<dyn PersistentStore>,
    files: OfflineFileStore,
    transport: Arc<dyn HttpTransport>,
    connectivity: Arc<dyn ConnectivityObserver>,
    config: SyncConfig,
    default_options: SyncOptions,
    online: Arc<AtomicBool>,
    syncing: Arc<AtomicBool>,
    status: Arc<watch::Sender<SyncStatus>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SyncQueueManager {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        files: OfflineFileStore,
        transport: Arc<dyn HttpTransport>,
        connectivity: Arc<dyn ConnectivityObserver>,
        config: SyncConfig,
    ) -> Self {
        let online = connectivity.is_online();
        let (status, _) = watch::channel(SyncStatus {
            online,
            syncing: false,
            pending: 0,
        });

        Self {
            store,
            files,
            transport,
            connectivity,
            default_options: SyncOptions::from_config(&config),
            config,
            online: Arc::new(AtomicBool::new(online)),
            syncing: Arc::new(AtomicBool::new(false)),
            status: Arc::new(status),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Options used by passes the manager starts on its own.
    pub fn with_default_options(mut self, options: SyncOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Recover interrupted items and start the connectivity and background
    /// triggers.
    pub async fn init(&self) -> Result<(), AppError> {
        let recovered = self.store.reset_processing().await?;
        if recovered > 0 {
            info!(recovered, "returned interrupted queue items to pending");
        }
        self.online
            .store(self.connectivity.is_online(), Ordering::Release);

        let connectivity_task = self.spawn_connectivity_listener();
        let background_task = self.spawn_background_trigger();

        if let Ok(mut tasks) = self.tasks.lock() {
            for handle in tasks.drain(..) {
                handle.abort();
            }
            tasks.push(connectivity_task);
            tasks.extend(background_task);
        }

        self.publish_status().await;
        Ok(())
    }

    pub fn dispose(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for handle in tasks.drain(..) {
                handle.abort();
            }
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    pub fn on_sync_change(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub async fn enqueue(
        &self,
        url: &str,
        method: HttpMethod,
        headers: Headers,
        body: Option<String>,
    ) -> Result<QueueItemId, AppError> {
        let id = self.store.add_to_queue(url, method, headers, body).await?;
        self.publish_status().await;

        if self.config.sync_on_enqueue {
            self.trigger_sync();
        }
        Ok(id)
    }

    /// Queue an upload of a file already staged in the offline file store.
    pub async fn enqueue_file_upload(
        &self,
        file_id: &OfflineFileId,
        url: &str,
        method: HttpMethod,
        metadata: UploadMetadata,
    ) -> Result<QueueItemId, AppError> {
        if self.files.get_offline_file(file_id).await.is_none() {
            return Err(AppError::NotFound(format!("offline file {file_id}")));
        }
        let body = FileReference::new(file_id.clone(), metadata).to_body()?;
        self.enqueue(url, method, Headers::new(), Some(body)).await
    }

    /// Start a pass in the background if online and idle.
    pub fn trigger_sync(&self) -> bool {
        if !self.is_online() || self.is_syncing() {
            return false;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_triggered("enqueue").await;
        });
        true
    }

    /// Drain every pending item once, in FIFO order.
    pub async fn sync(&self, options: SyncOptions) -> Result<SyncReport, AppError> {
        let online = self.connectivity.is_online();
        self.online.store(online, Ordering::Release);
        if !online {
            debug!("offline, sync skipped");
            return Ok(SyncReport::skipped());
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("sync already running");
            return Ok(SyncReport::skipped());
        }

        let guard = PassGuard(Arc::clone(&self.syncing));
        self.publish_status().await;
        let result = self.run_pass(&options).await;
        drop(guard);
        self.publish_status().await;

        match &result {
            Ok(report) => info!(
                delivered = report.delivered,
                already_applied = report.already_applied,
                rejected = report.rejected,
                retried = report.retried,
                exhausted = report.exhausted,
                aborted_offline = report.aborted_offline,
                "sync pass finished"
            ),
            Err(err) => error!(error = %err, "sync pass failed"),
        }
        result
    }

    /// Reset every failed item to pending with a fresh retry budget, then sync.
    pub async fn retry_failed(&self) -> Result<SyncReport, AppError> {
        let mut reset = 0usize;
        for item in self.store.get_queue_items(Some(QueueStatus::Failed)).await {
            let patch = QueueItemPatch::status(QueueStatus::Pending)
                .with_retries(0)
                .with_error(None);
            match self.store.update_queue_item(&item.id, patch).await {
                Ok(_) => reset += 1,
                Err(AppError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        info!(reset, "failed queue items reset");
        self.publish_status().await;

        self.sync(self.default_options.clone()).await
    }

    pub async fn get_pending_count(&self) -> usize {
        self.store.get_queue_count(Some(QueueStatus::Pending)).await
    }

    pub async fn clear(&self) -> Result<(), AppError> {
        self.store.clear_queue().await?;
        self.publish_status().await;
        Ok(())
    }

    pub async fn remove(&self, id: &QueueItemId) -> Result<(), AppError> {
        self.store.remove_from_queue(id).await?;
        self.publish_status().await;
        Ok(())
    }

    async fn run_triggered(&self, trigger: &'static str) {
        if let Err(err) = self.sync(self.default_options.clone()).await {
            warn!(trigger, error = %err, "triggered sync failed");
        }
    }

    async fn run_pass(&self, options: &SyncOptions) -> Result<SyncReport, AppError> {
        let items = self.store.get_queue_items(Some(QueueStatus::Pending)).await;
        let total = items.len();
        let mut report = SyncReport::default();

        for (index, item) in items.iter().enumerate() {
            let delivered = self.process_item(item, options, &mut report).await;
            options.notify_progress(SyncProgress {
                processed: index + 1,
                total,
                current: Some(item.id.clone()),
            });

            if report.aborted_offline {
                warn!(
                    remaining = total - index - 1,
                    "connection lost, abandoning sync batch"
                );
                break;
            }
            if delivered && index + 1 < total && !options.retry_delay.is_zero() {
                tokio::time::sleep(options.retry_delay).await;
            }
        }

        Ok(report)
    }

    /// Returns whether the item left the queue as a success.
    ///
    /// Store failures are logged and never abort the pass; an item that was
    /// already claimed is handed back to `pending`.
    async fn process_item(
        &self,
        snapshot: &QueueItem,
        options: &SyncOptions,
        report: &mut SyncReport,
    ) -> bool {
        if snapshot.is_exhausted(options.max_retries) {
            let failed = match self
                .store
                .update_queue_item(&snapshot.id, QueueItemPatch::status(QueueStatus::Failed))
                .await
            {
                Ok(item) => item,
                Err(AppError::NotFound(_)) | Err(AppError::InvalidTransition(_)) => return false,
                Err(err) => {
                    warn!(id = %snapshot.id, error = %err, "could not mark exhausted item failed");
                    return false;
                }
            };
            report.exhausted += 1;
            let reason = failed
                .last_error
                .clone()
                .unwrap_or_else(|| "retry budget exhausted".to_string());
            options.notify_error(&failed, &AppError::DeliveryFailed(reason));
            return false;
        }

        // The snapshot may be stale: removed or already picked up elsewhere.
        let item = match self
            .store
            .update_queue_item(&snapshot.id, QueueItemPatch::status(QueueStatus::Processing))
            .await
        {
            Ok(item) => item,
            Err(AppError::NotFound(_)) | Err(AppError::InvalidTransition(_)) => {
                debug!(id = %snapshot.id, "queue item changed before processing, skipped");
                return false;
            }
            Err(err) => {
                warn!(id = %snapshot.id, error = %err, "could not claim queue item");
                return false;
            }
        };
        debug!(id = %item.id, url = %item.url, method = %item.method, "processing queue item");

        match self.settle(&item, options, report).await {
            Ok(delivered) => delivered,
            Err(err) => {
                error!(id = %item.id, error = %err, "store write failed after claim");
                self.release(&item, &err).await;
                false
            }
        }
    }

    /// Send a claimed item and record the outcome.
    async fn settle(
        &self,
        item: &QueueItem,
        options: &SyncOptions,
        report: &mut SyncReport,
    ) -> Result<bool, AppError> {
        match self.attempt(item).await {
            Attempt::Settled {
                outcome: outcome @ (DeliveryOutcome::Delivered | DeliveryOutcome::AlreadyApplied),
                status,
                file_id,
                ..
            } => {
                self.store.remove_from_queue(&item.id).await?;
                // Nothing references the staged bytes once the item is gone.
                if let Some(file_id) = file_id {
                    if let Err(err) = self.files.delete_offline_file(&file_id).await {
                        warn!(file_id = %file_id, error = %err, "staged file left behind");
                    }
                }
                if outcome == DeliveryOutcome::Delivered {
                    report.delivered += 1;
                } else {
                    debug!(id = %item.id, status, "server already holds this mutation");
                    report.already_applied += 1;
                }
                options.notify_success(item);
                Ok(true)
            }
            Attempt::Settled {
                outcome: DeliveryOutcome::Rejected,
                status,
                body,
                ..
            } => {
                let err = AppError::Http { status, body };
                let patch = QueueItemPatch::status(QueueStatus::Failed)
                    .with_retries(options.max_retries.max(item.retries))
                    .with_error(Some(err.to_string()));
                let failed = self.store.update_queue_item(&item.id, patch).await?;
                error!(id = %item.id, status, "queued request rejected by server");
                report.rejected += 1;
                options.notify_error(&failed, &err);
                Ok(false)
            }
            Attempt::Settled {
                outcome: DeliveryOutcome::Transient,
                status,
                body,
                ..
            } => {
                self.record_failure(item, AppError::Http { status, body }, options, report)
                    .await?;
                Ok(false)
            }
            Attempt::Failed(err) => {
                self.record_failure(item, err, options, report).await?;
                Ok(false)
            }
            Attempt::Unreachable(err) => {
                self.online.store(false, Ordering::Release);
                report.aborted_offline = true;
                self.record_failure(item, err, options, report).await?;
                Ok(false)
            }
        }
    }

    /// Best-effort return of a claimed item to `pending`.
    async fn release(&self, item: &QueueItem, cause: &AppError) {
        let patch = QueueItemPatch::status(QueueStatus::Pending).with_error(Some(cause.to_string()));
        match self.store.update_queue_item(&item.id, patch).await {
            Ok(_) | Err(AppError::NotFound(_)) => {}
            Err(err) => warn!(
                id = %item.id,
                error = %err,
                "claimed item left in processing until the next restart"
            ),
        }
    }

    async fn record_failure(
        &self,
        item: &QueueItem,
        err: AppError,
        options: &SyncOptions,
        report: &mut SyncReport,
    ) -> Result<(), AppError> {
        let retries = item.retries.saturating_add(1);
        let exhausted = retries >= options.max_retries;
        let status = if exhausted {
            QueueStatus::Failed
        } else {
            QueueStatus::Pending
        };
        let updated = self
            .store
            .update_queue_item(
                &item.id,
                QueueItemPatch::status(status)
                    .with_retries(retries)
                    .with_error(Some(err.to_string())),
            )
            .await?;

        if exhausted {
            error!(id = %item.id, retries, error = %err, "queue item exhausted its retries");
            report.exhausted += 1;
            options.notify_error(&updated, &err);
        } else {
            warn!(id = %item.id, retries, error = %err, "queue item will be retried");
            report.retried += 1;
        }
        Ok(())
    }

    async fn attempt(&self, item: &QueueItem) -> Attempt {
        let (body, timeout, file_id) = match item.file_reference() {
            Some(reference) => {
                let Some(record) = self.files.get_offline_file(&reference.file_id).await else {
                    return Attempt::Failed(AppError::NotFound(format!(
                        "offline file {}",
                        reference.file_id
                    )));
                };
                let body = RequestBody::Multipart(MultipartBody {
                    file_field: reference.field_name,
                    file: OfflineFileStore::to_upload_file(&record),
                    fields: reference.fields,
                });
                (body, self.config.file_timeout(), Some(reference.file_id))
            }
            None => (
                RequestBody::from_optional(item.body.clone()),
                self.config.json_timeout(),
                None,
            ),
        };

        let request = HttpRequest {
            url: item.url.clone(),
            method: item.method,
            headers: item.headers.clone(),
            body,
            timeout,
        };

        match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(Ok(response)) => Attempt::Settled {
                outcome: classify_response(response.status, &response.body),
                status: response.status,
                body: response.body,
                file_id,
            },
            Ok(Err(TransportError::Connection(message))) => {
                Attempt::Unreachable(AppError::Network(message))
            }
            Ok(Err(err)) => Attempt::Failed(err.into()),
            Err(_) => Attempt::Failed(TransportError::Timeout(timeout).into()),
        }
    }

    async fn publish_status(&self) {
        let next = SyncStatus {
            online: self.is_online(),
            syncing: self.is_syncing(),
            pending: self.get_pending_count().await,
        };
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn spawn_connectivity_listener(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let mut changes = self.connectivity.subscribe();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let online = *changes.borrow_and_update();
                manager.online.store(online, Ordering::Release);
                manager.publish_status().await;
                if online {
                    info!("connectivity regained, draining queue");
                    manager.run_triggered("connectivity").await;
                } else {
                    info!("connectivity lost");
                }
            }
        })
    }

    fn spawn_background_trigger(&self) -> Option<JoinHandle<()>> {
        if self.config.background_interval_secs == 0 {
            return None;
        }
        let manager = self.clone();
        let period = Duration::from_secs(self.config.background_interval_secs);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if manager.get_pending_count().await > 0 {
                    manager.run_triggered("background").await;
                }
            }
        }))
    }
}
