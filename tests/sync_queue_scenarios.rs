mod support;

use offline_sync::application::ports::{PersistentStore, RequestBody, TransportError};
use offline_sync::domain::entities::{FileAssociation, Headers, QueueItemPatch, UploadMetadata};
use offline_sync::shared::config::SyncConfig;
use offline_sync::{AppError, HttpMethod, QueueStatus, SyncOptions, UploadFile};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use support::{harness, harness_with, manual_sync_config, Reply, ScriptedTransport};

fn fast() -> SyncOptions {
    SyncOptions {
        retry_delay: Duration::ZERO,
        ..SyncOptions::default()
    }
}

#[tokio::test]
async fn identical_pending_enqueues_collapse() {
    let h = harness(false, ScriptedTransport::new()).await;

    let body = Some("{\"date\":\"2024-05-01\"}".to_string());
    let first = h
        .sync
        .enqueue("/api/shifts", HttpMethod::Post, Headers::new(), body.clone())
        .await
        .expect("first enqueue");
    let second = h
        .sync
        .enqueue("/api/shifts", HttpMethod::Post, Headers::new(), body)
        .await
        .expect("second enqueue");

    assert_eq!(first, second);
    assert_eq!(h.sync.get_pending_count().await, 1);
}

#[tokio::test]
async fn offline_writes_drain_in_order_with_backpressure() {
    let h = harness(false, ScriptedTransport::new()).await;
    for body in ["A", "B", "C"] {
        h.sync
            .enqueue(
                "/api/expenses",
                HttpMethod::Post,
                Headers::new(),
                Some(body.to_string()),
            )
            .await
            .expect("enqueue while offline");
    }
    assert_eq!(h.transport.call_count(), 0);

    h.connectivity.set_online(true);
    let delay = Duration::from_millis(50);
    let report = h
        .sync
        .sync(SyncOptions {
            retry_delay: delay,
            ..SyncOptions::default()
        })
        .await
        .expect("sync");

    assert_eq!(report.delivered, 3);
    let calls = h.transport.calls();
    let bodies: Vec<_> = calls.iter().filter_map(|call| call.text_body()).collect();
    assert_eq!(bodies, vec!["A", "B", "C"]);
    for pair in calls.windows(2) {
        assert!(pair[1].at.duration_since(pair[0].at) >= delay);
    }
}

#[tokio::test]
async fn exhausted_items_wait_for_retry_failed() {
    let transport = ScriptedTransport::new();
    transport.set_fallback(Reply::Status(503, "unavailable".to_string()));
    let h = harness(true, transport).await;
    let id = h
        .sync
        .enqueue("/api/certificates", HttpMethod::Post, Headers::new(), Some("{}".into()))
        .await
        .expect("enqueue");

    let errors = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let seen = errors.clone();
        h.sync
            .sync(fast().on_error(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .expect("sync");
    }

    let item = h.store.get_queue_item(&id).await.expect("item kept");
    assert_eq!(item.status, QueueStatus::Failed);
    assert_eq!(item.retries, 3);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(h.transport.call_count(), 3);

    h.sync.sync(fast()).await.expect("sync");
    assert_eq!(h.transport.call_count(), 3, "failed items are not attempted");

    h.transport.set_fallback(Reply::Status(201, "{\"id\":1}".to_string()));
    let report = h.sync.retry_failed().await.expect("retry failed");

    assert_eq!(report.delivered, 1);
    assert_eq!(h.transport.call_count(), 4);
    assert!(h.store.get_queue_item(&id).await.is_none());
}

#[tokio::test]
async fn retry_failed_resets_budget() {
    let h = harness(false, ScriptedTransport::new()).await;
    let id = h
        .sync
        .enqueue("/api/x", HttpMethod::Put, Headers::new(), Some("{}".into()))
        .await
        .expect("enqueue");
    h.store
        .update_queue_item(&id, QueueItemPatch::status(QueueStatus::Processing))
        .await
        .expect("processing");
    h.store
        .update_queue_item(
            &id,
            QueueItemPatch::status(QueueStatus::Failed).with_retries(3),
        )
        .await
        .expect("failed");

    let report = h.sync.retry_failed().await.expect("retry failed");

    assert!(report.skipped, "offline, so the follow-up pass does not run");
    let item = h.store.get_queue_item(&id).await.expect("item");
    assert_eq!(item.status, QueueStatus::Pending);
    assert_eq!(item.retries, 0);
    assert_eq!(item.last_error, None);
}

#[tokio::test]
async fn validation_errors_fail_on_first_attempt() {
    let transport = ScriptedTransport::new();
    transport.push_status(400, r#"{"error":"Invalid","details":[{"field":"amount"}]}"#);
    let h = harness(true, transport).await;
    let id = h
        .sync
        .enqueue("/api/expenses", HttpMethod::Post, Headers::new(), Some("{}".into()))
        .await
        .expect("enqueue");

    let report = h
        .sync
        .sync(SyncOptions {
            max_retries: 5,
            ..fast()
        })
        .await
        .expect("sync");

    assert_eq!(report.rejected, 1);
    let item = h.store.get_queue_item(&id).await.expect("item");
    assert_eq!(item.status, QueueStatus::Failed);
    assert_eq!(item.retries, 5);

    h.sync.sync(fast()).await.expect("sync");
    assert_eq!(h.transport.call_count(), 1);
}

#[tokio::test]
async fn existing_resource_counts_as_success() {
    let transport = ScriptedTransport::new();
    transport.push_status(400, r#"{"error":"Expense already exists"}"#);
    let h = harness(true, transport).await;
    h.sync
        .enqueue("/api/expenses", HttpMethod::Post, Headers::new(), Some("{}".into()))
        .await
        .expect("enqueue");

    let successes = Arc::new(AtomicUsize::new(0));
    let errors = Arc::new(AtomicUsize::new(0));
    let (ok, err) = (successes.clone(), errors.clone());
    let report = h
        .sync
        .sync(
            fast()
                .on_success(move |_| {
                    ok.fetch_add(1, Ordering::SeqCst);
                })
                .on_error(move |_, _| {
                    err.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .await
        .expect("sync");

    assert_eq!(report.already_applied, 1);
    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert_eq!(errors.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.get_queue_count(None).await, 0);
}

#[tokio::test]
async fn staged_upload_survives_failure_and_is_cleaned_after_delivery() {
    let transport = ScriptedTransport::new();
    transport.push_failure(TransportError::Connection("connection reset".into()));
    transport.push_status(201, r#"{"id":"rcpt-1"}"#);
    let h = harness(true, transport).await;

    let file_id = h
        .files
        .store_file_offline(
            UploadFile::new("receipt.jpg", "image/jpeg", vec![42u8; 10 * 1024]),
            FileAssociation::from([("expense_id".to_string(), "exp-9".to_string())]),
        )
        .await
        .expect("stage file");
    let id = h
        .sync
        .enqueue_file_upload(
            &file_id,
            "/api/expenses/exp-9/receipt",
            HttpMethod::Post,
            UploadMetadata::default().with_field("expense_id", "exp-9"),
        )
        .await
        .expect("enqueue upload");

    let first = h.sync.sync(fast()).await.expect("first pass");
    assert!(first.aborted_offline);
    let item = h.store.get_queue_item(&id).await.expect("still queued");
    assert_eq!(item.status, QueueStatus::Pending);
    assert_eq!(item.retries, 1);
    assert!(h.files.get_offline_file(&file_id).await.is_some());

    let second = h.sync.sync(fast()).await.expect("second pass");
    assert_eq!(second.delivered, 1);
    assert!(h.store.get_queue_item(&id).await.is_none());
    assert!(h.files.get_offline_file(&file_id).await.is_none());

    let calls = h.transport.calls();
    match &calls[1].body {
        RequestBody::Multipart(body) => {
            assert_eq!(body.file.bytes.len(), 10 * 1024);
            assert_eq!(body.file_field, "file");
            assert_eq!(body.fields.get("expense_id").map(String::as_str), Some("exp-9"));
        }
        other => panic!("expected multipart upload, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_staged_file_is_retried_not_dropped() {
    let h = harness(true, ScriptedTransport::new()).await;
    let file_id = h
        .files
        .store_file_offline(
            UploadFile::new("a.txt", "text/plain", b"hello".to_vec()),
            FileAssociation::new(),
        )
        .await
        .expect("stage");
    let id = h
        .sync
        .enqueue_file_upload(&file_id, "/api/files", HttpMethod::Post, UploadMetadata::default())
        .await
        .expect("enqueue");
    h.files.delete_offline_file(&file_id).await.expect("delete");

    let report = h.sync.sync(fast()).await.expect("sync");

    assert_eq!(report.retried, 1);
    assert_eq!(h.transport.call_count(), 0);
    assert_eq!(h.store.get_queue_item(&id).await.expect("item").retries, 1);
}

#[tokio::test]
async fn pending_count_is_exact_after_mid_batch_disconnect() {
    let transport = ScriptedTransport::new();
    transport.push_status(200, "{}");
    transport.push_failure(TransportError::Connection("network unreachable".into()));
    let h = harness(false, transport).await;

    let mut ids = Vec::new();
    for body in ["a", "b", "c", "d", "e"] {
        ids.push(
            h.sync
                .enqueue("/api/shifts", HttpMethod::Post, Headers::new(), Some(body.into()))
                .await
                .expect("enqueue"),
        );
    }
    h.sync.remove(&ids[4]).await.expect("remove");
    h.store
        .update_queue_item(&ids[3], QueueItemPatch::status(QueueStatus::Processing))
        .await
        .expect("claim d");
    assert_eq!(h.store.get_queue_count(Some(QueueStatus::Pending)).await, 3);

    h.connectivity.set_online(true);
    let report = h.sync.sync(fast()).await.expect("sync");

    assert!(report.aborted_offline);
    assert_eq!(report.delivered, 1);
    assert!(!h.sync.is_online());
    assert_eq!(h.transport.call_count(), 2);

    // a delivered; b back to pending with one retry; c untouched; d still processing
    assert_eq!(h.store.get_queue_count(Some(QueueStatus::Pending)).await, 2);
    assert_eq!(h.store.get_queue_count(Some(QueueStatus::Processing)).await, 1);
    let b = h.store.get_queue_item(&ids[1]).await.expect("b");
    let c = h.store.get_queue_item(&ids[2]).await.expect("c");
    assert_eq!(b.retries, 1);
    assert_eq!(c.retries, 0);
    assert_eq!(c.status, QueueStatus::Pending);
}

#[tokio::test]
async fn reconnect_triggers_a_pass() {
    let h = harness_with(
        false,
        ScriptedTransport::new(),
        SyncConfig {
            sync_on_enqueue: true,
            ..manual_sync_config()
        },
    )
    .await;
    h.sync.init().await.expect("init");
    let mut status = h.sync.on_sync_change();

    h.sync
        .enqueue("/api/shifts", HttpMethod::Delete, Headers::new(), None)
        .await
        .expect("enqueue");
    assert_eq!(h.transport.call_count(), 0);

    h.connectivity.set_online(true);
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let current = status.borrow_and_update();
                if current.online && !current.syncing && current.pending == 0 {
                    break;
                }
            }
            status.changed().await.expect("status channel open");
        }
    })
    .await
    .expect("queue drained after reconnect");

    assert_eq!(h.transport.call_count(), 1);
    h.sync.dispose();
}

#[tokio::test]
async fn storage_outage_refuses_to_queue() {
    let blocker = tempfile::NamedTempFile::new().expect("temp file");
    let url = format!(
        "sqlite://{}?mode=rwc",
        blocker.path().join("db.sqlite").display()
    );
    let store = Arc::new(offline_sync::SqlitePersistentStore::new(
        &offline_sync::shared::config::DatabaseConfig {
            url,
            max_connections: 1,
        },
    ));
    assert!(!store.init().await);

    let result = store
        .add_to_queue("/api/x", HttpMethod::Post, Headers::new(), None)
        .await;
    assert!(matches!(result, Err(AppError::StorageUnavailable(_))));
}

#[tokio::test]
async fn conflicting_upload_discards_its_staged_file() {
    let transport = ScriptedTransport::new();
    transport.push_status(409, r#"{"code":"CONFLICT","error":"receipt already attached"}"#);
    let h = harness(true, transport).await;

    let file_id = h
        .files
        .store_file_offline(
            UploadFile::new("receipt.jpg", "image/jpeg", vec![7u8; 10 * 1024]),
            FileAssociation::from([("expense_id".to_string(), "exp-3".to_string())]),
        )
        .await
        .expect("stage file");
    h.sync
        .enqueue_file_upload(
            &file_id,
            "/api/expenses/exp-3/receipt",
            HttpMethod::Post,
            UploadMetadata::default(),
        )
        .await
        .expect("enqueue upload");

    let report = h.sync.sync(fast()).await.expect("sync");

    assert_eq!(report.already_applied, 1);
    assert_eq!(h.store.get_queue_count(None).await, 0);
    assert!(h.files.get_offline_file(&file_id).await.is_none());
    assert!(h.files.list_offline_files().await.is_empty());
}

#[tokio::test]
async fn store_error_after_delivery_releases_the_item_and_the_pass_continues() {
    let transport = ScriptedTransport::new();
    transport.set_fallback(Reply::Status(201, "{}".to_string()));
    let h = harness(true, transport).await;
    let first = h
        .sync
        .enqueue("/api/a", HttpMethod::Post, Headers::new(), Some("a".into()))
        .await
        .expect("enqueue a");
    let second = h
        .sync
        .enqueue("/api/b", HttpMethod::Post, Headers::new(), Some("b".into()))
        .await
        .expect("enqueue b");
    h.flaky.fail_next_removes(1);

    let report = h.sync.sync(fast()).await.expect("pass survives the store error");

    assert_eq!(report.delivered, 1);
    let stuck = h.store.get_queue_item(&first).await.expect("a still queued");
    assert_eq!(stuck.status, QueueStatus::Pending);
    assert!(stuck.last_error.is_some());
    assert!(h.store.get_queue_item(&second).await.is_none());
    assert_eq!(h.store.get_queue_count(Some(QueueStatus::Processing)).await, 0);

    let again = h.sync.sync(fast()).await.expect("second pass");
    assert_eq!(again.delivered, 1);
    assert_eq!(h.store.get_queue_count(Some(QueueStatus::Pending)).await, 0);
    assert_eq!(h.store.get_queue_count(Some(QueueStatus::Processing)).await, 0);
    let urls: Vec<_> = h.transport.calls().into_iter().map(|call| call.url).collect();
    assert_eq!(urls, vec!["/api/a", "/api/b", "/api/a"]);
}

#[tokio::test]
async fn mixed_enqueue_paths_drain_in_insertion_order() {
    let transport = ScriptedTransport::new();
    transport.set_fallback(Reply::Status(201, "{}".to_string()));
    let h = harness(false, transport).await;

    h.sync
        .enqueue("/api/a", HttpMethod::Post, Headers::new(), Some("a".into()))
        .await
        .expect("plain enqueue");
    let file_id = h
        .files
        .store_file_offline(
            UploadFile::new("b.txt", "text/plain", b"b".to_vec()),
            FileAssociation::new(),
        )
        .await
        .expect("stage");
    h.sync
        .enqueue_file_upload(&file_id, "/api/b", HttpMethod::Post, UploadMetadata::default())
        .await
        .expect("file enqueue");
    let outcome = h
        .client
        .post(
            "/api/c",
            offline_sync::RequestOptions::default()
                .json(&serde_json::json!({"c": true}))
                .expect("serialize"),
        )
        .await
        .expect("queued while offline");
    assert!(matches!(outcome, offline_sync::RequestOutcome::Queued { .. }));

    h.connectivity.set_online(true);
    let report = h.sync.sync(fast()).await.expect("sync");

    assert_eq!(report.delivered, 3);
    let urls: Vec<_> = h.transport.calls().into_iter().map(|call| call.url).collect();
    assert_eq!(urls, vec!["/api/a", "/api/b", "/api/c"]);
}
