//! Import/export pipelines and the coordinator against a real SQLite catalog.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    BridgeError, CoverCache, CoverLoader, ExportSink, Freshness, ImportSource, ItemMetadata,
    MediaKind, RemoteLookupPort, SettingsStore,
};
use bytes::Bytes;
use core_library::db::create_test_pool;
use core_library::repositories::SqliteCatalogRepository;
use core_library::{CatalogItem, CatalogManager, IdentityResolver};
use core_metadata::CoverService;
use core_runtime::config::{TransferSettings, OVERRIDE_EXISTING_KEY};
use core_runtime::events::{CatalogEvent, CoreEvent, EventBus};
use core_sync::{
    protect_id, DefaultKindAdapter, ExportPipeline, ImportPipeline, PersistedJobState,
    SqliteSnapshotRepository, SyncError, TransferContext, TransferCoordinator, TransferJob,
    TransferStatus, NO_BARCODE_MARKER,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct FakeLookup {
    known: HashSet<String>,
    failing: HashSet<String>,
    finds: AtomicUsize,
    /// Cancel this token once `finds` reaches the given count.
    cancel_after: Option<(usize, CancellationToken)>,
    /// Time each `find` takes.
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeLookup {
    fn knowing<I: IntoIterator<Item = S>, S: Into<String>>(codes: I) -> Self {
        Self {
            known: codes.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    fn finds(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteLookupPort for FakeLookup {
    async fn find(&self, id: &str, _kind: MediaKind) -> BridgeResult<Option<ItemMetadata>> {
        let calls = self.finds.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if calls >= *after {
                token.cancel();
            }
        }
        if let Some(delay) = self.delay {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        if self.failing.contains(id) {
            return Err(BridgeError::Remote(format!("timeout resolving {}", id)));
        }
        if !self.known.contains(id) {
            return Ok(None);
        }
        Ok(Some(ItemMetadata {
            title: format!("Remote {}", id),
            ean: Some(id.to_string()),
            ..Default::default()
        }))
    }

    async fn fetch_freshness(&self, _cover_url: &str) -> BridgeResult<Freshness> {
        Ok(Freshness {
            last_modified: None,
            status_code: 200,
        })
    }
}

struct NoCovers;

#[async_trait]
impl CoverLoader for NoCovers {
    async fn load(&self, url: &str) -> BridgeResult<Bytes> {
        Err(BridgeError::Remote(format!("no network for {}", url)))
    }
}

#[async_trait]
impl CoverCache for NoCovers {
    async fn get_cached(&self, _item_id: &str) -> BridgeResult<Option<Bytes>> {
        Ok(None)
    }

    async fn put(&self, _item_id: &str, _data: Bytes) -> BridgeResult<()> {
        Ok(())
    }

    async fn invalidate(&self, _item_id: &str) -> BridgeResult<()> {
        Ok(())
    }
}

/// Import source over in-memory records; `None` behaves like a missing file.
struct MemorySource {
    records: Option<Vec<Value>>,
    reads: AtomicUsize,
}

impl MemorySource {
    fn new(records: Option<Vec<Value>>) -> Self {
        Self {
            records,
            reads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ImportSource for MemorySource {
    async fn read_records(&self, kind: MediaKind) -> BridgeResult<Vec<Value>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.records
            .clone()
            .ok_or_else(|| BridgeError::SourceUnavailable(format!("{}.json", kind)))
    }
}

#[derive(Default)]
struct MemorySink {
    records: Mutex<Vec<Value>>,
    begins: Mutex<Vec<bool>>,
    finishes: AtomicUsize,
    appends: AtomicUsize,
    /// Cancel this token once `appends` reaches the given count.
    cancel_after: Option<(usize, CancellationToken)>,
}

#[async_trait]
impl ExportSink for MemorySink {
    async fn begin(&self, _kind: MediaKind, truncate: bool) -> BridgeResult<()> {
        if truncate {
            self.records.lock().unwrap().clear();
        }
        self.begins.lock().unwrap().push(truncate);
        Ok(())
    }

    async fn append(&self, _kind: MediaKind, record: Value) -> BridgeResult<()> {
        self.records.lock().unwrap().push(record);
        let appends = self.appends.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if appends >= *after {
                token.cancel();
            }
        }
        Ok(())
    }

    async fn finish(&self, _kind: MediaKind) -> BridgeResult<()> {
        self.finishes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn set_bool(&self, key: &str, value: bool) -> BridgeResult<()> {
        self.set_string(key, if value { "true" } else { "false" }).await
    }

    async fn get_bool(&self, key: &str) -> BridgeResult<Option<bool>> {
        Ok(self.get_string(key).await?.map(|v| v == "true"))
    }

    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }

    async fn has_key(&self, key: &str) -> BridgeResult<bool> {
        Ok(self.values.lock().unwrap().contains_key(key))
    }

    async fn list_keys(&self) -> BridgeResult<Vec<String>> {
        Ok(self.values.lock().unwrap().keys().cloned().collect())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    pool: SqlitePool,
    manager: Arc<CatalogManager>,
    lookup: Arc<FakeLookup>,
    source: Arc<MemorySource>,
    sink: Arc<MemorySink>,
    settings_store: Arc<MemorySettings>,
    events: EventBus,
}

impl Harness {
    async fn new(lookup: FakeLookup, records: Option<Vec<Value>>) -> Self {
        Self::with_sink(lookup, records, MemorySink::default()).await
    }

    async fn with_sink(lookup: FakeLookup, records: Option<Vec<Value>>, sink: MemorySink) -> Self {
        let pool = create_test_pool().await.unwrap();
        let events = EventBus::new(256);
        let manager = Arc::new(
            CatalogManager::new(
                Arc::new(SqliteCatalogRepository::new(pool.clone())),
                IdentityResolver::new(pool.clone(), MediaKind::Books),
                Arc::new(NoCovers),
            )
            .with_event_bus(events.clone()),
        );

        Self {
            pool,
            manager,
            lookup: Arc::new(lookup),
            source: Arc::new(MemorySource::new(records)),
            sink: Arc::new(sink),
            settings_store: Arc::new(MemorySettings::default()),
            events,
        }
    }

    fn context(&self, throttle: Duration) -> TransferContext {
        TransferContext {
            manager: self.manager.clone(),
            adapter: Arc::new(DefaultKindAdapter::new(MediaKind::Books, self.lookup.clone())),
            covers: Arc::new(CoverService::new(Arc::new(NoCovers), Arc::new(NoCovers), 4)),
            source: self.source.clone(),
            sink: self.sink.clone(),
            settings_store: self.settings_store.clone(),
            settings: TransferSettings {
                throttle,
                fetch_timeout: Duration::from_secs(5),
                override_existing_default: false,
            },
            events: self.events.clone(),
        }
    }

    async fn add_book(&self, ean: &str, title: &str) -> CatalogItem {
        let mut item = CatalogItem::new(MediaKind::Books, title);
        item.ean = Some(ean.to_string());
        self.manager.insert(item).await.unwrap()
    }
}

fn ean_records(n: usize) -> (Vec<Value>, Vec<String>) {
    let codes: Vec<String> = (0..n).map(|i| format!("97800000001{:02}", i)).collect();
    let records = codes.iter().map(|c| json!({ "ean": c })).collect();
    (records, codes)
}

// ============================================================================
// Import
// ============================================================================

#[tokio::test]
async fn test_import_end_to_end_counts() {
    let lookup = FakeLookup::knowing(["9780000000002"]);
    let records = vec![
        json!({ "ean": "9780000000001" }),
        json!({ "ean": "9780000000002" }),
        json!({ "id": protect_id("bquilt"), "title": "Grandma's quilt", "manual": true }),
    ];
    let h = Harness::new(lookup, Some(records)).await;
    h.add_book("9780000000001", "Already here").await;

    let job = TransferJob::new_import(MediaKind::Books, None);
    let job = ImportPipeline::new(h.context(Duration::ZERO), job)
        .unwrap()
        .run(&CancellationToken::new())
        .await;

    assert_eq!(job.status(), TransferStatus::Completed);
    assert_eq!(job.counters.imported, 2);
    assert_eq!(job.counters.already_exists, 1);
    assert_eq!(job.counters.manually_added, 1);
    assert_eq!(job.counters.missing, 0);
    assert_eq!(job.logs.existing_ids, vec!["9780000000001"]);
    assert!(job.logs.missing_ids.is_empty());
    assert_eq!(job.cursor(), 3);

    assert_eq!(h.manager.count().await.unwrap(), 3);
    let quilt = h.manager.find_by_id("bquilt").await.unwrap().unwrap();
    assert!(quilt.manual);
    assert_eq!(h.lookup.finds(), 1);
}

#[tokio::test]
async fn test_cancel_after_four_then_resume_counts_each_record_once() {
    let (records, codes) = ean_records(10);
    let cancel = CancellationToken::new();
    let mut lookup = FakeLookup::knowing(codes);
    lookup.cancel_after = Some((4, cancel.clone()));
    let h = Harness::new(lookup, Some(records)).await;

    let first = ImportPipeline::new(h.context(Duration::ZERO), TransferJob::new_import(MediaKind::Books, None))
        .unwrap()
        .run(&cancel)
        .await;

    assert_eq!(first.status(), TransferStatus::Cancelled);
    assert_eq!(first.cursor(), 4);
    assert_eq!(first.counters.imported, 4);

    let blob = PersistedJobState::save(&first).unwrap();
    let restored = PersistedJobState::restore(&blob).unwrap();
    assert_eq!(restored.status(), TransferStatus::Created);
    assert_eq!(restored.cursor(), 4);

    let second = ImportPipeline::new(h.context(Duration::ZERO), restored)
        .unwrap()
        .run(&CancellationToken::new())
        .await;

    assert_eq!(second.status(), TransferStatus::Completed);
    assert_eq!(second.cursor(), 10);
    assert_eq!(second.counters.imported, 10);
    assert_eq!(second.counters.already_exists, 0);
    assert_eq!(h.lookup.finds(), 10);
    assert_eq!(h.manager.count().await.unwrap(), 10);
    // The resumed run works from the snapshot, not the source.
    assert_eq!(h.source.reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_before_first_record_leaves_cursor_at_start() {
    let (records, codes) = ean_records(3);
    let h = Harness::new(FakeLookup::knowing(codes), Some(records)).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let job = ImportPipeline::new(h.context(Duration::ZERO), TransferJob::new_import(MediaKind::Books, None))
        .unwrap()
        .run(&cancel)
        .await;

    assert_eq!(job.status(), TransferStatus::Cancelled);
    assert_eq!(job.cursor(), 0);
    assert_eq!(job.counters, Default::default());
    assert_eq!(h.lookup.finds(), 0);
}

#[tokio::test]
async fn test_missing_source_fails_with_zero_counts() {
    let h = Harness::new(FakeLookup::default(), None).await;

    let job = ImportPipeline::new(h.context(Duration::ZERO), TransferJob::new_import(MediaKind::Books, None))
        .unwrap()
        .run(&CancellationToken::new())
        .await;

    assert_eq!(job.status(), TransferStatus::Failed);
    assert_eq!(job.counters, Default::default());
    assert!(job
        .error_message
        .as_deref()
        .unwrap()
        .to_lowercase()
        .contains("missing import file"));
}

#[tokio::test]
async fn test_unresolved_records_are_logged_as_missing() {
    let mut lookup = FakeLookup::knowing(["4006381333931"]);
    lookup.failing.insert("5012345678900".to_string());
    let records = vec![
        json!({ "ean": "0000000000017" }),
        json!({ "ean": "5012345678900" }),
        json!({ "title": "No code at all" }),
        json!("not an object"),
        json!({ "ean": "4006381333931" }),
    ];
    let h = Harness::new(lookup, Some(records)).await;

    let job = ImportPipeline::new(h.context(Duration::ZERO), TransferJob::new_import(MediaKind::Books, None))
        .unwrap()
        .run(&CancellationToken::new())
        .await;

    assert_eq!(job.status(), TransferStatus::Completed);
    assert_eq!(job.counters.imported, 1);
    assert_eq!(job.counters.missing, 4);
    assert_eq!(
        job.logs.missing_ids,
        vec!["0000000000017", "5012345678900", NO_BARCODE_MARKER, NO_BARCODE_MARKER]
    );
}

#[tokio::test]
async fn test_override_preference_overwrites_existing_items() {
    let records = vec![json!({ "ean": "9780000000001", "title": "Corrected title" })];
    let h = Harness::new(FakeLookup::default(), Some(records.clone())).await;
    let existing = h.add_book("9780000000001", "Typo titel").await;

    // Preference off: only counted.
    ImportPipeline::new(h.context(Duration::ZERO), TransferJob::new_import(MediaKind::Books, None))
        .unwrap()
        .run(&CancellationToken::new())
        .await;
    let item = h.manager.find_by_id(&existing.internal_id).await.unwrap().unwrap();
    assert_eq!(item.title, "Typo titel");

    h.settings_store
        .set_bool(OVERRIDE_EXISTING_KEY, true)
        .await
        .unwrap();
    let job = ImportPipeline::new(h.context(Duration::ZERO), TransferJob::new_import(MediaKind::Books, None))
        .unwrap()
        .run(&CancellationToken::new())
        .await;

    assert_eq!(job.counters.already_exists, 1);
    let item = h.manager.find_by_id(&existing.internal_id).await.unwrap().unwrap();
    assert_eq!(item.title, "Corrected title");
    assert_eq!(h.manager.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_import_applies_job_sub_type() {
    let records = vec![json!({ "ean": "9780000000002" })];
    let h = Harness::new(FakeLookup::knowing(["9780000000002"]), Some(records)).await;

    ImportPipeline::new(
        h.context(Duration::ZERO),
        TransferJob::new_import(MediaKind::Books, Some("audiobook".into())),
    )
    .unwrap()
    .run(&CancellationToken::new())
    .await;

    let id = h.manager.find_id("9780000000002").await.unwrap().unwrap();
    let item = h.manager.find_by_id(&id).await.unwrap().unwrap();
    assert_eq!(item.sub_type.as_deref(), Some("audiobook"));
}

// ============================================================================
// Export
// ============================================================================

#[tokio::test]
async fn test_mass_export_writes_every_item() {
    let h = Harness::new(FakeLookup::default(), Some(vec![])).await;
    for (ean, title) in [("111", "A"), ("222", "B"), ("333", "C")] {
        h.add_book(ean, title).await;
    }

    let job = ExportPipeline::new(
        h.context(Duration::ZERO),
        TransferJob::new_export(MediaKind::Books, Vec::new(), true),
    )
    .unwrap()
    .run(&CancellationToken::new())
    .await;

    assert_eq!(job.status(), TransferStatus::Completed);
    assert_eq!(job.counters.exported, 3);
    assert_eq!(h.sink.records.lock().unwrap().len(), 3);
    assert_eq!(*h.sink.begins.lock().unwrap(), vec![true]);
    assert_eq!(h.sink.finishes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_export_skips_items_deleted_since_selection() {
    let h = Harness::new(FakeLookup::default(), Some(vec![])).await;
    let a = h.add_book("111", "A").await;
    let b = h.add_book("222", "B").await;
    h.manager.delete(&b.internal_id).await.unwrap();

    let job = ExportPipeline::new(
        h.context(Duration::ZERO),
        TransferJob::new_export(MediaKind::Books, vec![a.internal_id.clone(), b.internal_id], false),
    )
    .unwrap()
    .run(&CancellationToken::new())
    .await;

    assert_eq!(job.status(), TransferStatus::Completed);
    assert_eq!(job.cursor(), 2);
    assert_eq!(job.counters.exported, 1);
    let records = h.sink.records.lock().unwrap();
    assert_eq!(records[0]["id"], json!(protect_id(&a.internal_id)));
}

#[tokio::test]
async fn test_exported_records_import_as_existing() {
    let h = Harness::new(FakeLookup::default(), Some(vec![])).await;
    h.add_book("111", "A").await;
    h.add_book("222", "B").await;

    ExportPipeline::new(
        h.context(Duration::ZERO),
        TransferJob::new_export(MediaKind::Books, Vec::new(), true),
    )
    .unwrap()
    .run(&CancellationToken::new())
    .await;
    let exported = h.sink.records.lock().unwrap().clone();

    let job = ImportPipeline::new(
        h.context(Duration::ZERO),
        TransferJob::resumed_import(MediaKind::Books, exported, 0, None).unwrap(),
    )
    .unwrap()
    .run(&CancellationToken::new())
    .await;

    assert_eq!(job.counters.already_exists, 2);
    assert_eq!(job.counters.imported, 0);
    assert_eq!(h.lookup.finds(), 0);
}

#[tokio::test]
async fn test_cancelled_export_resumes_without_duplicates() {
    let cancel = CancellationToken::new();
    let sink = MemorySink {
        cancel_after: Some((2, cancel.clone())),
        ..Default::default()
    };
    let h = Harness::with_sink(FakeLookup::default(), Some(vec![]), sink).await;
    let mut ids = Vec::new();
    for i in 0..6 {
        let item = h.add_book(&format!("50000000000{}", i), &format!("Book {}", i)).await;
        ids.push(protect_id(&item.internal_id));
    }

    let first = ExportPipeline::new(
        h.context(Duration::ZERO),
        TransferJob::new_export(MediaKind::Books, Vec::new(), true),
    )
    .unwrap()
    .run(&cancel)
    .await;

    assert_eq!(first.status(), TransferStatus::Cancelled);
    assert_eq!(first.cursor(), 2);
    assert_eq!(first.counters.exported, 2);
    assert_eq!(h.sink.records.lock().unwrap().len(), first.cursor());
    assert_eq!(h.sink.finishes.load(Ordering::SeqCst), 1);

    let blob = PersistedJobState::save(&first).unwrap();
    let restored = PersistedJobState::restore(&blob).unwrap();
    let second = ExportPipeline::new(h.context(Duration::ZERO), restored)
        .unwrap()
        .run(&CancellationToken::new())
        .await;

    assert_eq!(second.status(), TransferStatus::Completed);
    assert_eq!(second.cursor(), 6);
    assert_eq!(second.counters.exported, 6);
    assert_eq!(*h.sink.begins.lock().unwrap(), vec![true, false]);

    let mut written: Vec<String> = h
        .sink
        .records
        .lock()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(written.len(), 6);
    written.sort();
    ids.sort();
    assert_eq!(written, ids);
}

// ============================================================================
// Coordinator
// ============================================================================

async fn wait_for_first_insert(rx: &mut tokio::sync::broadcast::Receiver<CoreEvent>) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no item was added")
            .unwrap();
        if let CoreEvent::Catalog(CatalogEvent::ItemAdded { .. }) = event {
            return;
        }
    }
}

#[tokio::test]
async fn test_second_start_is_rejected_and_first_job_unaffected() {
    let (records, codes) = ean_records(3);
    let h = Harness::new(FakeLookup::knowing(codes), Some(records)).await;
    let coordinator = TransferCoordinator::new(h.events.clone());
    coordinator.register_kind(h.context(Duration::from_millis(20))).await;

    let first = coordinator.start_import(MediaKind::Books, None).await.unwrap();
    assert!(coordinator.is_running(MediaKind::Books).await);

    let second = coordinator.start_import(MediaKind::Books, None).await;
    assert!(matches!(
        second,
        Err(SyncError::TransferInProgress { kind: MediaKind::Books })
    ));
    let export = coordinator.start_export(MediaKind::Books, vec![], true).await;
    assert!(matches!(export, Err(SyncError::TransferInProgress { .. })));

    let report = first.wait().await.unwrap();
    assert_eq!(report.status, TransferStatus::Completed);
    assert_eq!(report.counters.imported, 3);
    assert_eq!(report.processed, 3);
    assert!(!coordinator.is_running(MediaKind::Books).await);

    // The kind is free again once the job finished.
    let again = coordinator.start_import(MediaKind::Books, None).await.unwrap();
    let report = again.wait().await.unwrap();
    assert_eq!(report.counters.already_exists, 3);
}

#[tokio::test]
async fn test_unregistered_kind_is_rejected() {
    let h = Harness::new(FakeLookup::default(), Some(vec![])).await;
    let coordinator = TransferCoordinator::new(h.events.clone());

    let result = coordinator.start_import(MediaKind::Movies, None).await;
    assert!(matches!(result, Err(SyncError::KindNotRegistered(MediaKind::Movies))));
}

#[tokio::test]
async fn test_cancel_through_handle_reports_partial_counters() {
    let (records, codes) = ean_records(5);
    let h = Harness::new(FakeLookup::knowing(codes), Some(records)).await;
    let coordinator = TransferCoordinator::new(h.events.clone());
    coordinator.register_kind(h.context(Duration::from_secs(3600))).await;
    let mut rx = h.events.subscribe();

    let handle = coordinator.start_import(MediaKind::Books, None).await.unwrap();
    wait_for_first_insert(&mut rx).await;
    assert!(coordinator.cancel(&handle).await);

    let report = handle.wait().await.unwrap();
    assert_eq!(report.status, TransferStatus::Cancelled);
    assert_eq!(report.processed, 1);
    assert_eq!(report.counters.imported, 1);
    assert_eq!(report.total, 5);
}

#[tokio::test]
async fn test_suspend_and_resume_stored_snapshot() {
    let (records, codes) = ean_records(5);
    let h = Harness::new(FakeLookup::knowing(codes), Some(records)).await;
    let coordinator = TransferCoordinator::new(h.events.clone())
        .with_snapshot_repository(Arc::new(SqliteSnapshotRepository::new(h.pool.clone())));
    coordinator.register_kind(h.context(Duration::from_secs(3600))).await;
    let mut rx = h.events.subscribe();

    let handle = coordinator.start_import(MediaKind::Books, None).await.unwrap();
    wait_for_first_insert(&mut rx).await;

    let blob = coordinator.suspend(MediaKind::Books).await.unwrap().unwrap();
    assert!(!coordinator.is_running(MediaKind::Books).await);
    assert_eq!(handle.wait().await.unwrap().status, TransferStatus::Cancelled);
    assert_eq!(PersistedJobState::restore(&blob).unwrap().cursor(), 1);

    coordinator.register_kind(h.context(Duration::ZERO)).await;
    let resumed = coordinator
        .resume_stored(MediaKind::Books)
        .await
        .unwrap()
        .expect("snapshot was stored");
    let report = resumed.wait().await.unwrap();

    assert_eq!(report.status, TransferStatus::Completed);
    assert_eq!(report.counters.imported, 5);
    assert_eq!(report.processed, 5);
    assert_eq!(h.lookup.finds(), 5);
    assert!(coordinator.resume_stored(MediaKind::Books).await.unwrap().is_none());
}

#[tokio::test]
async fn test_start_during_suspend_is_rejected() {
    let (records, codes) = ean_records(3);
    let mut lookup = FakeLookup::knowing(codes);
    lookup.delay = Some(Duration::from_millis(300));
    let h = Harness::new(lookup, Some(records)).await;
    let coordinator = Arc::new(
        TransferCoordinator::new(h.events.clone())
            .with_snapshot_repository(Arc::new(SqliteSnapshotRepository::new(h.pool.clone()))),
    );
    coordinator.register_kind(h.context(Duration::ZERO)).await;

    let first = coordinator.start_import(MediaKind::Books, None).await.unwrap();
    while h.lookup.finds() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // The first record is still being looked up while the suspend waits.
    let suspending = tokio::spawn({
        let coordinator = Arc::clone(&coordinator);
        async move { coordinator.suspend(MediaKind::Books).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(coordinator.is_running(MediaKind::Books).await);
    assert!(matches!(
        coordinator.start_import(MediaKind::Books, None).await,
        Err(SyncError::TransferInProgress { kind: MediaKind::Books })
    ));
    assert!(matches!(
        coordinator.start_export(MediaKind::Books, vec![], true).await,
        Err(SyncError::TransferInProgress { .. })
    ));
    assert!(coordinator.suspend(MediaKind::Books).await.unwrap().is_none());

    let blob = suspending.await.unwrap().unwrap().expect("job was cancelled");
    assert_eq!(PersistedJobState::restore(&blob).unwrap().cursor(), 1);
    assert_eq!(first.wait().await.unwrap().status, TransferStatus::Cancelled);
    assert_eq!(h.lookup.max_in_flight(), 1);
    assert!(!coordinator.is_running(MediaKind::Books).await);

    // The slot is free once the snapshot is stored.
    let export = coordinator
        .start_export(MediaKind::Books, vec![], true)
        .await
        .unwrap();
    assert_eq!(export.wait().await.unwrap().status, TransferStatus::Completed);
}

#[tokio::test]
async fn test_suspend_without_running_job_is_none() {
    let h = Harness::new(FakeLookup::default(), Some(vec![])).await;
    let coordinator = TransferCoordinator::new(h.events.clone());
    coordinator.register_kind(h.context(Duration::ZERO)).await;

    assert!(coordinator.suspend(MediaKind::Books).await.unwrap().is_none());
    assert!(!coordinator.cancel_kind(MediaKind::Books).await);
}

#[tokio::test]
async fn test_corrupt_snapshot_cannot_be_resumed() {
    let h = Harness::new(FakeLookup::default(), Some(vec![])).await;
    let coordinator = TransferCoordinator::new(h.events.clone());
    coordinator.register_kind(h.context(Duration::ZERO)).await;

    assert!(matches!(
        coordinator.resume(b"garbage").await,
        Err(SyncError::InvalidSnapshot)
    ));
}
