//! Identity resolution and manager behaviour against a real SQLite store.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{CoverCache, EventCalendar, MediaKind};
use bytes::Bytes;
use core_library::db::create_test_pool;
use core_library::repositories::SqliteCatalogRepository;
use core_library::{CatalogItem, CatalogManager, IdentityKey, IdentityResolver, MatchPolicy};
use core_runtime::events::{CatalogEvent, CoreEvent, EventBus};
use sqlx::SqlitePool;

#[derive(Default)]
struct RecordingCache {
    invalidated: Mutex<Vec<String>>,
}

#[async_trait]
impl CoverCache for RecordingCache {
    async fn get_cached(&self, _item_id: &str) -> BridgeResult<Option<Bytes>> {
        Ok(None)
    }

    async fn put(&self, _item_id: &str, _data: Bytes) -> BridgeResult<()> {
        Ok(())
    }

    async fn invalidate(&self, item_id: &str) -> BridgeResult<()> {
        self.invalidated.lock().unwrap().push(item_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingCalendar {
    removed: Mutex<Vec<String>>,
}

#[async_trait]
impl EventCalendar for RecordingCalendar {
    async fn remove_event(&self, item_id: &str) -> BridgeResult<bool> {
        self.removed.lock().unwrap().push(item_id.to_string());
        Ok(true)
    }
}

fn manager(pool: &SqlitePool, kind: MediaKind, policy: MatchPolicy) -> CatalogManager {
    CatalogManager::new(
        Arc::new(SqliteCatalogRepository::new(pool.clone())),
        IdentityResolver::new(pool.clone(), kind).with_policy(policy),
        Arc::new(RecordingCache::default()),
    )
}

async fn add_book(manager: &CatalogManager, ean: &str) -> CatalogItem {
    let mut item = CatalogItem::new(MediaKind::Books, "Book");
    item.ean = Some(ean.to_string());
    manager.insert(item).await.unwrap()
}

#[tokio::test]
async fn test_leading_zero_equivalence() {
    let pool = create_test_pool().await.unwrap();
    let books = manager(&pool, MediaKind::Books, MatchPolicy::AnyField);
    let item = add_book(&books, "00012345").await;

    assert_eq!(item.ean.as_deref(), Some("12345"));
    for raw in ["12345", "012345", "00012345", "000000012345", " 12345 "] {
        assert_eq!(
            books.find_id(raw).await.unwrap().as_deref(),
            Some(item.internal_id.as_str()),
            "raw code {raw:?}"
        );
    }
    assert!(!books.exists("123450").await.unwrap());
}

#[tokio::test]
async fn test_exists_matches_every_key_type() {
    let pool = create_test_pool().await.unwrap();
    let music = manager(&pool, MediaKind::Music, MatchPolicy::AnyField);

    let mut item = CatalogItem::new(MediaKind::Music, "Kind of Blue");
    item.upc = Some("074646493528".to_string());
    item.isbn = Some("1234567890".to_string());
    let item = music.insert(item).await.unwrap();

    assert!(music.exists(&item.internal_id).await.unwrap());
    assert!(music.exists("074646493528").await.unwrap());
    assert!(music.exists("1234567890").await.unwrap());
    assert!(!music.exists("").await.unwrap());
}

#[tokio::test]
async fn test_lookups_are_scoped_to_kind() {
    let pool = create_test_pool().await.unwrap();
    let books = manager(&pool, MediaKind::Books, MatchPolicy::AnyField);
    let movies = manager(&pool, MediaKind::Movies, MatchPolicy::AnyField);
    add_book(&books, "4006381333931").await;

    assert!(books.exists("4006381333931").await.unwrap());
    assert!(!movies.exists("4006381333931").await.unwrap());
}

#[tokio::test]
async fn test_like_wildcards_in_input_are_literal() {
    let pool = create_test_pool().await.unwrap();
    let books = manager(&pool, MediaKind::Books, MatchPolicy::AnyField);
    add_book(&books, "4006381333931").await;

    assert!(!books.exists("%").await.unwrap());
    assert!(!books.exists("400638133393_").await.unwrap());
}

#[tokio::test]
async fn test_cross_key_collision_depends_on_policy() {
    let pool = create_test_pool().await.unwrap();
    let any_field = manager(&pool, MediaKind::Music, MatchPolicy::AnyField);
    let same_field = manager(&pool, MediaKind::Music, MatchPolicy::SameField);

    // EAN-13 of a UPC-A product, stored as "12345678905".
    let mut album = CatalogItem::new(MediaKind::Music, "Album A");
    album.ean = Some("0012345678905".to_string());
    let album = any_field.insert(album).await.unwrap();

    // A 12-digit UPC that normalises to the same digits.
    let upc = "012345678905";
    assert_eq!(
        IdentityKey::classify(upc, MediaKind::Music),
        IdentityKey::Upc("12345678905".to_string())
    );

    assert_eq!(
        any_field.find_id(upc).await.unwrap().as_deref(),
        Some(album.internal_id.as_str())
    );
    assert_eq!(same_field.find_id(upc).await.unwrap(), None);

    // The same code typed as an EAN still matches under the strict policy.
    assert_eq!(
        same_field.find_id("0012345678905").await.unwrap().as_deref(),
        Some(album.internal_id.as_str())
    );
}

#[tokio::test]
async fn test_same_field_finds_book_stored_by_ean() {
    let pool = create_test_pool().await.unwrap();
    let books = manager(&pool, MediaKind::Books, MatchPolicy::SameField);

    // A book's EAN-13 is its ISBN-13; it may be kept under either column.
    let by_ean = add_book(&books, "9780000000001").await;
    let mut by_isbn = CatalogItem::new(MediaKind::Books, "Stored by ISBN");
    by_isbn.isbn = Some("9790000000002".to_string());
    let by_isbn = books.insert(by_isbn).await.unwrap();

    assert!(books.exists("9780000000001").await.unwrap());
    assert_eq!(
        books.find_id("9780000000001").await.unwrap().as_deref(),
        Some(by_ean.internal_id.as_str())
    );
    assert_eq!(
        books.find_id("9790000000002").await.unwrap().as_deref(),
        Some(by_isbn.internal_id.as_str())
    );

    // A non-Bookland EAN is still not looked up in the ISBN column.
    let mut odd = CatalogItem::new(MediaKind::Books, "ISBN column misuse");
    odd.isbn = Some("4006381333931".to_string());
    books.insert(odd).await.unwrap();
    assert!(!books.exists("4006381333931").await.unwrap());
}

#[tokio::test]
async fn test_delete_releases_cover_and_calendar_event() {
    let pool = create_test_pool().await.unwrap();
    let cache = Arc::new(RecordingCache::default());
    let calendar = Arc::new(RecordingCalendar::default());
    let bus = EventBus::new(16);
    let mut events = bus.subscribe();

    let games = CatalogManager::new(
        Arc::new(SqliteCatalogRepository::new(pool.clone())),
        IdentityResolver::new(pool.clone(), MediaKind::BoardGames),
        cache.clone(),
    )
    .with_calendar(calendar.clone())
    .with_event_bus(bus);

    let item = games
        .insert(CatalogItem::new(MediaKind::BoardGames, "Go"))
        .await
        .unwrap();

    assert!(games.delete(&item.internal_id).await.unwrap());
    assert!(!games.delete(&item.internal_id).await.unwrap());

    assert_eq!(*cache.invalidated.lock().unwrap(), vec![item.internal_id.clone()]);
    assert_eq!(*calendar.removed.lock().unwrap(), vec![item.internal_id.clone()]);

    assert!(matches!(
        events.recv().await.unwrap(),
        CoreEvent::Catalog(CatalogEvent::ItemAdded { .. })
    ));
    assert_eq!(
        events.recv().await.unwrap(),
        CoreEvent::Catalog(CatalogEvent::ItemDeleted {
            kind: MediaKind::BoardGames,
            item_id: item.internal_id,
        })
    );
}

#[tokio::test]
async fn test_save_upserts_by_internal_id() {
    let pool = create_test_pool().await.unwrap();
    let books = manager(&pool, MediaKind::Books, MatchPolicy::AnyField);
    let mut item = add_book(&books, "9780000000001").await;

    item.title = "Second Edition".to_string();
    books.save(item.clone()).await.unwrap();

    let stored = books.find_by_id(&item.internal_id).await.unwrap().unwrap();
    assert_eq!(stored.title, "Second Edition");
    assert_eq!(books.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_manager_rejects_other_kinds() {
    let pool = create_test_pool().await.unwrap();
    let books = manager(&pool, MediaKind::Books, MatchPolicy::AnyField);
    assert!(books
        .insert(CatalogItem::new(MediaKind::Toys, "Yo-yo"))
        .await
        .is_err());
}
