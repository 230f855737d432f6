//! Integration tests for the file-backed chapter store.

use bookfetch_core::{BookLayout, Chapter, ChapterRecord, ChapterStore, Generation};
use tempfile::TempDir;

fn record(id: &str, content: &str) -> ChapterRecord {
    ChapterRecord::clean(Chapter::new(id, format!("Title {id}"), content))
}

#[tokio::test]
async fn test_store_survives_reopen_with_index_rebuilt() {
    let temp = TempDir::new().unwrap();
    let layout = BookLayout::new(temp.path().join("book"));
    let path = layout.chapter_store_path(&Generation::raw());

    let store = ChapterStore::open(&path).await.unwrap();
    store
        .upsert_many(&[
            record("1", "one"),
            ChapterRecord::dirty(Chapter::new("2", "Two", "partial")),
        ])
        .await
        .unwrap();
    store.close().await;

    let store = ChapterStore::open(&path).await.unwrap();
    assert_eq!(store.len(), 2);
    assert!(store.exists("1"));
    assert!(!store.need_refetch("1"));
    assert!(store.need_refetch("2"));
    assert!(store.need_refetch("missing"));
    assert_eq!(store.dirty_ids().into_iter().collect::<Vec<_>>(), ["2"]);
    assert_eq!(store.get("1").await.unwrap().unwrap().content, "one");
    store.close().await;

    assert_eq!(layout.stored_generations().unwrap(), [Generation::raw()]);
}

#[tokio::test]
async fn test_lower_priority_source_wins_reads() {
    let temp = TempDir::new().unwrap();
    let store = ChapterStore::open(&temp.path().join("chapter.raw.sqlite"))
        .await
        .unwrap();

    store
        .upsert_one(&record("7", "backup copy").with_source(2, 20))
        .await
        .unwrap();
    store
        .upsert_one(&record("7", "primary copy").with_source(1, 5))
        .await
        .unwrap();

    let chapter = store.get("7").await.unwrap().unwrap();
    assert_eq!(chapter.content, "primary copy");
    let many = store.get_many(&["7"]).await.unwrap();
    assert_eq!(many["7"].content, "primary copy");
    assert_eq!(store.len(), 1);
    store.close().await;
}

#[tokio::test]
async fn test_clean_copy_from_any_source_makes_chapter_clean() {
    let temp = TempDir::new().unwrap();
    let store = ChapterStore::open(&temp.path().join("chapter.raw.sqlite"))
        .await
        .unwrap();
    store
        .upsert_one(&ChapterRecord::dirty(Chapter::new("1", "t", "preview")).with_source(1, 10))
        .await
        .unwrap();
    assert!(store.need_refetch("1"));

    store.upsert_one(&record("1", "full").with_source(0, 0)).await.unwrap();
    assert!(!store.need_refetch("1"));
    assert!(store.clean_ids().contains("1"));
    store.close().await;
}

#[tokio::test]
async fn test_get_many_spans_query_chunks() {
    let temp = TempDir::new().unwrap();
    let store = ChapterStore::open(&temp.path().join("chapter.raw.sqlite"))
        .await
        .unwrap();
    let records: Vec<ChapterRecord> = (0..1200)
        .map(|i| record(&i.to_string(), &format!("body {i}")))
        .collect();
    store.upsert_many(&records).await.unwrap();

    let mut ids: Vec<String> = (0..1200).map(|i| i.to_string()).collect();
    ids.push("not-stored".to_string());
    let chapters = store.get_many(&ids).await.unwrap();

    assert_eq!(chapters.len(), 1200);
    assert_eq!(chapters["1199"].content, "body 1199");
    assert!(!chapters.contains_key("not-stored"));
    store.close().await;
}

#[tokio::test]
async fn test_book_info_round_trips_through_layout() {
    let temp = TempDir::new().unwrap();
    let layout = BookLayout::for_book(temp.path(), "series/42");
    assert!(layout.dir().starts_with(temp.path()));
    assert_eq!(layout.load_book_info(&Generation::raw()).unwrap(), None);

    let info = bookfetch_core::BookInfo {
        book_name: "Layout".to_string(),
        ..Default::default()
    };
    layout.save_book_info(&Generation::raw(), &info).unwrap();
    assert_eq!(layout.load_book_info(&Generation::raw()).unwrap(), Some(info));
}
