//! SQLite-backed response store: persistence across reopen, export and
//! import of bundles, legacy timestamp formats.
//!
//! Run with: `cargo test --test sqlite_store`

use chrono::{TimeZone, Utc};
use savechat::{ExportBundle, OpenStore, Record, RecordContext, ResponseStore, SqliteStore};
use tempfile::TempDir;

fn record(millis: i64, text: &str) -> Record {
    Record::new(
        text,
        "https://chat.openai.com/c/abc",
        RecordContext::new("Store tests")
            .with_message_index(1)
            .with_conversation_id("abc"),
    )
    .with_timestamp(Utc.timestamp_millis_opt(millis).unwrap())
}

#[tokio::test]
async fn records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("responses.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        store.save(record(1_000, "kept across restarts")).await.unwrap();
        store.save(record(2_000, "also kept")).await.unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    let records = store.list().await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].text, "also kept");
    assert_eq!(records[1].context.conversation_id.as_deref(), Some("abc"));

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_responses, 2);
    assert_eq!(stats.total_characters, "kept across restarts".len() + "also kept".len());
    assert_eq!(stats.oldest, Some(Utc.timestamp_millis_opt(1_000).unwrap()));
}

#[tokio::test]
async fn export_then_import_into_another_store_skips_duplicates() {
    let dir = TempDir::new().unwrap();
    let source = SqliteStore::open(dir.path().join("source.db")).unwrap();
    source.save(record(1_000, "first")).await.unwrap();
    source.save(record(2_000, "second")).await.unwrap();

    let bundle = source.export().await.unwrap();
    assert_eq!(bundle.version, "1.0");
    assert_eq!(bundle.total_responses, 2);
    let json = serde_json::to_string(&bundle).unwrap();

    let target = SqliteStore::open(dir.path().join("target.db")).unwrap();
    target.save(record(2_000, "already here")).await.unwrap();
    let parsed: ExportBundle = serde_json::from_str(&json).unwrap();
    let summary = target.import(parsed).await.unwrap();

    assert_eq!(summary.imported, 1);
    assert_eq!(summary.total, 2);
    let texts: Vec<_> = target.list().await.unwrap().into_iter().map(|r| r.text).collect();
    assert_eq!(texts, vec!["already here", "first"]);
}

#[tokio::test]
async fn legacy_bundle_with_epoch_millis_imports() {
    let legacy = r#"{
        "version": "1.0",
        "exportDate": "2024-03-01T12:00:00.000Z",
        "totalResponses": 1,
        "responses": [{
            "id": "1709294400000",
            "text": "Saved before timestamps were strings",
            "timestamp": 1709294400000,
            "url": "https://chat.openai.com/c/legacy",
            "context": { "title": "Old chat", "messageIndex": 3, "source": "popup" }
        }]
    }"#;
    let bundle: ExportBundle = serde_json::from_str(legacy).unwrap();
    let store = SqliteStore::open_in_memory().unwrap();

    store.import(bundle).await.unwrap();

    let records = store.list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].timestamp, Utc.timestamp_millis_opt(1_709_294_400_000).unwrap());
    assert_eq!(records[0].context.message_index, Some(3));
    assert_eq!(records[0].context.extra["source"], "popup");
}

#[tokio::test]
async fn delete_and_clear() {
    let store = SqliteStore::open_in_memory().unwrap();
    let keep = record(1_000, "keep");
    let drop_me = record(2_000, "remove");
    let drop_id = drop_me.id.clone();
    store.save(keep).await.unwrap();
    store.save(drop_me).await.unwrap();

    assert!(store.delete(&drop_id).await.unwrap());
    assert!(!store.delete(&drop_id).await.unwrap());
    assert_eq!(store.list().await.unwrap().len(), 1);

    store.clear().await.unwrap();
    assert!(store.list().await.unwrap().is_empty());
}

