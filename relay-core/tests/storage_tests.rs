mod common;

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use relay_core::storage::JsonFile;
use relay_core::{DeliveryRecord, DeliveryStatus, FileDeliveryRecordStore};
use uuid::Uuid;

#[tokio::test]
async fn load_uses_tmp_fallback_on_corrupted_json() {
    let dir = common::temp_dir("relay_corrupt");
    tokio::fs::create_dir_all(&dir).await.unwrap();

    let path = dir.join("rate_limits.json");
    tokio::fs::write(&path, b"{ this is not json ").await.unwrap();

    let tmp_path = dir.join("rate_limits.json.tmp");
    let saved: BTreeMap<String, u32> = [("feed".to_string(), 3)].into_iter().collect();
    tokio::fs::write(&tmp_path, serde_json::to_vec(&saved).unwrap())
        .await
        .unwrap();

    let file = JsonFile::<BTreeMap<String, u32>>::load_from(&path).await;
    assert_eq!(*file.read().await, saved, "should fall back to tmp file when main is corrupted");

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn persist_replaces_the_file_atomically() {
    let dir = common::temp_dir("relay_persist");
    let path = dir.join("nested").join("store.json");

    let file = JsonFile::<BTreeMap<String, u32>>::load_from(&path).await;
    assert!(file.read().await.is_empty());
    file.write().await.insert("a".into(), 1);
    file.persist().await.unwrap();

    assert!(!dir.join("nested").join("store.json.tmp").exists());
    let written = tokio::fs::read_to_string(&path).await.unwrap();
    assert_eq!(written, r#"{"a":1}"#);
    let reloaded = JsonFile::<BTreeMap<String, u32>>::load_from(&path).await;
    assert_eq!(reloaded.read().await.get("a"), Some(&1));

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn in_memory_files_never_touch_disk() {
    let file = JsonFile::<BTreeMap<String, u32>>::in_memory();
    file.write().await.insert("a".into(), 1);
    file.persist().await.unwrap();
    assert!(file.path().is_none());
}

fn record_aged(age: Duration) -> DeliveryRecord {
    DeliveryRecord {
        id: Uuid::new_v4(),
        feed_id: "feed".into(),
        target_id: Some("t".into()),
        article_id_hash: None,
        status: DeliveryStatus::Sent,
        created_at: Utc::now() - age,
        updated_at: None,
    }
}

#[tokio::test]
async fn expired_delivery_records_are_pruned_on_write() {
    let store = FileDeliveryRecordStore::in_memory().with_retention(Duration::days(1));
    store.insert(vec![record_aged(Duration::days(3))]).await.unwrap();
    assert_eq!(store.all().await.len(), 1);

    let fresh = record_aged(Duration::minutes(1));
    store.insert(vec![fresh.clone()]).await.unwrap();
    assert_eq!(store.all().await, vec![fresh]);
}
