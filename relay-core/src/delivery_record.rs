use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::delivery::{ArticleDeliveryState, DeliveryStatus};
use crate::error::StoreError;
use crate::storage::JsonFile;

/// One delivery attempt outcome for an article and target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub feed_id: String,
    pub target_id: Option<String>,
    pub article_id_hash: Option<String>,
    #[serde(flatten)]
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DeliveryRecord {
    pub fn from_state(feed_id: &str, state: &ArticleDeliveryState) -> Self {
        Self {
            id: state.id,
            feed_id: feed_id.to_owned(),
            target_id: Some(state.target_id.clone()),
            article_id_hash: Some(state.article_id_hash.clone()),
            status: state.status.clone(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

#[async_trait]
pub trait DeliveryRecordStore: Send + Sync {
    async fn store(&self, feed_id: &str, states: &[ArticleDeliveryState]) -> Result<(), StoreError>;

    /// Sent and rejected deliveries for the feed created within the last `window_seconds`.
    async fn count_deliveries_in_window(&self, feed_id: &str, window_seconds: i64) -> Result<i64, StoreError>;

    /// Same count, scoped to one delivery target across all feeds.
    async fn count_target_deliveries_in_window(&self, target_id: &str, window_seconds: i64) -> Result<i64, StoreError>;

    /// Returns the updated record, or `None` if no record has that id.
    async fn update_status(&self, id: Uuid, status: DeliveryStatus) -> Result<Option<DeliveryRecord>, StoreError>;

    async fn find(&self, id: Uuid) -> Result<Option<DeliveryRecord>, StoreError>;
}

/// Records older than this are dropped on the next write.
pub const DEFAULT_RECORD_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct FileDeliveryRecordStore {
    data: JsonFile<Vec<DeliveryRecord>>,
    retention: Duration,
}

impl FileDeliveryRecordStore {
    pub fn in_memory() -> Self {
        Self {
            data: JsonFile::in_memory(),
            retention: Duration::days(DEFAULT_RECORD_RETENTION_DAYS),
        }
    }

    pub async fn load_from(path: impl AsRef<Path>) -> Self {
        Self {
            data: JsonFile::load_from(path).await,
            retention: Duration::days(DEFAULT_RECORD_RETENTION_DAYS),
        }
    }

    /// Keep this at least as long as the largest rate-limit window.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Inserts pre-built records; lets callers backdate history.
    pub async fn insert(&self, records: Vec<DeliveryRecord>) -> Result<(), StoreError> {
        {
            let cutoff = Utc::now() - self.retention;
            let mut data = self.data.write().await;
            let before = data.len();
            data.retain(|r| r.created_at >= cutoff);
            if data.len() < before {
                debug!(dropped = before - data.len(), "pruned expired delivery records");
            }
            data.extend(records);
        }
        self.data.persist().await
    }

    pub async fn all(&self) -> Vec<DeliveryRecord> {
        self.data.read().await.clone()
    }

    async fn count_since(&self, window_seconds: i64, scope: impl Fn(&DeliveryRecord) -> bool) -> i64 {
        let since = Utc::now() - Duration::seconds(window_seconds);
        let data = self.data.read().await;
        data.iter()
            .filter(|r| scope(*r) && r.created_at >= since && r.status.counts_against_limit())
            .count() as i64
    }
}

#[async_trait]
impl DeliveryRecordStore for FileDeliveryRecordStore {
    async fn store(&self, feed_id: &str, states: &[ArticleDeliveryState]) -> Result<(), StoreError> {
        if states.is_empty() {
            return Ok(());
        }
        let records = states
            .iter()
            .map(|s| DeliveryRecord::from_state(feed_id, s))
            .collect();
        self.insert(records).await
    }

    async fn count_deliveries_in_window(&self, feed_id: &str, window_seconds: i64) -> Result<i64, StoreError> {
        Ok(self.count_since(window_seconds, |r| r.feed_id == feed_id).await)
    }

    async fn count_target_deliveries_in_window(&self, target_id: &str, window_seconds: i64) -> Result<i64, StoreError> {
        Ok(self
            .count_since(window_seconds, |r| r.target_id.as_deref() == Some(target_id))
            .await)
    }

    async fn update_status(&self, id: Uuid, status: DeliveryStatus) -> Result<Option<DeliveryRecord>, StoreError> {
        let updated = {
            let mut data = self.data.write().await;
            match data.iter_mut().find(|r| r.id == id) {
                Some(record) => {
                    record.status = status;
                    record.updated_at = Some(Utc::now());
                    Some(record.clone())
                }
                None => None,
            }
        };
        if updated.is_some() {
            self.data.persist().await?;
        }
        Ok(updated)
    }

    async fn find(&self, id: Uuid) -> Result<Option<DeliveryRecord>, StoreError> {
        Ok(self.data.read().await.iter().find(|r| r.id == id).cloned())
    }
}
