use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::delivery_record::DeliveryRecordStore;
use crate::error::StoreError;
use crate::storage::JsonFile;

/// Window used for a feed's daily article limit.
pub const DAY_WINDOW_SECONDS: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitWindow {
    pub time_window_seconds: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub remaining: i64,
}

/// Configured windows per feed, one row per window size.
#[derive(Debug, Clone)]
pub struct RateLimitStore {
    data: JsonFile<HashMap<String, Vec<RateLimitWindow>>>,
}

impl RateLimitStore {
    pub fn in_memory() -> Self {
        Self {
            data: JsonFile::in_memory(),
        }
    }

    pub async fn load_from(path: impl AsRef<Path>) -> Self {
        Self {
            data: JsonFile::load_from(path).await,
        }
    }

    pub async fn upsert(&self, feed_id: &str, window: RateLimitWindow) -> Result<(), StoreError> {
        {
            let mut data = self.data.write().await;
            let rows = data.entry(feed_id.to_owned()).or_default();
            match rows
                .iter_mut()
                .find(|r| r.time_window_seconds == window.time_window_seconds)
            {
                Some(row) if row.limit == window.limit => return Ok(()),
                Some(row) => row.limit = window.limit,
                None => rows.push(window),
            }
        }
        self.data.persist().await
    }

    pub async fn windows(&self, feed_id: &str) -> Vec<RateLimitWindow> {
        self.data
            .read()
            .await
            .get(feed_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn clear(&self, feed_id: &str) -> Result<(), StoreError> {
        let removed = self.data.write().await.remove(feed_id).is_some();
        if removed {
            self.data.persist().await?;
        }
        Ok(())
    }
}

/// Sliding-window budget over the delivery records.
#[derive(Clone)]
pub struct RateLimiter {
    limits: RateLimitStore,
    records: Arc<dyn DeliveryRecordStore>,
}

impl RateLimiter {
    pub fn new(limits: RateLimitStore, records: Arc<dyn DeliveryRecordStore>) -> Self {
        Self { limits, records }
    }

    pub fn limits(&self) -> &RateLimitStore {
        &self.limits
    }

    pub async fn upsert_limit(&self, feed_id: &str, window: RateLimitWindow) -> Result<(), StoreError> {
        self.limits.upsert(feed_id, window).await
    }

    /// Smallest `limit - deliveries` over the feed's windows, never below zero.
    /// A feed without windows is unlimited.
    pub async fn remaining_budget(&self, feed_id: &str) -> Result<Budget, StoreError> {
        let windows = self.limits.windows(feed_id).await;
        let mut remaining = i64::MAX;
        for window in windows {
            let used = self
                .records
                .count_deliveries_in_window(feed_id, window.time_window_seconds)
                .await?;
            remaining = remaining.min((window.limit - used).max(0));
        }
        debug!(feed_id, remaining, "computed remaining delivery budget");
        Ok(Budget { remaining })
    }

    /// Budget for one delivery target over its own windows.
    pub async fn remaining_target_budget(
        &self,
        target_id: &str,
        windows: &[RateLimitWindow],
    ) -> Result<Budget, StoreError> {
        let mut remaining = i64::MAX;
        for window in windows {
            let used = self
                .records
                .count_target_deliveries_in_window(target_id, window.time_window_seconds)
                .await?;
            remaining = remaining.min((window.limit - used).max(0));
        }
        if !windows.is_empty() {
            debug!(target_id, remaining, "computed remaining target budget");
        }
        Ok(Budget { remaining })
    }
}
