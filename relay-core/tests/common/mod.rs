#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use relay_core::{
    Article, ArticleDeliveryState, DeliveryContext, DeliveryMedium, DeliveryRecordStore, DeliveryStatus, FeedEvent,
    FeedFetcher, FetchError, MediumError, OutboundJob, OutboundQueue, EnqueueError, StoreError,
};
use serde_json::{json, Value};
use uuid::Uuid;

pub fn event_value(feed_id: &str, mediums: Value) -> Value {
    json!({
        "feed": { "id": feed_id, "url": "https://example.com/feed.xml" },
        "mediums": mediums,
        "articleDayLimit": 100
    })
}

pub fn discord_target(id: &str) -> Value {
    json!({ "id": id, "key": "discord", "details": { "guildId": "guild-1", "channel": { "id": format!("chan-{id}") } } })
}

pub fn event(feed_id: &str, target_ids: &[&str]) -> FeedEvent {
    let mediums: Vec<Value> = target_ids.iter().map(|id| discord_target(id)).collect();
    FeedEvent::from_value(&event_value(feed_id, Value::Array(mediums))).unwrap()
}

pub fn article(id: &str, title: &str) -> Article {
    Article::from_pairs(id, [("title", title), ("description", "body"), ("link", "https://example.com/a")])
}

pub fn rss_feed(items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(guid, title)| {
            format!(
                "<item><title>{title}</title><link>https://example.com/{guid}</link><guid>{guid}</guid><description>about {title}</description></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>Test</title><link>https://example.com/</link><description>Test feed</description>{items}</channel></rss>"#
    )
}

/// Returns whatever is currently set as the feed body.
#[derive(Default)]
pub struct StaticFetcher {
    pub body: Mutex<Option<String>>,
    pub error: Mutex<Option<fn() -> FetchError>>,
}

impl StaticFetcher {
    pub fn with_body(body: String) -> Self {
        Self {
            body: Mutex::new(Some(body)),
            error: Mutex::new(None),
        }
    }

    pub fn set_body(&self, body: String) {
        *self.body.lock().unwrap() = Some(body);
    }

    pub fn fail_with(&self, make: fn() -> FetchError) {
        *self.error.lock().unwrap() = Some(make);
    }
}

#[async_trait]
impl FeedFetcher for StaticFetcher {
    async fn fetch(&self, _url: &str) -> Result<Option<String>, FetchError> {
        if let Some(make) = *self.error.lock().unwrap() {
            return Err(make());
        }
        Ok(self.body.lock().unwrap().clone())
    }
}

/// Records every send and answers with a fixed status, or fails for chosen articles.
pub struct RecordingMedium {
    pub calls: Mutex<Vec<(String, String)>>,
    pub status: DeliveryStatus,
    pub fail_article: Option<String>,
}

impl RecordingMedium {
    pub fn returning(status: DeliveryStatus) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            status,
            fail_article: None,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl DeliveryMedium for RecordingMedium {
    async fn send(&self, article: &Article, ctx: &DeliveryContext<'_>) -> Result<Vec<ArticleDeliveryState>, MediumError> {
        self.calls
            .lock()
            .unwrap()
            .push((ctx.target.id.clone(), article.id.clone()));
        if self.fail_article.as_deref() == Some(article.id.as_str()) {
            return Err(MediumError::Other("medium exploded".into()));
        }
        Ok(vec![ArticleDeliveryState::new(&ctx.target.id, article, self.status.clone())])
    }
}

#[derive(Default)]
pub struct RecordingQueue {
    pub jobs: Mutex<Vec<OutboundJob>>,
}

#[async_trait]
impl OutboundQueue for RecordingQueue {
    async fn enqueue(&self, job: OutboundJob) -> Result<(), EnqueueError> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

/// Delivery record store whose writes always fail.
pub struct BrokenRecordStore;

#[async_trait]
impl DeliveryRecordStore for BrokenRecordStore {
    async fn store(&self, _feed_id: &str, _states: &[ArticleDeliveryState]) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk on fire".into()))
    }

    async fn count_deliveries_in_window(&self, _feed_id: &str, _window_seconds: i64) -> Result<i64, StoreError> {
        Ok(0)
    }

    async fn count_target_deliveries_in_window(&self, _target_id: &str, _window_seconds: i64) -> Result<i64, StoreError> {
        Ok(0)
    }

    async fn update_status(
        &self,
        _id: Uuid,
        _status: DeliveryStatus,
    ) -> Result<Option<relay_core::DeliveryRecord>, StoreError> {
        Err(StoreError::Unavailable("disk on fire".into()))
    }

    async fn find(&self, _id: Uuid) -> Result<Option<relay_core::DeliveryRecord>, StoreError> {
        Ok(None)
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}

pub fn temp_dir(prefix: &str) -> std::path::PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "{prefix}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    dir
}
