use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, warn};

use crate::article::Article;
use crate::comparison::{articles_to_deliver, ComparisonStore};
use crate::delivery::{ArticleDeliveryState, DeliveryStatus, Dispatcher};
use crate::delivery_record::DeliveryRecordStore;
use crate::error::{HandlerError, ParseError};
use crate::event::FeedEvent;
use crate::fetcher::FeedFetcher;
use crate::outbound::{process_delivery_result, DeliveryResult, ProcessedDelivery};
use crate::parser::{ArticleParser, ParseOptions};
use crate::publisher::{DisableTargetSignal, SignalPublisher, DISABLE_TARGET_QUEUE};
use crate::rate_limit::{RateLimitWindow, DAY_WINDOW_SECONDS};

// Events flagged with `debug` log their progress at info level.
macro_rules! progress {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

pub struct HandlerParts {
    pub fetcher: Arc<dyn FeedFetcher>,
    pub parser: Arc<dyn ArticleParser>,
    pub parse_options: ParseOptions,
    pub comparisons: Arc<dyn ComparisonStore>,
    pub records: Arc<dyn DeliveryRecordStore>,
    pub dispatcher: Dispatcher,
    pub publisher: Arc<dyn SignalPublisher>,
}

/// Runs a feed event from fetch to delivery.
///
/// Nothing is retried here; errors go back to the caller, whose queue decides
/// whether the event is redelivered.
pub struct FeedEventHandler {
    fetcher: Arc<dyn FeedFetcher>,
    parser: Arc<dyn ArticleParser>,
    parse_options: ParseOptions,
    comparisons: Arc<dyn ComparisonStore>,
    records: Arc<dyn DeliveryRecordStore>,
    dispatcher: Dispatcher,
    publisher: Arc<dyn SignalPublisher>,
}

impl FeedEventHandler {
    pub fn new(parts: HandlerParts) -> Self {
        Self {
            fetcher: parts.fetcher,
            parser: parts.parser,
            parse_options: parts.parse_options,
            comparisons: parts.comparisons,
            records: parts.records,
            dispatcher: parts.dispatcher,
            publisher: parts.publisher,
        }
    }

    /// Validates a raw event and handles it. Returns the articles handed to delivery.
    pub async fn handle(&self, payload: &Value) -> Result<Vec<Article>, HandlerError> {
        let event = FeedEvent::from_value(payload)?;
        self.handle_event(&event).await
    }

    pub async fn handle_event(&self, event: &FeedEvent) -> Result<Vec<Article>, HandlerError> {
        let feed_id = event.feed.id.as_str();
        let verbose = event.debug;

        self.dispatcher
            .rate_limiter()
            .upsert_limit(
                feed_id,
                RateLimitWindow {
                    time_window_seconds: DAY_WINDOW_SECONDS,
                    limit: event.article_day_limit,
                },
            )
            .await?;

        let raw = match self.fetcher.fetch(&event.feed.url).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                progress!(verbose, feed_id, "feed request still pending upstream");
                return Ok(Vec::new());
            }
            Err(e) if e.is_transient() => {
                progress!(verbose, feed_id, error = %e, "feed fetch reported nothing to deliver");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let timeout = self.parse_options.timeout;
        let articles = match tokio::time::timeout(timeout, self.parser.parse(&raw, &self.parse_options)).await {
            Ok(parsed) => parsed?,
            Err(_) => return Err(ParseError::Timeout(timeout.as_millis()).into()),
        };
        if articles.is_empty() {
            progress!(verbose, feed_id, "feed has no articles");
            return Ok(Vec::new());
        }

        let outcome = articles_to_deliver(
            self.comparisons.as_ref(),
            feed_id,
            &articles,
            &event.comparison_options(),
        )
        .await?;
        if outcome.first_run {
            progress!(verbose, feed_id, stored = articles.len(), "initialized feed history");
            return Ok(Vec::new());
        }
        if outcome.to_deliver.is_empty() {
            progress!(verbose, feed_id, blocked = outcome.blocked.len(), "no new articles");
            return Ok(Vec::new());
        }

        let states = self.dispatcher.dispatch(event, &outcome.to_deliver).await?;
        progress!(
            verbose,
            feed_id,
            articles = outcome.to_deliver.len(),
            states = states.len(),
            "dispatched articles"
        );

        // Delivery already happened; a failure here must not trigger a retry.
        if let Err(e) = self.records.store(feed_id, &states).await {
            error!(feed_id, error = %e, "failed to store delivery records");
        }

        self.emit_disable_signals(feed_id, &states).await;
        Ok(outcome.to_deliver)
    }

    /// Forgets a deleted feed's comparison history and rate limits.
    pub async fn handle_feed_deleted(&self, feed_id: &str) -> Result<(), HandlerError> {
        self.comparisons.clear(feed_id).await?;
        self.dispatcher.rate_limiter().limits().clear(feed_id).await?;
        tracing::info!(feed_id, "cleared feed state");
        Ok(())
    }

    /// Applies the platform's answer for a queued job to its delivery record.
    pub async fn handle_delivery_result(&self, result: &DeliveryResult) -> ProcessedDelivery {
        let meta = &result.job.meta;
        let processed = process_delivery_result(result);

        match self.records.update_status(meta.id, processed.status.clone()).await {
            Ok(Some(_)) => {}
            Ok(None) => warn!(delivery_id = %meta.id, "no delivery record for result"),
            Err(e) => error!(delivery_id = %meta.id, error = %e, "failed to update delivery record"),
        }

        if let DeliveryStatus::Rejected { error_code, .. } = &processed.status {
            warn!(
                feed_id = %meta.feed_id,
                target_id = %meta.medium_id,
                code = ?error_code,
                "delivery rejected by platform"
            );
            self.publish_disable(DisableTargetSignal {
                rejected_code: processed.rejected_code,
                target_id: meta.medium_id.clone(),
                feed_id: meta.feed_id.clone(),
            })
            .await;
        }
        processed
    }

    async fn emit_disable_signals(&self, feed_id: &str, states: &[ArticleDeliveryState]) {
        let mut signalled = HashSet::new();
        for state in states {
            let DeliveryStatus::Rejected { error_code, .. } = &state.status else {
                continue;
            };
            if !signalled.insert(state.target_id.as_str()) {
                continue;
            }
            self.publish_disable(DisableTargetSignal {
                rejected_code: error_code.rejected_code(),
                target_id: state.target_id.clone(),
                feed_id: feed_id.to_owned(),
            })
            .await;
        }
    }

    async fn publish_disable(&self, signal: DisableTargetSignal) {
        if let Err(e) = self.publisher.publish(DISABLE_TARGET_QUEUE, signal.payload()).await {
            error!(
                feed_id = %signal.feed_id,
                target_id = %signal.target_id,
                error = %e,
                "failed to publish disable-target signal"
            );
        }
    }
}
