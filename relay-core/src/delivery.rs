use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::article::Article;
use crate::error::{MediumError, StoreError};
use crate::event::{DeliveryTarget, FeedEvent, MediumKey};
use crate::filters::{FilterExpression, References};
use crate::rate_limit::RateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryErrorCode {
    #[serde(rename = "user-feeds/internal-error")]
    Internal,
    #[serde(rename = "user-feeds/no-channel-or-webhook")]
    NoChannelOrWebhook,
    #[serde(rename = "user-feeds/third-party-internal")]
    ThirdPartyInternal,
    #[serde(rename = "user-feeds/third-party-bad-request")]
    ThirdPartyBadRequest,
    #[serde(rename = "user-feeds/third-party-forbidden")]
    ThirdPartyForbidden,
    #[serde(rename = "user-feeds/third-party-not-found")]
    ThirdPartyNotFound,
}

impl DeliveryErrorCode {
    /// Code sent with the disable-target signal for rejections.
    pub fn rejected_code(self) -> Option<RejectedCode> {
        match self {
            DeliveryErrorCode::ThirdPartyBadRequest => Some(RejectedCode::BadRequest),
            DeliveryErrorCode::ThirdPartyForbidden => Some(RejectedCode::Forbidden),
            DeliveryErrorCode::ThirdPartyNotFound => Some(RejectedCode::MediumNotFound),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectedCode {
    #[serde(rename = "user-feeds/bad-request")]
    BadRequest,
    #[serde(rename = "user-feeds/forbidden")]
    Forbidden,
    #[serde(rename = "user-feeds/medium-not-found")]
    MediumNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum DeliveryStatus {
    PendingDelivery,
    Sent,
    #[serde(rename_all = "camelCase")]
    Failed {
        error_code: DeliveryErrorCode,
        internal_message: String,
    },
    #[serde(rename_all = "camelCase")]
    Rejected {
        error_code: DeliveryErrorCode,
        internal_message: String,
    },
    RateLimited,
    /// The target's own limits are spent; the feed still had budget.
    MediumRateLimitedByUser,
    FilteredOut,
}

impl DeliveryStatus {
    pub fn failed(error_code: DeliveryErrorCode, message: impl Into<String>) -> Self {
        DeliveryStatus::Failed {
            error_code,
            internal_message: message.into(),
        }
    }

    pub fn rejected(error_code: DeliveryErrorCode, message: impl Into<String>) -> Self {
        DeliveryStatus::Rejected {
            error_code,
            internal_message: message.into(),
        }
    }

    /// Handed to the platform or its outbound queue.
    pub fn is_accepted(&self) -> bool {
        matches!(self, DeliveryStatus::PendingDelivery | DeliveryStatus::Sent)
    }

    /// Only definitive platform answers consume rate-limit budget.
    pub fn counts_against_limit(&self) -> bool {
        matches!(self, DeliveryStatus::Sent | DeliveryStatus::Rejected { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeliveryStatus::PendingDelivery => "pending-delivery",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed { .. } => "failed",
            DeliveryStatus::Rejected { .. } => "rejected",
            DeliveryStatus::RateLimited => "rate-limited",
            DeliveryStatus::MediumRateLimitedByUser => "medium-rate-limited-by-user",
            DeliveryStatus::FilteredOut => "filtered-out",
        }
    }
}

/// Outcome of one article for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleDeliveryState {
    pub id: Uuid,
    pub target_id: String,
    pub article_id: String,
    pub article_id_hash: String,
    pub status: DeliveryStatus,
}

impl ArticleDeliveryState {
    pub fn new(target_id: &str, article: &Article, status: DeliveryStatus) -> Self {
        Self::with_id(Uuid::new_v4(), target_id, article, status)
    }

    pub fn with_id(id: Uuid, target_id: &str, article: &Article, status: DeliveryStatus) -> Self {
        Self {
            id,
            target_id: target_id.to_owned(),
            article_id: article.id.clone(),
            article_id_hash: article.id_hash.clone(),
            status,
        }
    }
}

pub struct DeliveryContext<'a> {
    pub target: &'a DeliveryTarget,
    pub feed_id: &'a str,
    pub feed_url: &'a str,
}

/// A platform integration that turns an article into outbound requests.
#[async_trait]
pub trait DeliveryMedium: Send + Sync {
    async fn send(&self, article: &Article, ctx: &DeliveryContext<'_>) -> Result<Vec<ArticleDeliveryState>, MediumError>;
}

/// Fans articles out to every target of an event.
///
/// Pairs are visited targets first, then articles, one at a time. The remaining
/// budget is a local counter for the whole event, so two workers handling the
/// same feed concurrently can each spend the full budget. Targets with their
/// own rate limits get a second counter, reset per target.
pub struct Dispatcher {
    rate_limiter: RateLimiter,
    mediums: HashMap<MediumKey, Arc<dyn DeliveryMedium>>,
}

impl Dispatcher {
    pub fn new(rate_limiter: RateLimiter) -> Self {
        Self {
            rate_limiter,
            mediums: HashMap::new(),
        }
    }

    pub fn with_medium(mut self, key: MediumKey, medium: Arc<dyn DeliveryMedium>) -> Self {
        self.mediums.insert(key, medium);
        self
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub async fn dispatch(&self, event: &FeedEvent, articles: &[Article]) -> Result<Vec<ArticleDeliveryState>, StoreError> {
        let budget = self.rate_limiter.remaining_budget(&event.feed.id).await?;
        Ok(self.dispatch_with_budget(event, articles, budget.remaining).await)
    }

    pub async fn dispatch_with_budget(
        &self,
        event: &FeedEvent,
        articles: &[Article],
        mut remaining: i64,
    ) -> Vec<ArticleDeliveryState> {
        let mut states = Vec::with_capacity(event.mediums.len() * articles.len());

        for target in &event.mediums {
            let mut remaining_in_target = match self
                .rate_limiter
                .remaining_target_budget(&target.id, &target.rate_limits)
                .await
            {
                Ok(budget) => budget.remaining,
                Err(e) => {
                    error!(target_id = %target.id, error = %e, "failed to read target rate limits");
                    for article in articles {
                        states.push(ArticleDeliveryState::new(
                            &target.id,
                            article,
                            DeliveryStatus::failed(DeliveryErrorCode::Internal, e.to_string()),
                        ));
                    }
                    continue;
                }
            };
            let filter = target
                .filter_expression()
                .filter(|v| !v.is_null())
                .map(FilterExpression::from_value)
                .transpose();
            let ctx = DeliveryContext {
                target,
                feed_id: &event.feed.id,
                feed_url: &event.feed.url,
            };

            for article in articles {
                if remaining <= 0 {
                    states.push(ArticleDeliveryState::new(&target.id, article, DeliveryStatus::RateLimited));
                    continue;
                }
                if remaining_in_target <= 0 {
                    states.push(ArticleDeliveryState::new(
                        &target.id,
                        article,
                        DeliveryStatus::MediumRateLimitedByUser,
                    ));
                    continue;
                }

                let passes = match &filter {
                    Ok(None) => true,
                    Ok(Some(expr)) => expr.evaluate(&References::for_article(article)),
                    Err(e) => {
                        warn!(target_id = %target.id, error = %e, "invalid filter expression");
                        states.push(ArticleDeliveryState::new(
                            &target.id,
                            article,
                            DeliveryStatus::failed(DeliveryErrorCode::Internal, e.to_string()),
                        ));
                        continue;
                    }
                };
                if !passes {
                    debug!(target_id = %target.id, article_id = %article.id, "article filtered out");
                    states.push(ArticleDeliveryState::new(&target.id, article, DeliveryStatus::FilteredOut));
                    continue;
                }

                let Some(medium) = self.mediums.get(&target.key) else {
                    states.push(ArticleDeliveryState::new(
                        &target.id,
                        article,
                        DeliveryStatus::failed(
                            DeliveryErrorCode::Internal,
                            format!("no medium registered for {:?}", target.key),
                        ),
                    ));
                    continue;
                };

                match medium.send(article, &ctx).await {
                    Ok(sent) => {
                        if sent.iter().any(|s| s.status.is_accepted()) {
                            remaining -= 1;
                            remaining_in_target -= 1;
                        }
                        states.extend(sent);
                    }
                    Err(e) => {
                        error!(
                            feed_id = %event.feed.id,
                            target_id = %target.id,
                            article_id = %article.id,
                            error = %e,
                            "failed to deliver article"
                        );
                        states.push(ArticleDeliveryState::new(
                            &target.id,
                            article,
                            DeliveryStatus::failed(DeliveryErrorCode::Internal, e.to_string()),
                        ));
                    }
                }
            }
        }

        states
    }
}
