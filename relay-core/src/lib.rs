pub mod article;
pub mod comparison;
pub mod config;
pub mod delivery;
pub mod delivery_record;
pub mod discord;
pub mod error;
pub mod event;
pub mod fetcher;
pub mod filters;
pub mod handler;
pub mod outbound;
pub mod parser;
pub mod publisher;
pub mod rate_limit;
pub mod storage;
pub mod template;

pub use article::{Article, FieldValue};
pub use comparison::{articles_to_deliver, ComparisonOptions, ComparisonOutcome, ComparisonStore, DateChecks, FileComparisonStore};
pub use config::WorkerConfig;
pub use delivery::{
    ArticleDeliveryState, DeliveryContext, DeliveryErrorCode, DeliveryMedium, DeliveryStatus, Dispatcher, RejectedCode,
};
pub use delivery_record::{DeliveryRecord, DeliveryRecordStore, FileDeliveryRecordStore};
pub use discord::{DiscordDetails, DiscordMedium};
pub use error::{
    EnqueueError, ExpressionError, FetchError, HandlerError, MediumError, ParseError, PublishError, StoreError,
};
pub use event::{DeliveryTarget, FeedDetails, FeedEvent, MediumKey, TargetFilters};
pub use fetcher::{FeedFetcher, FeedRequestsClient};
pub use filters::{evaluate_value, FilterExpression, References};
pub use handler::{FeedEventHandler, HandlerParts};
pub use outbound::{
    process_delivery_result, ChannelQueue, DeliveryOutcome, DeliveryResult, JobMeta, JobSender, OutboundJob,
    OutboundQueue, ProcessedDelivery,
};
pub use parser::{parse_articles, ArticleParser, FeedParser, ParseOptions};
pub use publisher::{ChannelPublisher, DisableTargetSignal, PublishedSignal, SignalPublisher, DISABLE_TARGET_QUEUE};
pub use rate_limit::{Budget, RateLimitStore, RateLimitWindow, RateLimiter, DAY_WINDOW_SECONDS};
