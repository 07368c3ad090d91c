use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("feed request service responded with status {0}")]
    ServerStatus(u16),
    #[error("upstream reported an internal error")]
    UpstreamInternal,
    #[error("upstream failed to parse the feed")]
    UpstreamParse,
    #[error("feed responded with bad status code {0}")]
    BadStatusCode(u16),
    #[error("upstream failed to fetch the feed")]
    UpstreamFetch,
    #[error("upstream fetch timed out")]
    UpstreamTimeout,
    #[error("unrecognized request status {0:?}")]
    UnrecognizedStatus(String),
    #[error("malformed feed request response: {0}")]
    MalformedResponse(String),
}

impl FetchError {
    /// Errors reported by the upstream about the feed itself. These mean there is
    /// nothing to deliver this cycle rather than a failed request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::UpstreamInternal
                | FetchError::UpstreamParse
                | FetchError::BadStatusCode(_)
                | FetchError::UpstreamFetch
                | FetchError::UpstreamTimeout
        )
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("feed parsing timed out after {0} ms")]
    Timeout(u128),
    #[error("not a feed")]
    InvalidFeed,
    #[error("parser task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("invalid expression: {0}")]
    InvalidExpression(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("outbound queue closed")]
    Closed,
    #[error("failed to build outbound request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("signal channel closed")]
    Closed,
}

/// Failure of a single medium send. The dispatcher turns these into failed states.
#[derive(Debug, Error)]
pub enum MediumError {
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid feed event: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
