use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::FetchError;

#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// `Ok(None)` means the request was accepted upstream but has no result yet.
    async fn fetch(&self, url: &str) -> Result<Option<String>, FetchError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FeedRequest<'a> {
    url: &'a str,
    execute_fetch: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedRequestResponse {
    request_status: String,
    #[serde(default)]
    response: Option<FeedResponseDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedResponseDetails {
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    status_code: Option<u16>,
}

/// Client for the service that performs (and caches) the actual feed HTTP requests.
#[derive(Debug, Clone)]
pub struct FeedRequestsClient {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl FeedRequestsClient {
    pub fn new(client: Client, host: &str, timeout: Duration) -> Result<Self, url::ParseError> {
        let endpoint = Url::parse(host)?.join("/v1/feed-requests")?;
        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }
}

#[async_trait]
impl FeedFetcher for FeedRequestsClient {
    async fn fetch(&self, url: &str) -> Result<Option<String>, FetchError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .json(&FeedRequest {
                url,
                execute_fetch: true,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::ServerStatus(status.as_u16()));
        }

        let payload: FeedRequestResponse = response
            .json()
            .await
            .map_err(|e| FetchError::MalformedResponse(e.to_string()))?;
        debug!(url, status = %payload.request_status, "feed request resolved");

        match payload.request_status.as_str() {
            "SUCCESS" => payload
                .response
                .and_then(|r| r.body)
                .map(Some)
                .ok_or_else(|| FetchError::MalformedResponse("missing response body".into())),
            "PENDING" | "MATCHED_HASH" => Ok(None),
            "INTERNAL_ERROR" => Err(FetchError::UpstreamInternal),
            "PARSE_ERROR" => Err(FetchError::UpstreamParse),
            "BAD_STATUS_CODE" => Err(FetchError::BadStatusCode(
                payload.response.and_then(|r| r.status_code).unwrap_or_default(),
            )),
            "FETCH_ERROR" => Err(FetchError::UpstreamFetch),
            "FETCH_TIMEOUT" => Err(FetchError::UpstreamTimeout),
            other => Err(FetchError::UnrecognizedStatus(other.to_owned())),
        }
    }
}
