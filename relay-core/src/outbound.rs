use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::delivery::{DeliveryErrorCode, DeliveryStatus, RejectedCode};
use crate::error::EnqueueError;

/// Correlation data carried with each job back to the result consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMeta {
    pub id: Uuid,
    #[serde(rename = "articleID")]
    pub article_id: String,
    pub article_id_hash: String,
    #[serde(rename = "feedURL")]
    pub feed_url: String,
    pub feed_id: String,
    pub guild_id: Option<String>,
    pub medium_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundJob {
    pub url: String,
    pub method: String,
    pub body: Value,
    pub meta: JobMeta,
}

#[async_trait]
pub trait OutboundQueue: Send + Sync {
    async fn enqueue(&self, job: OutboundJob) -> Result<(), EnqueueError>;
}

/// Bounded in-process queue. The receiving half is drained by a sender task.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    tx: mpsc::Sender<OutboundJob>,
}

impl ChannelQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundJob>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl OutboundQueue for ChannelQueue {
    async fn enqueue(&self, job: OutboundJob) -> Result<(), EnqueueError> {
        self.tx.send(job).await.map_err(|_| EnqueueError::Closed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Response { status: u16, body: Value },
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResult {
    pub job: OutboundJob,
    pub outcome: DeliveryOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedDelivery {
    pub status: DeliveryStatus,
    pub rejected_code: Option<RejectedCode>,
}

/// Maps a platform response onto a final delivery status.
pub fn process_delivery_result(result: &DeliveryResult) -> ProcessedDelivery {
    let (status, body) = match &result.outcome {
        DeliveryOutcome::Error(message) => {
            return ProcessedDelivery {
                status: DeliveryStatus::failed(DeliveryErrorCode::Internal, message.clone()),
                rejected_code: None,
            }
        }
        DeliveryOutcome::Response { status, body } => (*status, body),
    };

    let status = match status {
        400 => DeliveryStatus::rejected(
            DeliveryErrorCode::ThirdPartyBadRequest,
            format!("Body: {body}, Request Body: {}", result.job.body),
        ),
        403 => DeliveryStatus::rejected(DeliveryErrorCode::ThirdPartyForbidden, format!("Body: {body}")),
        404 => DeliveryStatus::rejected(DeliveryErrorCode::ThirdPartyNotFound, format!("Body: {body}")),
        s if s >= 500 => DeliveryStatus::failed(DeliveryErrorCode::ThirdPartyInternal, format!("Body: {body}")),
        s if !(200..=400).contains(&s) => DeliveryStatus::failed(
            DeliveryErrorCode::Internal,
            format!("Unhandled status code {s} received. Body: {body}"),
        ),
        _ => DeliveryStatus::Sent,
    };

    let rejected_code = match &status {
        DeliveryStatus::Rejected { error_code, .. } => error_code.rejected_code(),
        _ => None,
    };
    ProcessedDelivery { status, rejected_code }
}

/// Performs queued jobs against the platform API.
#[derive(Debug, Clone)]
pub struct JobSender {
    client: Client,
    bot_token: Option<String>,
}

impl JobSender {
    pub fn new(client: Client, bot_token: Option<String>) -> Self {
        Self { client, bot_token }
    }

    pub async fn send(&self, job: OutboundJob) -> DeliveryResult {
        let outcome = self.perform(&job).await;
        DeliveryResult { job, outcome }
    }

    async fn perform(&self, job: &OutboundJob) -> DeliveryOutcome {
        let method = match Method::from_bytes(job.method.as_bytes()) {
            Ok(m) => m,
            Err(e) => return DeliveryOutcome::Error(format!("invalid method {:?}: {e}", job.method)),
        };
        let mut request = self.client.request(method, &job.url).json(&job.body);
        // Webhook URLs carry their own token.
        if job.meta.channel.is_some() {
            if let Some(token) = &self.bot_token {
                request = request.header(reqwest::header::AUTHORIZATION, format!("Bot {token}"));
            }
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let text = response.text().await.unwrap_or_default();
                let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
                debug!(delivery_id = %job.meta.id, status, "outbound request completed");
                DeliveryOutcome::Response { status, body }
            }
            Err(e) => DeliveryOutcome::Error(e.to_string()),
        }
    }
}
