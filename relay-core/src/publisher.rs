use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::delivery::RejectedCode;
use crate::error::PublishError;

/// Queue that receives "disable this target" signals.
pub const DISABLE_TARGET_QUEUE: &str = "feed.rejected-article.disable-connection";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisableTargetSignal {
    pub rejected_code: Option<RejectedCode>,
    pub target_id: String,
    pub feed_id: String,
}

impl DisableTargetSignal {
    pub fn payload(&self) -> Value {
        let mut data = json!({
            "target": { "id": self.target_id },
            "feed": { "id": self.feed_id },
        });
        if let Some(code) = self.rejected_code {
            data["rejectedCode"] = json!(code);
        }
        json!({ "data": data })
    }
}

#[async_trait]
pub trait SignalPublisher: Send + Sync {
    async fn publish(&self, queue: &str, payload: Value) -> Result<(), PublishError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedSignal {
    pub queue: String,
    pub payload: Value,
}

/// Forwards signals to an in-process receiver.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<PublishedSignal>,
}

impl ChannelPublisher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PublishedSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl SignalPublisher for ChannelPublisher {
    async fn publish(&self, queue: &str, payload: Value) -> Result<(), PublishError> {
        self.tx
            .send(PublishedSignal {
                queue: queue.to_owned(),
                payload,
            })
            .map_err(|_| PublishError::Closed)
    }
}
