use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DELIVER_ARTICLES_QUEUE: &str = "feed.deliver-articles";
pub const FEED_DELETED_QUEUE: &str = "feed.deleted";

/// One line of stdin or stdout: a queue name and the message body as published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub queue: String,
    pub message: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    DeliverArticles(Value),
    FeedDeleted { feed_id: String },
}

#[derive(Debug, Error)]
pub enum InboundError {
    #[error("invalid envelope: {0}")]
    Envelope(#[from] serde_json::Error),
    #[error("unknown queue {0:?}")]
    UnknownQueue(String),
    #[error("feed.deleted message has no feed id")]
    MissingFeedId,
}

impl InboundMessage {
    pub fn from_line(line: &str) -> Result<Self, InboundError> {
        let envelope: Envelope = serde_json::from_str(line)?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self, InboundError> {
        match envelope.queue.as_str() {
            DELIVER_ARTICLES_QUEUE => Ok(Self::DeliverArticles(envelope.message)),
            FEED_DELETED_QUEUE => {
                let body = envelope.message.get("data").unwrap_or(&envelope.message);
                body.pointer("/feed/id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .map(|id| Self::FeedDeleted { feed_id: id.to_owned() })
                    .ok_or(InboundError::MissingFeedId)
            }
            other => Err(InboundError::UnknownQueue(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_by_queue_name() {
        let msg = InboundMessage::from_line(
            r#"{"queue":"feed.deliver-articles","message":{"data":{"feed":{"id":"f"}}}}"#,
        )
        .unwrap();
        assert!(matches!(msg, InboundMessage::DeliverArticles(ref v) if v["data"]["feed"]["id"] == "f"));

        let msg = InboundMessage::from_line(r#"{"queue":"feed.deleted","message":{"data":{"feed":{"id":"f"}}}}"#)
            .unwrap();
        assert_eq!(msg, InboundMessage::FeedDeleted { feed_id: "f".into() });
    }

    #[test]
    fn rejects_unknown_or_incomplete_messages() {
        assert!(matches!(
            InboundMessage::from_line(r#"{"queue":"other","message":{}}"#),
            Err(InboundError::UnknownQueue(_))
        ));
        assert!(matches!(
            InboundMessage::from_line(r#"{"queue":"feed.deleted","message":{"feed":{}}}"#),
            Err(InboundError::MissingFeedId)
        ));
        assert!(matches!(InboundMessage::from_line("nope"), Err(InboundError::Envelope(_))));
    }
}
