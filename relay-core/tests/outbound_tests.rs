use reqwest::Client;
use relay_core::{ChannelQueue, DeliveryOutcome, JobMeta, JobSender, OutboundJob, OutboundQueue};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn job(url: String, channel: Option<&str>) -> OutboundJob {
    OutboundJob {
        url,
        method: "POST".into(),
        body: json!({ "content": "hello" }),
        meta: JobMeta {
            id: Uuid::new_v4(),
            article_id: "a".into(),
            feed_id: "feed".into(),
            medium_id: "target".into(),
            channel: channel.map(str::to_owned),
            ..JobMeta::default()
        },
    }
}

#[tokio::test]
async fn channel_jobs_are_sent_with_the_bot_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/channels/c-1/messages"))
        .and(header("authorization", "Bot secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "m-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let sender = JobSender::new(Client::new(), Some("secret".into()));
    let result = sender
        .send(job(format!("{}/channels/c-1/messages", server.uri()), Some("c-1")))
        .await;
    assert_eq!(
        result.outcome,
        DeliveryOutcome::Response { status: 200, body: json!({ "id": "m-1" }) }
    );
}

#[tokio::test]
async fn error_statuses_and_plain_bodies_are_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhooks/w/t"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Unknown Webhook"))
        .mount(&server)
        .await;

    let sender = JobSender::new(Client::new(), None);
    let result = sender.send(job(format!("{}/webhooks/w/t", server.uri()), None)).await;
    assert_eq!(
        result.outcome,
        DeliveryOutcome::Response { status: 404, body: json!("Unknown Webhook") }
    );
}

#[tokio::test]
async fn unreachable_hosts_become_errors() {
    let sender = JobSender::new(Client::new(), None);
    let result = sender.send(job("http://127.0.0.1:9/nowhere".into(), None)).await;
    assert!(matches!(result.outcome, DeliveryOutcome::Error(_)));
}

#[tokio::test]
async fn channel_queue_hands_jobs_to_the_receiver() {
    let (queue, mut rx) = ChannelQueue::new(4);
    let sent = job("http://example.com".into(), None);
    queue.enqueue(sent.clone()).await.unwrap();
    assert_eq!(rx.recv().await, Some(sent));

    drop(rx);
    assert!(queue.enqueue(job("http://example.com".into(), None)).await.is_err());
}
