use std::time::Duration;

use reqwest::Client;
use relay_core::{FeedFetcher, FeedRequestsClient, FetchError};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn client_answering(response: ResponseTemplate) -> (MockServer, FeedRequestsClient) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/feed-requests"))
        .respond_with(response)
        .mount(&server)
        .await;
    let client = FeedRequestsClient::new(Client::new(), &server.uri(), Duration::from_secs(5)).unwrap();
    (server, client)
}

#[tokio::test]
async fn success_returns_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/feed-requests"))
        .and(body_json(json!({ "url": "https://example.com/feed.xml", "executeFetch": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "requestStatus": "SUCCESS",
            "response": { "body": "<rss/>", "statusCode": 200 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = FeedRequestsClient::new(Client::new(), &server.uri(), Duration::from_secs(5)).unwrap();
    let body = client.fetch("https://example.com/feed.xml").await.unwrap();
    assert_eq!(body.as_deref(), Some("<rss/>"));
}

#[tokio::test]
async fn pending_and_matched_hash_have_no_body() {
    for status in ["PENDING", "MATCHED_HASH"] {
        let (_server, client) =
            client_answering(ResponseTemplate::new(200).set_body_json(json!({ "requestStatus": status }))).await;
        assert_eq!(client.fetch("https://example.com/feed.xml").await.unwrap(), None);
    }
}

#[tokio::test]
async fn upstream_feed_failures_are_transient() {
    let (_server, client) = client_answering(ResponseTemplate::new(200).set_body_json(json!({
        "requestStatus": "BAD_STATUS_CODE",
        "response": { "statusCode": 404 }
    })))
    .await;
    let err = client.fetch("https://example.com/feed.xml").await.unwrap_err();
    assert!(matches!(err, FetchError::BadStatusCode(404)));
    assert!(err.is_transient());

    for (status, transient) in [
        ("INTERNAL_ERROR", true),
        ("PARSE_ERROR", true),
        ("FETCH_ERROR", true),
        ("FETCH_TIMEOUT", true),
        ("SOMETHING_NEW", false),
    ] {
        let (_server, client) =
            client_answering(ResponseTemplate::new(200).set_body_json(json!({ "requestStatus": status }))).await;
        let err = client.fetch("https://example.com/feed.xml").await.unwrap_err();
        assert_eq!(err.is_transient(), transient, "{status}");
    }
}

#[tokio::test]
async fn service_errors_are_raised() {
    let (_server, client) = client_answering(ResponseTemplate::new(500)).await;
    let err = client.fetch("https://example.com/feed.xml").await.unwrap_err();
    assert!(matches!(err, FetchError::ServerStatus(500)));
    assert!(!err.is_transient());

    let (_server, client) = client_answering(ResponseTemplate::new(200).set_body_string("not json")).await;
    let err = client.fetch("https://example.com/feed.xml").await.unwrap_err();
    assert!(matches!(err, FetchError::MalformedResponse(_)));
}
