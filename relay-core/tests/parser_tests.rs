mod common;

use std::time::Duration;

use relay_core::article::digest;
use relay_core::{parse_articles, FieldValue, ParseError, ParseOptions};

fn sample_rss() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <link>http://example.com/</link>
    <description>Test description</description>
    <item>
      <title>Item 2</title>
      <link>http://example.com/2</link>
      <guid>2</guid>
      <pubDate>Mon, 21 Oct 2024 08:00:00 GMT</pubDate>
      <description>Second</description>
      <category>news</category>
      <category>tech</category>
    </item>
    <item>
      <title>Item 1</title>
      <link>http://example.com/1</link>
      <guid>1</guid>
      <pubDate>Mon, 21 Oct 2024 07:28:00 GMT</pubDate>
      <description>First</description>
    </item>
  </channel>
</rss>"#
        .to_string()
}

#[tokio::test]
async fn rss_items_keep_feed_order_and_fields() {
    let articles = parse_articles(&sample_rss(), &ParseOptions::default()).await.unwrap();
    assert_eq!(articles.len(), 2);

    let first = &articles[0];
    assert_eq!(first.id, "2");
    assert_eq!(first.id_hash, digest("2"));
    assert_eq!(first.text("title").as_deref(), Some("Item 2"));
    assert_eq!(first.text("link").as_deref(), Some("http://example.com/2"));
    assert_eq!(first.text("categories").as_deref(), Some("news,tech"));
    assert!(matches!(first.get("pubdate"), Some(FieldValue::Date(_))));
    assert_eq!(articles[1].id, "1");
}

#[tokio::test]
async fn atom_entries_are_supported() {
    let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example</title>
  <id>urn:feed</id>
  <updated>2024-10-21T08:00:00Z</updated>
  <entry>
    <title>Atom entry</title>
    <id>urn:entry:1</id>
    <link rel="alternate" href="http://example.com/atom/1"/>
    <updated>2024-10-21T08:00:00Z</updated>
    <summary>Short summary</summary>
    <author><name>Jane</name></author>
  </entry>
</feed>"#;

    let articles = parse_articles(atom, &ParseOptions::default()).await.unwrap();
    assert_eq!(articles.len(), 1);
    let entry = &articles[0];
    assert_eq!(entry.id, "urn:entry:1");
    assert_eq!(entry.text("link").as_deref(), Some("http://example.com/atom/1"));
    assert_eq!(entry.text("summary").as_deref(), Some("Short summary"));
    assert_eq!(entry.text("description").as_deref(), Some("Short summary"));
    assert_eq!(entry.text("author").as_deref(), Some("Jane"));
    assert!(matches!(entry.get("updated"), Some(FieldValue::Date(_))));
}

#[tokio::test]
async fn ids_fall_back_to_link_then_content_hash() {
    let by_link = r#"<rss version="2.0"><channel><title>T</title><link>http://e/</link><description>d</description>
        <item><title>A</title><link>http://e/a</link><guid>g-a</guid></item>
        <item><title>B</title><link>http://e/b</link></item>
    </channel></rss>"#;
    let articles = parse_articles(by_link, &ParseOptions::default()).await.unwrap();
    let ids: Vec<&str> = articles.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["http://e/a", "http://e/b"]);

    let bare = r#"<rss version="2.0"><channel><title>T</title><link>http://e/</link><description>d</description>
        <item><title>A</title><description>one</description></item>
        <item><title>B</title><description>two</description></item>
    </channel></rss>"#;
    let articles = parse_articles(bare, &ParseOptions::default()).await.unwrap();
    assert_eq!(articles[0].id, digest("Aone"));
    assert_eq!(articles[1].id, digest("Btwo"));
}

#[tokio::test]
async fn non_feeds_are_rejected() {
    let err = parse_articles("<html><body>nope</body></html>", &ParseOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ParseError::InvalidFeed));

    let options = ParseOptions {
        timeout: Duration::from_secs(5),
    };
    assert!(matches!(
        parse_articles("", &options).await.unwrap_err(),
        ParseError::InvalidFeed
    ));
}

#[tokio::test]
async fn empty_channel_has_no_articles() {
    let empty = r#"<rss version="2.0"><channel><title>T</title><link>http://e/</link><description>d</description></channel></rss>"#;
    assert!(parse_articles(empty, &ParseOptions::default()).await.unwrap().is_empty());
}

fn html_feed() -> &'static str {
    r#"<rss version="2.0"><channel><title>T</title><link>http://e/</link><description>d</description>
        <item>
          <title>Tom &amp; Jerry</title>
          <guid>h-1</guid>
          <description><![CDATA[<p>Hello <b>world</b></p><img src="x.png"/>]]></description>
        </item>
    </channel></rss>"#
}

#[tokio::test]
async fn html_fields_become_plain_text() {
    let articles = parse_articles(html_feed(), &ParseOptions::default()).await.unwrap();
    let description = articles[0].text("description").unwrap();
    assert!(description.contains("Hello world"), "{description:?}");
    assert!(!description.contains('<'), "{description:?}");
    assert_eq!(articles[0].text("title").as_deref(), Some("Tom & Jerry"));
    assert_eq!(articles[0].text("guid").as_deref(), Some("h-1"));
}

#[tokio::test]
async fn html_is_stripped_before_it_reaches_a_discord_body() {
    use std::sync::Arc;

    use relay_core::{DeliveryContext, DeliveryMedium, DiscordMedium, FeedEvent};
    use serde_json::json;

    let articles = parse_articles(html_feed(), &ParseOptions::default()).await.unwrap();
    let queue = Arc::new(common::RecordingQueue::default());
    let medium = DiscordMedium::with_api_base(queue.clone(), "https://discord.test/api/");
    let ev = FeedEvent::from_value(&common::event_value(
        "feed-1",
        json!([{ "id": "m", "key": "discord", "details": { "channel": { "id": "c" }, "content": "{{description}}" } }]),
    ))
    .unwrap();
    let ctx = DeliveryContext {
        target: &ev.mediums[0],
        feed_id: &ev.feed.id,
        feed_url: &ev.feed.url,
    };
    medium.send(&articles[0], &ctx).await.unwrap();

    let jobs = queue.jobs.lock().unwrap();
    let content = jobs[0].body["content"].as_str().unwrap();
    assert!(content.starts_with("Hello world"), "{content:?}");
    assert!(!content.contains("<p>") && !content.contains("<img"), "{content:?}");
}

#[tokio::test]
async fn slow_parses_time_out() {
    let items: Vec<(String, String)> = (0..20_000).map(|i| (i.to_string(), format!("Item {i}"))).collect();
    let items: Vec<(&str, &str)> = items.iter().map(|(g, t)| (g.as_str(), t.as_str())).collect();
    let feed = common::rss_feed(&items);

    let options = ParseOptions {
        timeout: Duration::from_millis(1),
    };
    let err = parse_articles(&feed, &options).await.unwrap_err();
    assert!(matches!(err, ParseError::Timeout(1)), "{err:?}");
}
