use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use html2text::render::text_renderer::TrivialDecorator;
use tracing::{debug, warn};

use crate::article::{digest, parse_date, Article, FieldValue};
use crate::error::ParseError;

const ID_CANDIDATES: [&str; 2] = ["guid", "link"];

// Wide enough that html2text never wraps a line on its own.
const TEXT_WIDTH: usize = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    pub timeout: Duration,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10_000),
        }
    }
}

#[async_trait]
pub trait ArticleParser: Send + Sync {
    async fn parse(&self, raw: &str, options: &ParseOptions) -> Result<Vec<Article>, ParseError>;
}

/// RSS 2.0 with an Atom fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedParser;

#[async_trait]
impl ArticleParser for FeedParser {
    async fn parse(&self, raw: &str, options: &ParseOptions) -> Result<Vec<Article>, ParseError> {
        parse_articles(raw, options).await
    }
}

/// Parses on the blocking pool. On timeout the caller gets `ParseError::Timeout`
/// right away, but the blocking task is not cancelled and runs to completion.
pub async fn parse_articles(raw: &str, options: &ParseOptions) -> Result<Vec<Article>, ParseError> {
    let raw = raw.to_owned();
    let task = tokio::task::spawn_blocking(move || parse_sync(&raw));
    match tokio::time::timeout(options.timeout, task).await {
        Ok(joined) => joined?,
        Err(_) => Err(ParseError::Timeout(options.timeout.as_millis())),
    }
}

type Fields = BTreeMap<String, FieldValue>;

fn parse_sync(raw: &str) -> Result<Vec<Article>, ParseError> {
    let items: Vec<Fields> = if let Ok(channel) = rss::Channel::read_from(raw.as_bytes()) {
        channel.items().iter().map(rss_fields).collect()
    } else if let Ok(feed) = atom_syndication::Feed::read_from(raw.as_bytes()) {
        feed.entries().iter().map(atom_fields).collect()
    } else {
        return Err(ParseError::InvalidFeed);
    };
    debug!(count = items.len(), "parsed feed items");
    Ok(resolve_ids(items))
}

fn insert_text(fields: &mut Fields, name: &str, value: Option<&str>) {
    if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
        fields.insert(name.to_owned(), FieldValue::Text(v.to_owned()));
    }
}

/// Markup fields are stored as plain text so filters and templates never see tags.
fn insert_html(fields: &mut Fields, name: &str, value: Option<&str>) {
    let Some(value) = value else {
        return;
    };
    if !value.contains('<') && !value.contains('&') {
        insert_text(fields, name, Some(value));
        return;
    }
    let text = html_to_text(value);
    insert_text(fields, name, Some(&text));
}

fn html_to_text(html: &str) -> String {
    let text = html2text::from_read_with_decorator(html.as_bytes(), TEXT_WIDTH, TrivialDecorator::new());
    text.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

fn insert_date(fields: &mut Fields, name: &str, value: Option<DateTime<Utc>>) {
    if let Some(d) = value {
        fields.insert(name.to_owned(), FieldValue::Date(d));
    }
}

fn rss_fields(item: &rss::Item) -> Fields {
    let mut fields = Fields::new();
    insert_html(&mut fields, "title", item.title());
    insert_text(&mut fields, "link", item.link());
    insert_html(&mut fields, "description", item.description());
    insert_text(&mut fields, "comments", item.comments());
    insert_html(&mut fields, "content", item.content());
    insert_text(&mut fields, "guid", item.guid().map(|g| g.value()));

    let author = item
        .author()
        .map(ToOwned::to_owned)
        .or_else(|| item.dublin_core_ext().and_then(|dc| dc.creators().first().cloned()));
    insert_text(&mut fields, "author", author.as_deref());

    let categories: Vec<&str> = item.categories().iter().map(|c| c.name()).collect();
    if !categories.is_empty() {
        insert_text(&mut fields, "categories", Some(&categories.join(",")));
    }

    insert_date(&mut fields, "pubdate", item.pub_date().and_then(parse_date));
    fields
}

fn atom_fields(entry: &atom_syndication::Entry) -> Fields {
    let mut fields = Fields::new();
    insert_text(&mut fields, "guid", Some(entry.id()));
    insert_html(&mut fields, "title", Some(&entry.title().value));
    let link = entry
        .links()
        .iter()
        .find(|l| l.rel() == "alternate")
        .or_else(|| entry.links().first())
        .map(|l| l.href());
    insert_text(&mut fields, "link", link);
    insert_html(&mut fields, "summary", entry.summary().map(|s| s.value.as_str()));
    let content = entry.content().and_then(|c| c.value());
    insert_html(&mut fields, "content", content);
    // Atom has no description; mirror the richest text so templates and ids behave like RSS.
    insert_html(
        &mut fields,
        "description",
        entry.summary().map(|s| s.value.as_str()).or(content),
    );
    insert_text(&mut fields, "author", entry.authors().first().map(|p| p.name()));

    let categories: Vec<&str> = entry.categories().iter().map(|c| c.term()).collect();
    if !categories.is_empty() {
        insert_text(&mut fields, "categories", Some(&categories.join(",")));
    }

    let updated = entry.updated().with_timezone(&Utc);
    let published = entry.published().map(|d| d.with_timezone(&Utc));
    insert_date(&mut fields, "updated", Some(updated));
    insert_date(&mut fields, "pubdate", published.or(Some(updated)));
    fields
}

/// Picks one id strategy for the whole feed so ids stay stable between fetches.
fn resolve_ids(items: Vec<Fields>) -> Vec<Article> {
    let strategy = ID_CANDIDATES
        .iter()
        .copied()
        .find(|candidate| !items.is_empty() && items.iter().all(|f| has_text(f, candidate)));

    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|fields| {
            let id = match strategy {
                Some(field) => fields.get(field).map(FieldValue::as_text).unwrap_or_default(),
                None => {
                    let title = fields.get("title").map(FieldValue::as_text).unwrap_or_default();
                    let description = fields
                        .get("description")
                        .map(FieldValue::as_text)
                        .unwrap_or_default();
                    digest(&format!("{title}{description}"))
                }
            };
            let article = Article::new(id, fields);
            if !seen.insert(article.id_hash.clone()) {
                warn!(id = %article.id, "duplicate article id in feed");
            }
            article
        })
        .collect()
}

fn has_text(fields: &Fields, name: &str) -> bool {
    fields
        .get(name)
        .map(|v| !v.as_text().is_empty())
        .unwrap_or(false)
}
