use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, error};
use url::Url;
use uuid::Uuid;

use crate::article::Article;
use crate::delivery::{ArticleDeliveryState, DeliveryContext, DeliveryErrorCode, DeliveryMedium, DeliveryStatus};
use crate::error::{EnqueueError, MediumError};
use crate::event::TargetFilters;
use crate::filters::{evaluate_value, References};
use crate::outbound::{JobMeta, OutboundJob, OutboundQueue};
use crate::template::{render, PlaceholderLimit, RenderOptions};

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

const DEFAULT_CONTENT: &str = "{{link}}";
const MAX_CONTENT_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDestination {
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDestination {
    pub id: String,
    pub token: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedFooter {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedUrl {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedAuthor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedTemplate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub color: Option<u32>,
    #[serde(default)]
    pub footer: Option<EmbedFooter>,
    #[serde(default)]
    pub image: Option<EmbedUrl>,
    #[serde(default)]
    pub thumbnail: Option<EmbedUrl>,
    #[serde(default)]
    pub author: Option<EmbedAuthor>,
    #[serde(default)]
    pub fields: Vec<EmbedField>,
    /// `"now"`, `"article"` or empty.
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MentionKind {
    User,
    Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionTarget {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MentionKind,
    #[serde(default)]
    pub filters: Option<TargetFilters>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mentions {
    #[serde(default)]
    pub targets: Vec<MentionTarget>,
}

/// Delivery settings of a Discord target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordDetails {
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub channel: Option<ChannelDestination>,
    #[serde(default)]
    pub webhook: Option<WebhookDestination>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub embeds: Vec<EmbedTemplate>,
    #[serde(default)]
    pub placeholder_limits: Vec<PlaceholderLimit>,
    #[serde(default)]
    pub enable_placeholder_fallback: bool,
    #[serde(default)]
    pub mentions: Option<Mentions>,
}

enum Destination<'a> {
    Channel(&'a ChannelDestination),
    Webhook(&'a WebhookDestination),
}

impl DiscordDetails {
    fn destinations(&self) -> Vec<Destination<'_>> {
        let mut out = Vec::new();
        if let Some(channel) = &self.channel {
            out.push(Destination::Channel(channel));
        }
        if let Some(webhook) = &self.webhook {
            out.push(Destination::Webhook(webhook));
        }
        out
    }
}

/// Renders articles into Discord messages and queues one job per destination.
pub struct DiscordMedium {
    queue: Arc<dyn OutboundQueue>,
    api_base: String,
}

impl DiscordMedium {
    pub fn new(queue: Arc<dyn OutboundQueue>) -> Self {
        Self::with_api_base(queue, DEFAULT_API_BASE)
    }

    pub fn with_api_base(queue: Arc<dyn OutboundQueue>, api_base: impl Into<String>) -> Self {
        Self {
            queue,
            api_base: api_base.into().trim_end_matches('/').to_owned(),
        }
    }

    fn channel_url(&self, channel: &ChannelDestination) -> String {
        format!("{}/channels/{}/messages", self.api_base, channel.id)
    }

    fn webhook_url(&self, webhook: &WebhookDestination) -> Result<String, EnqueueError> {
        let mut url = Url::parse(&format!("{}/webhooks/{}/{}", self.api_base, webhook.id, webhook.token))
            .map_err(|e| EnqueueError::InvalidRequest(e.to_string()))?;
        if let Some(thread_id) = webhook.thread_id.as_deref().filter(|t| !t.is_empty()) {
            url.query_pairs_mut().append_pair("thread_id", thread_id);
        }
        Ok(url.into())
    }

    async fn enqueue_to(
        &self,
        destination: &Destination<'_>,
        payload: &Value,
        article: &Article,
        ctx: &DeliveryContext<'_>,
        options: &RenderOptions<'_>,
    ) -> Result<Uuid, EnqueueError> {
        let id = Uuid::new_v4();
        let mut meta = JobMeta {
            id,
            article_id: article.id.clone(),
            article_id_hash: article.id_hash.clone(),
            feed_url: ctx.feed_url.to_owned(),
            feed_id: ctx.feed_id.to_owned(),
            guild_id: ctx.target.details.guild_id.clone(),
            medium_id: ctx.target.id.clone(),
            channel: None,
            webhook_id: None,
        };
        let (url, body) = match destination {
            Destination::Channel(channel) => {
                meta.channel = Some(channel.id.clone());
                (self.channel_url(channel), payload.clone())
            }
            Destination::Webhook(webhook) => {
                meta.webhook_id = Some(webhook.id.clone());
                let body = with_webhook_identity(payload.clone(), webhook, article, options);
                (self.webhook_url(webhook)?, body)
            }
        };
        self.queue
            .enqueue(OutboundJob {
                url,
                method: "POST".to_owned(),
                body,
                meta,
            })
            .await?;
        Ok(id)
    }
}

#[async_trait]
impl DeliveryMedium for DiscordMedium {
    async fn send(&self, article: &Article, ctx: &DeliveryContext<'_>) -> Result<Vec<ArticleDeliveryState>, MediumError> {
        let details = &ctx.target.details;
        let destinations = details.destinations();
        if destinations.is_empty() {
            return Ok(vec![ArticleDeliveryState::new(
                &ctx.target.id,
                article,
                DeliveryStatus::failed(DeliveryErrorCode::NoChannelOrWebhook, "No channel or webhook specified"),
            )]);
        }

        let mentions = render_mentions(details, article)?;
        let options = RenderOptions {
            fallback: details.enable_placeholder_fallback,
            limits: &details.placeholder_limits,
            mentions: Some(mentions.as_str()),
        };
        let payload = render_payload(details, article, &options);

        let mut states = Vec::with_capacity(destinations.len());
        for destination in &destinations {
            let state = match self.enqueue_to(destination, &payload, article, ctx, &options).await {
                Ok(id) => {
                    debug!(delivery_id = %id, target_id = %ctx.target.id, article_id = %article.id, "queued discord message");
                    ArticleDeliveryState::with_id(id, &ctx.target.id, article, DeliveryStatus::PendingDelivery)
                }
                Err(e) => {
                    error!(target_id = %ctx.target.id, error = %e, "failed to queue discord message");
                    ArticleDeliveryState::new(
                        &ctx.target.id,
                        article,
                        DeliveryStatus::failed(DeliveryErrorCode::Internal, e.to_string()),
                    )
                }
            };
            states.push(state);
        }
        Ok(states)
    }
}

fn render_mentions(details: &DiscordDetails, article: &Article) -> Result<String, MediumError> {
    let Some(mentions) = &details.mentions else {
        return Ok(String::new());
    };
    let references = References::for_article(article);
    let mut rendered = Vec::new();
    for target in &mentions.targets {
        let expression = target.filters.as_ref().and_then(|f| f.expression.as_ref());
        if evaluate_value(expression, &references)? {
            rendered.push(match target.kind {
                MentionKind::User => format!("<@{}>", target.id),
                MentionKind::Role => format!("<@&{}>", target.id),
            });
        }
    }
    Ok(rendered.join(" "))
}

/// Builds the message body shared by every destination of a target.
pub fn render_payload(details: &DiscordDetails, article: &Article, options: &RenderOptions<'_>) -> Value {
    let embeds: Vec<Value> = details
        .embeds
        .iter()
        .filter_map(|e| render_embed(e, article, options))
        .collect();

    let template = match &details.content {
        Some(content) => content.as_str(),
        None if details.embeds.is_empty() => DEFAULT_CONTENT,
        None => "",
    };
    let content: String = render(template, article, options)
        .chars()
        .take(MAX_CONTENT_CHARS)
        .collect();

    let mut payload = Map::new();
    if !content.trim().is_empty() {
        payload.insert("content".into(), Value::String(content));
    }
    payload.insert("embeds".into(), Value::Array(embeds));
    Value::Object(payload)
}

fn render_embed(embed: &EmbedTemplate, article: &Article, options: &RenderOptions<'_>) -> Option<Value> {
    let text = |t: &Option<String>| {
        t.as_deref()
            .map(|t| render(t, article, options))
            .filter(|s| !s.trim().is_empty())
    };
    let mut out = Map::new();

    if let Some(v) = text(&embed.title) {
        out.insert("title".into(), v.into());
    }
    if let Some(v) = text(&embed.description) {
        out.insert("description".into(), v.into());
    }
    if let Some(v) = text(&embed.url) {
        out.insert("url".into(), v.into());
    }
    if let Some(footer) = &embed.footer {
        if let Some(t) = text(&footer.text) {
            let mut f = Map::new();
            f.insert("text".into(), t.into());
            if let Some(icon) = text(&footer.icon_url) {
                f.insert("icon_url".into(), icon.into());
            }
            out.insert("footer".into(), Value::Object(f));
        }
    }
    if let Some(url) = embed.image.as_ref().and_then(|i| text(&i.url)) {
        out.insert("image".into(), json!({ "url": url }));
    }
    if let Some(url) = embed.thumbnail.as_ref().and_then(|i| text(&i.url)) {
        out.insert("thumbnail".into(), json!({ "url": url }));
    }
    if let Some(author) = &embed.author {
        if let Some(name) = text(&author.name) {
            let mut a = Map::new();
            a.insert("name".into(), name.into());
            if let Some(url) = text(&author.url) {
                a.insert("url".into(), url.into());
            }
            if let Some(icon) = text(&author.icon_url) {
                a.insert("icon_url".into(), icon.into());
            }
            out.insert("author".into(), Value::Object(a));
        }
    }
    let fields: Vec<Value> = embed
        .fields
        .iter()
        .filter_map(|f| {
            let name = render(&f.name, article, options);
            let value = render(&f.value, article, options);
            (!name.trim().is_empty() && !value.trim().is_empty())
                .then(|| json!({ "name": name, "value": value, "inline": f.inline }))
        })
        .collect();
    if !fields.is_empty() {
        out.insert("fields".into(), Value::Array(fields));
    }
    let timestamp = match embed.timestamp.as_deref() {
        Some("now") => Some(Utc::now()),
        Some("article") => ["pubdate", "date"]
            .iter()
            .find_map(|name| article.get(name).and_then(|v| v.as_date())),
        _ => None,
    };

    if out.is_empty() {
        return None;
    }
    if let Some(ts) = timestamp {
        out.insert("timestamp".into(), ts.to_rfc3339().into());
    }
    if let Some(color) = embed.color {
        out.insert("color".into(), color.into());
    }
    Some(Value::Object(out))
}

fn with_webhook_identity(
    mut payload: Value,
    webhook: &WebhookDestination,
    article: &Article,
    options: &RenderOptions<'_>,
) -> Value {
    if let Value::Object(map) = &mut payload {
        if let Some(name) = webhook.name.as_deref().map(|n| render(n, article, options)) {
            if !name.is_empty() {
                map.insert("username".into(), name.into());
            }
        }
        if let Some(icon) = webhook.icon_url.as_deref().map(|i| render(i, article, options)) {
            if !icon.is_empty() {
                map.insert("avatar_url".into(), icon.into());
            }
        }
    }
    payload
}
