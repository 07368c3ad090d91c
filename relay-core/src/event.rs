use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use url::Url;

use crate::comparison::{ComparisonOptions, DateChecks};
use crate::discord::DiscordDetails;
use crate::error::HandlerError;
use crate::rate_limit::RateLimitWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediumKey {
    Discord,
}

impl MediumKey {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "discord" => Some(MediumKey::Discord),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetFilters {
    #[serde(default)]
    pub expression: Option<Value>,
}

/// A configured delivery destination for a feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryTarget {
    pub id: String,
    pub key: MediumKey,
    #[serde(default)]
    pub filters: Option<TargetFilters>,
    /// Per-target windows, checked on top of the feed's own limits.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub rate_limits: Vec<RateLimitWindow>,
    pub details: DiscordDetails,
}

impl DeliveryTarget {
    pub fn filter_expression(&self) -> Option<&Value> {
        self.filters.as_ref().and_then(|f| f.expression.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedDetails {
    pub id: String,
    pub url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub blocking_comparisons: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub passing_comparisons: Vec<String>,
    #[serde(default)]
    pub date_checks: Option<DateChecks>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEvent {
    pub feed: FeedDetails,
    pub mediums: Vec<DeliveryTarget>,
    pub article_day_limit: i64,
    #[serde(default)]
    pub debug: bool,
}

impl FeedEvent {
    /// Validates a raw payload, reporting every violation at once.
    /// Payloads wrapped in a `data` envelope are unwrapped first.
    pub fn from_value(value: &Value) -> Result<Self, HandlerError> {
        let root = match value.get("data") {
            Some(inner) if value.get("feed").is_none() => inner,
            _ => value,
        };
        let errors = validate(root);
        if !errors.is_empty() {
            return Err(HandlerError::Validation(errors));
        }
        serde_json::from_value(root.clone()).map_err(|e| HandlerError::Validation(vec![e.to_string()]))
    }

    pub fn comparison_options(&self) -> ComparisonOptions {
        ComparisonOptions {
            blocking: self.feed.blocking_comparisons.clone(),
            passing: self.feed.passing_comparisons.clone(),
            date_checks: self.feed.date_checks.clone(),
        }
    }
}

fn validate(root: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    if !root.is_object() {
        errors.push("event must be an object".to_owned());
        return errors;
    }

    match root.get("feed") {
        Some(Value::Object(feed)) => {
            match feed.get("id").and_then(Value::as_str) {
                Some(id) if !id.is_empty() => {}
                _ => errors.push("feed.id must be a non-empty string".to_owned()),
            }
            match feed.get("url").and_then(Value::as_str) {
                Some(url) if Url::parse(url).is_ok() => {}
                Some(url) => errors.push(format!("feed.url {url:?} is not a valid URL")),
                None => errors.push("feed.url must be a string".to_owned()),
            }
            for key in ["blockingComparisons", "passingComparisons"] {
                match feed.get(key) {
                    None | Some(Value::Null) => {}
                    Some(Value::Array(items)) if items.iter().all(Value::is_string) => {}
                    Some(_) => errors.push(format!("feed.{key} must be an array of strings")),
                }
            }
        }
        _ => errors.push("feed must be an object".to_owned()),
    }

    match root.get("mediums") {
        Some(Value::Array(mediums)) => {
            for (i, medium) in mediums.iter().enumerate() {
                match medium.get("id").and_then(Value::as_str) {
                    Some(id) if !id.is_empty() => {}
                    _ => errors.push(format!("mediums[{i}].id must be a non-empty string")),
                }
                match medium.get("key").and_then(Value::as_str) {
                    Some(key) if MediumKey::from_key(key).is_some() => {}
                    Some(key) => errors.push(format!("mediums[{i}].key {key:?} is not a recognized medium")),
                    None => errors.push(format!("mediums[{i}].key must be a string")),
                }
                if !medium.get("details").map(Value::is_object).unwrap_or(false) {
                    errors.push(format!("mediums[{i}].details must be an object"));
                }
            }
        }
        _ => errors.push("mediums must be an array".to_owned()),
    }

    match root.get("articleDayLimit") {
        Some(limit) if limit.as_i64().map(|l| l >= 0).unwrap_or(false) => {}
        _ => errors.push("articleDayLimit must be a non-negative integer".to_owned()),
    }

    errors
}
