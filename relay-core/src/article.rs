use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Date(DateTime<Utc>),
    Text(String),
}

impl FieldValue {
    pub fn as_text(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Date(d) => d.to_rfc3339(),
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Date(d) => Some(*d),
            FieldValue::Text(s) => parse_date(s),
            FieldValue::Number(_) => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Date(d) => Value::String(d.to_rfc3339()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Date(value)
    }
}

/// A flattened feed item with its resolved identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub id_hash: String,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Article {
    pub fn new(id: impl Into<String>, fields: BTreeMap<String, FieldValue>) -> Self {
        let id = id.into();
        Self {
            id_hash: digest(&id),
            id,
            fields,
        }
    }

    /// Builds an article from `(name, text)` pairs. Mostly useful in tests.
    pub fn from_pairs<'a>(id: &str, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let fields = pairs
            .into_iter()
            .map(|(k, v)| (k.to_owned(), FieldValue::from(v)))
            .collect();
        Self::new(id, fields)
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Text form of a field, `None` when missing or empty. `id` resolves to the article id.
    pub fn text(&self, name: &str) -> Option<String> {
        if name == "id" {
            return Some(self.id.clone());
        }
        self.fields
            .get(name)
            .map(FieldValue::as_text)
            .filter(|s| !s.is_empty())
    }

    /// JSON object used as the `article` filter reference.
    pub fn to_reference(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("id".to_owned(), Value::String(self.id.clone()));
        map.insert("idHash".to_owned(), Value::String(self.id_hash.clone()));
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json());
        }
        Value::Object(map)
    }
}

/// Hex SHA-256 of a value; used for ids and stored comparison values.
pub fn digest(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
