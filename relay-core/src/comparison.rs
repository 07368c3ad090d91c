use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::article::{digest, Article};
use crate::error::StoreError;
use crate::storage::JsonFile;

/// Field name under which article id hashes are recorded.
pub const ID_FIELD: &str = "id";

const DEFAULT_DATE_FIELDS: [&str; 2] = ["date", "pubdate"];

/// A stored `(field name, hashed value)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldHash {
    pub name: String,
    pub hashed_value: String,
}

#[derive(Debug, Default)]
pub struct Classified {
    pub new: Vec<Article>,
    pub seen: Vec<Article>,
}

/// Per-feed history of article ids and comparison field values.
#[async_trait]
pub trait ComparisonStore: Send + Sync {
    async fn has_prior_data(&self, feed_id: &str) -> Result<bool, StoreError>;

    async fn find_stored_ids(&self, feed_id: &str, id_hashes: &[String]) -> Result<HashSet<String>, StoreError>;

    async fn some_fields_exist(&self, feed_id: &str, fields: &[FieldHash]) -> Result<bool, StoreError>;

    async fn store_fields(&self, feed_id: &str, fields: Vec<FieldHash>) -> Result<(), StoreError>;

    /// Comparison names whose values have been recorded for the feed.
    async fn stored_comparison_names(&self, feed_id: &str) -> Result<HashSet<String>, StoreError>;

    async fn store_comparison_names(&self, feed_id: &str, names: &[String]) -> Result<(), StoreError>;

    async fn clear(&self, feed_id: &str) -> Result<(), StoreError>;

    /// Splits a batch by whether each article id was recorded before.
    async fn classify(&self, feed_id: &str, articles: &[Article]) -> Result<Classified, StoreError> {
        let hashes: Vec<String> = articles.iter().map(|a| a.id_hash.clone()).collect();
        let stored = self.find_stored_ids(feed_id, &hashes).await?;
        let (seen, new): (Vec<Article>, Vec<Article>) = articles
            .iter()
            .cloned()
            .partition(|a| stored.contains(&a.id_hash));
        Ok(Classified { new, seen })
    }

    async fn field_value_seen_before(
        &self,
        feed_id: &str,
        article: &Article,
        field_names: &[String],
    ) -> Result<bool, StoreError> {
        let queries: Vec<FieldHash> = field_names
            .iter()
            .filter_map(|name| {
                article.text(name).map(|value| FieldHash {
                    name: name.clone(),
                    hashed_value: digest(&value),
                })
            })
            .collect();
        if queries.is_empty() {
            return Ok(false);
        }
        self.some_fields_exist(feed_id, &queries).await
    }

    /// Records article ids and the given non-empty field values.
    async fn persist(&self, feed_id: &str, articles: &[Article], field_names: &[String]) -> Result<(), StoreError> {
        let mut fields = Vec::with_capacity(articles.len() * (field_names.len() + 1));
        for article in articles {
            fields.push(FieldHash {
                name: ID_FIELD.to_owned(),
                hashed_value: article.id_hash.clone(),
            });
            for name in field_names {
                if let Some(value) = article.text(name) {
                    fields.push(FieldHash {
                        name: name.clone(),
                        hashed_value: digest(&value),
                    });
                }
            }
        }
        self.store_fields(feed_id, fields).await
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ComparisonData {
    // feed_id -> field name -> hashed values
    fields: HashMap<String, HashMap<String, HashSet<String>>>,
    // feed_id -> comparison names recorded so far
    names: HashMap<String, BTreeSet<String>>,
}

#[derive(Debug, Clone)]
pub struct FileComparisonStore {
    data: JsonFile<ComparisonData>,
}

impl FileComparisonStore {
    pub fn in_memory() -> Self {
        Self {
            data: JsonFile::in_memory(),
        }
    }

    pub async fn load_from(path: impl AsRef<Path>) -> Self {
        Self {
            data: JsonFile::load_from(path).await,
        }
    }
}

#[async_trait]
impl ComparisonStore for FileComparisonStore {
    async fn has_prior_data(&self, feed_id: &str) -> Result<bool, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .fields
            .get(feed_id)
            .and_then(|f| f.get(ID_FIELD))
            .map(|ids| !ids.is_empty())
            .unwrap_or(false))
    }

    async fn find_stored_ids(&self, feed_id: &str, id_hashes: &[String]) -> Result<HashSet<String>, StoreError> {
        let data = self.data.read().await;
        let Some(ids) = data.fields.get(feed_id).and_then(|f| f.get(ID_FIELD)) else {
            return Ok(HashSet::new());
        };
        Ok(id_hashes.iter().filter(|h| ids.contains(*h)).cloned().collect())
    }

    async fn some_fields_exist(&self, feed_id: &str, fields: &[FieldHash]) -> Result<bool, StoreError> {
        let data = self.data.read().await;
        let Some(feed) = data.fields.get(feed_id) else {
            return Ok(false);
        };
        Ok(fields.iter().any(|f| {
            feed.get(&f.name)
                .map(|values| values.contains(&f.hashed_value))
                .unwrap_or(false)
        }))
    }

    async fn store_fields(&self, feed_id: &str, fields: Vec<FieldHash>) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        {
            let mut data = self.data.write().await;
            let feed = data.fields.entry(feed_id.to_owned()).or_default();
            for f in fields {
                feed.entry(f.name).or_default().insert(f.hashed_value);
            }
        }
        self.data.persist().await
    }

    async fn stored_comparison_names(&self, feed_id: &str) -> Result<HashSet<String>, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .names
            .get(feed_id)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn store_comparison_names(&self, feed_id: &str, names: &[String]) -> Result<(), StoreError> {
        if names.is_empty() {
            return Ok(());
        }
        {
            let mut data = self.data.write().await;
            data.names
                .entry(feed_id.to_owned())
                .or_default()
                .extend(names.iter().cloned());
        }
        self.data.persist().await
    }

    async fn clear(&self, feed_id: &str) -> Result<(), StoreError> {
        {
            let mut data = self.data.write().await;
            data.fields.remove(feed_id);
            data.names.remove(feed_id);
        }
        self.data.persist().await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateChecks {
    #[serde(default)]
    pub old_article_date_diff_ms_threshold: Option<i64>,
    #[serde(default)]
    pub date_placeholder_references: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct ComparisonOptions {
    pub blocking: Vec<String>,
    pub passing: Vec<String>,
    pub date_checks: Option<DateChecks>,
}

impl ComparisonOptions {
    fn all_names(&self) -> Vec<String> {
        let mut names = self.blocking.clone();
        for name in &self.passing {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

#[derive(Debug, Default)]
pub struct ComparisonOutcome {
    /// Oldest first.
    pub to_deliver: Vec<Article>,
    pub blocked: Vec<Article>,
    pub passed: Vec<Article>,
    pub first_run: bool,
}

/// Decides which fetched articles are deliverable and records what was seen.
///
/// The first run for a feed only records history. Later runs deliver new ids that
/// no blocking comparison has seen, plus seen ids with an unseen passing comparison.
/// A comparison only takes effect once its values have been recorded for the feed;
/// newly configured ones are recorded for every current article instead.
pub async fn articles_to_deliver(
    store: &dyn ComparisonStore,
    feed_id: &str,
    articles: &[Article],
    options: &ComparisonOptions,
) -> Result<ComparisonOutcome, StoreError> {
    let all_names = options.all_names();

    if !store.has_prior_data(feed_id).await? {
        store.persist(feed_id, articles, &all_names).await?;
        store.store_comparison_names(feed_id, &all_names).await?;
        debug!(feed_id, stored = articles.len(), "first run for feed, nothing delivered");
        return Ok(ComparisonOutcome {
            first_run: true,
            ..Default::default()
        });
    }

    let active = store.stored_comparison_names(feed_id).await?;
    let active_blocking: Vec<String> = options
        .blocking
        .iter()
        .filter(|n| active.contains(*n))
        .cloned()
        .collect();
    let active_passing: Vec<String> = options
        .passing
        .iter()
        .filter(|n| active.contains(*n))
        .cloned()
        .collect();
    let unstored: Vec<String> = all_names
        .iter()
        .filter(|n| !active.contains(*n))
        .cloned()
        .collect();

    let Classified { new, seen } = store.classify(feed_id, articles).await?;

    let mut admitted_new = Vec::new();
    let mut blocked = Vec::new();
    for article in &new {
        if !active_blocking.is_empty()
            && store
                .field_value_seen_before(feed_id, article, &active_blocking)
                .await?
        {
            blocked.push(article.clone());
        } else {
            admitted_new.push(article.clone());
        }
    }

    let mut passed = Vec::new();
    if !active_passing.is_empty() {
        for article in &seen {
            if !store
                .field_value_seen_before(feed_id, article, &active_passing)
                .await?
            {
                passed.push(article.clone());
            }
        }
    }

    let mut candidates: Vec<Article> = admitted_new.into_iter().chain(passed.iter().cloned()).collect();
    candidates.reverse();
    let to_deliver = apply_date_checks(candidates, options.date_checks.as_ref());

    if !new.is_empty() {
        store.persist(feed_id, &new, &all_names).await?;
        store.store_comparison_names(feed_id, &all_names).await?;
    }
    if !passed.is_empty() {
        store.persist(feed_id, &passed, &options.passing).await?;
    }
    if !unstored.is_empty() {
        store.persist(feed_id, articles, &unstored).await?;
        store.store_comparison_names(feed_id, &unstored).await?;
    }

    debug!(
        feed_id,
        new = new.len(),
        seen = seen.len(),
        blocked = blocked.len(),
        passed = passed.len(),
        deliver = to_deliver.len(),
        "compared articles"
    );

    Ok(ComparisonOutcome {
        to_deliver,
        blocked,
        passed,
        first_run: false,
    })
}

fn apply_date_checks(articles: Vec<Article>, checks: Option<&DateChecks>) -> Vec<Article> {
    let Some(threshold) = checks.and_then(|c| c.old_article_date_diff_ms_threshold) else {
        return articles;
    };
    if threshold <= 0 {
        return articles;
    }
    let fields: Vec<String> = checks
        .and_then(|c| c.date_placeholder_references.clone())
        .unwrap_or_else(|| DEFAULT_DATE_FIELDS.iter().map(|s| s.to_string()).collect());
    let now = Utc::now();

    articles
        .into_iter()
        .filter(|article| {
            let date = fields
                .iter()
                .find_map(|name| article.get(name).and_then(|v| v.as_date()));
            match date {
                Some(date) => (now - date).num_milliseconds() <= threshold,
                None => true,
            }
        })
        .collect()
}
