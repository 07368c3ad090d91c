//! `{{placeholder}}` substitution for message templates.

use serde::{Deserialize, Serialize};

use crate::article::Article;

const MENTIONS_PLACEHOLDER: &str = "discord::mentions";
const LITERAL_PREFIX: &str = "text::";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceholderLimit {
    pub placeholder: String,
    pub character_count: usize,
    #[serde(default)]
    pub append_string: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RenderOptions<'a> {
    /// Enables `{{a||b||text::literal}}` alternatives.
    pub fallback: bool,
    pub limits: &'a [PlaceholderLimit],
    /// Rendered value of `{{discord::mentions}}`.
    pub mentions: Option<&'a str>,
}

/// Replaces every placeholder with the article's value. Unknown or empty fields
/// render as an empty string; an unterminated `{{` is kept verbatim.
pub fn render(template: &str, article: &Article, options: &RenderOptions<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        out.push_str(&resolve(after[..end].trim(), article, options));
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

fn resolve(placeholder: &str, article: &Article, options: &RenderOptions<'_>) -> String {
    let candidates: Vec<&str> = if options.fallback {
        placeholder.split("||").map(str::trim).collect()
    } else {
        vec![placeholder]
    };

    for candidate in candidates {
        let value = if let Some(literal) = candidate.strip_prefix(LITERAL_PREFIX) {
            Some(literal.to_owned())
        } else if candidate == MENTIONS_PLACEHOLDER {
            options.mentions.map(str::to_owned)
        } else {
            article.text(candidate)
        };
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            return apply_limit(candidate, value, options.limits);
        }
    }
    String::new()
}

fn apply_limit(placeholder: &str, value: String, limits: &[PlaceholderLimit]) -> String {
    let Some(limit) = limits.iter().find(|l| l.placeholder == placeholder) else {
        return value;
    };
    if value.chars().count() <= limit.character_count {
        return value;
    }
    let append = limit.append_string.as_deref().unwrap_or_default();
    let keep = limit.character_count.saturating_sub(append.chars().count());
    let mut truncated: String = value.chars().take(keep).collect();
    truncated.push_str(append);
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article() -> Article {
        Article::from_pairs("1", [("title", "X"), ("description", "a long description")])
    }

    #[test]
    fn substitutes_fields() {
        assert_eq!(render("content {{title}}", &article(), &RenderOptions::default()), "content X");
    }

    #[test]
    fn missing_fields_render_empty() {
        assert_eq!(render("[{{author}}]", &article(), &RenderOptions::default()), "[]");
        assert_eq!(render("{{ title }}!", &article(), &RenderOptions::default()), "X!");
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(render("a {{title", &article(), &RenderOptions::default()), "a {{title");
    }

    #[test]
    fn fallback_picks_first_non_empty() {
        let opts = RenderOptions {
            fallback: true,
            ..Default::default()
        };
        assert_eq!(render("{{author||title}}", &article(), &opts), "X");
        assert_eq!(render("{{author||text::nobody}}", &article(), &opts), "nobody");
        // Without fallback the whole expression is one unknown field.
        assert_eq!(render("{{author||title}}", &article(), &RenderOptions::default()), "");
    }

    #[test]
    fn limits_truncate_with_append() {
        let limits = vec![PlaceholderLimit {
            placeholder: "description".into(),
            character_count: 6,
            append_string: Some("...".into()),
        }];
        let opts = RenderOptions {
            limits: &limits,
            ..Default::default()
        };
        assert_eq!(render("{{description}}", &article(), &opts), "a l...");
        assert_eq!(render("{{title}}", &article(), &opts), "X");
    }

    #[test]
    fn renders_mentions() {
        let opts = RenderOptions {
            mentions: Some("<@1> <@&2>"),
            ..Default::default()
        };
        assert_eq!(render("{{discord::mentions}} {{title}}", &article(), &opts), "<@1> <@&2> X");
    }
}
