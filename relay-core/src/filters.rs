//! Boolean filter expressions evaluated per article and target.
//!
//! Expressions arrive as JSON:
//!
//! ```json
//! { "type": "logical", "op": "AND", "children": [
//!     { "type": "relational", "op": "contains", "left": "article:title", "right": "rust" }
//! ] }
//! ```

use std::collections::HashMap;

use serde_json::Value;

use crate::article::Article;
use crate::error::ExpressionError;

const MAX_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationalOperator {
    Eq,
    Contains,
}

/// Left operand of a relational node: `<root>:<dotted.path>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencePath {
    pub root: String,
    pub path: Vec<String>,
}

impl ReferencePath {
    pub fn parse(raw: &str) -> Result<Self, ExpressionError> {
        let (root, path) = raw.split_once(':').ok_or_else(|| {
            ExpressionError::InvalidExpression(format!("left operand {raw:?} is missing a reference key"))
        })?;
        let segments: Vec<String> = path.split('.').map(str::to_owned).collect();
        if root.is_empty() || segments.iter().any(String::is_empty) {
            return Err(ExpressionError::InvalidExpression(format!(
                "left operand {raw:?} is not of the form <key>:<path>"
            )));
        }
        Ok(Self {
            root: root.to_owned(),
            path: segments,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    Logical {
        op: LogicalOperator,
        children: Vec<FilterExpression>,
    },
    Relational {
        op: RelationalOperator,
        left: ReferencePath,
        right: Value,
        negate: bool,
    },
}

impl FilterExpression {
    pub fn from_value(value: &Value) -> Result<Self, ExpressionError> {
        Self::parse_at(value, 0)
    }

    fn parse_at(value: &Value, depth: usize) -> Result<Self, ExpressionError> {
        if depth >= MAX_DEPTH {
            return Err(invalid("expression is nested too deeply"));
        }
        let obj = value
            .as_object()
            .ok_or_else(|| invalid("expression must be an object"))?;
        let kind = obj.get("type").and_then(Value::as_str).unwrap_or_default();
        let op = obj.get("op").and_then(Value::as_str).unwrap_or_default();

        match kind.to_ascii_lowercase().as_str() {
            "logical" => {
                let op = match op.to_ascii_uppercase().as_str() {
                    "AND" => LogicalOperator::And,
                    "OR" => LogicalOperator::Or,
                    "NOT" => LogicalOperator::Not,
                    _ => return Err(invalid(format!("unknown logical operator {op:?}"))),
                };
                let children = match obj.get("children") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(|c| Self::parse_at(c, depth + 1))
                        .collect::<Result<Vec<_>, _>>()?,
                    Some(_) => return Err(invalid("logical children must be an array")),
                };
                if op == LogicalOperator::Not && children.len() != 1 {
                    return Err(invalid("NOT takes exactly one child"));
                }
                Ok(FilterExpression::Logical { op, children })
            }
            "relational" => {
                let op = match op.to_ascii_lowercase().as_str() {
                    "eq" => RelationalOperator::Eq,
                    "contains" => RelationalOperator::Contains,
                    _ => return Err(invalid(format!("unknown relational operator {op:?}"))),
                };
                let left = parse_left(obj.get("left"))?;
                let right = unwrap_operand(obj.get("right").cloned().unwrap_or(Value::Null));
                let negate = obj.get("not").and_then(Value::as_bool).unwrap_or(false);
                Ok(FilterExpression::Relational {
                    op,
                    left,
                    right,
                    negate,
                })
            }
            _ => Err(invalid(format!("unknown expression type {kind:?}"))),
        }
    }

    pub fn evaluate(&self, references: &References) -> bool {
        match self {
            FilterExpression::Logical { op, children } => match op {
                LogicalOperator::And => children.iter().all(|c| c.evaluate(references)),
                LogicalOperator::Or => {
                    children.is_empty() || children.iter().any(|c| c.evaluate(references))
                }
                LogicalOperator::Not => !children.iter().all(|c| c.evaluate(references)),
            },
            FilterExpression::Relational {
                op,
                left,
                right,
                negate,
            } => {
                // A missing value never matches, so only a negated comparison passes.
                let Some(resolved) = references.resolve(left) else {
                    return *negate;
                };
                let matched = match op {
                    RelationalOperator::Eq => values_equal(resolved, right),
                    RelationalOperator::Contains => value_contains(resolved, right),
                };
                matched != *negate
            }
        }
    }
}

fn invalid(msg: impl Into<String>) -> ExpressionError {
    ExpressionError::InvalidExpression(msg.into())
}

fn parse_left(value: Option<&Value>) -> Result<ReferencePath, ExpressionError> {
    match value {
        Some(Value::String(s)) => ReferencePath::parse(s),
        // `{ "type": "ARTICLE", "value": "title" }`
        Some(Value::Object(obj)) => {
            let root = obj.get("type").and_then(Value::as_str);
            let path = obj.get("value").and_then(Value::as_str);
            match (root, path) {
                (Some(root), Some(path)) => {
                    ReferencePath::parse(&format!("{}:{path}", root.to_ascii_lowercase()))
                }
                _ => Err(invalid("left operand object needs type and value")),
            }
        }
        _ => Err(invalid("left operand must be a string")),
    }
}

fn unwrap_operand(value: Value) -> Value {
    match value {
        Value::Object(mut obj) if obj.len() == 2 && obj.contains_key("type") => {
            obj.remove("value").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Roots an expression may reference. Anything else evaluates to `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceRoot {
    Article,
}

impl ReferenceRoot {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "article" => Some(ReferenceRoot::Article),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct References {
    roots: HashMap<ReferenceRoot, Value>,
}

impl References {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, root: ReferenceRoot, value: Value) -> Self {
        self.roots.insert(root, value);
        self
    }

    pub fn for_article(article: &Article) -> Self {
        Self::new().with(ReferenceRoot::Article, article.to_reference())
    }

    fn resolve(&self, path: &ReferencePath) -> Option<&Value> {
        let root = ReferenceRoot::from_key(&path.root)?;
        let mut current = self.roots.get(&root)?;
        for segment in &path.path {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        (!current.is_null()).then_some(current)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn values_equal(resolved: &Value, right: &Value) -> bool {
    match (scalar_text(resolved), scalar_text(right)) {
        (Some(a), Some(b)) => a == b,
        _ => resolved == right,
    }
}

fn value_contains(resolved: &Value, right: &Value) -> bool {
    match resolved {
        Value::Array(items) => items.iter().any(|item| values_equal(item, right)),
        Value::Object(_) | Value::Null => false,
        scalar => match (scalar_text(scalar), scalar_text(right)) {
            (Some(haystack), Some(needle)) => haystack
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            _ => false,
        },
    }
}

/// Evaluates an optional JSON expression. No expression always passes.
pub fn evaluate_value(expression: Option<&Value>, references: &References) -> Result<bool, ExpressionError> {
    match expression {
        None | Some(Value::Null) => Ok(true),
        Some(value) => Ok(FilterExpression::from_value(value)?.evaluate(references)),
    }
}
