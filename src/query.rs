//! Retrieval queries: raw text or a structured case record.
//!
//! Structured queries are flattened into a single line so the same record always
//! produces the same query text. Nested keys accumulate as a prefix, list elements
//! inherit their parent's prefix, and every scalar leaf becomes one
//! `"<prefix>: <value>"` token. `null` renders as `None` and booleans as `True` / `False`,
//! so queries flattened here match text indexed by older tooling:
//!
//! ```
//! use law_rag::query::KnowledgeQuery;
//! use serde_json::json;
//!
//! let query = KnowledgeQuery::from(json!({"主体信息": {"年龄": 17}, "罪名": ["盗窃", "抢夺"]}));
//! assert_eq!(query.to_text(), "主体信息: 年龄: 17 罪名: 盗窃 罪名: 抢夺");
//! ```

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum KnowledgeQuery {
    Text(String),
    Structured(Value),
}

impl KnowledgeQuery {
    /// The text submitted to the embedding provider.
    pub fn to_text(&self) -> String {
        match self {
            KnowledgeQuery::Text(text) => text.clone(),
            KnowledgeQuery::Structured(value) => flatten(value),
        }
    }
}

impl From<String> for KnowledgeQuery {
    fn from(text: String) -> Self {
        KnowledgeQuery::Text(text)
    }
}

impl From<&str> for KnowledgeQuery {
    fn from(text: &str) -> Self {
        KnowledgeQuery::Text(text.to_string())
    }
}

impl From<Value> for KnowledgeQuery {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => KnowledgeQuery::Text(text),
            other => KnowledgeQuery::Structured(other),
        }
    }
}

fn flatten(value: &Value) -> String {
    let mut parts = Vec::new();
    walk(value, String::new(), &mut parts);
    parts.join(" ")
}

fn walk(value: &Value, prefix: String, parts: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                walk(child, format!("{prefix}{key}: "), parts);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, prefix.clone(), parts);
            }
        }
        Value::String(s) => parts.push(format!("{prefix}{s}")),
        Value::Null => parts.push(format!("{prefix}None")),
        Value::Bool(true) => parts.push(format!("{prefix}True")),
        Value::Bool(false) => parts.push(format!("{prefix}False")),
        Value::Number(n) => parts.push(format!("{prefix}{n}")),
    }
}
