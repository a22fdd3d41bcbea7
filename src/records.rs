//! # Records
//!
//! Typed shapes for everything the knowledge base stores on disk:
//!
//! - [`StatuteRecord`] / [`CaseRecord`]: entries of the two authoritative collections.
//! - [`KnowledgeItem`]: one metadata row, aligned by ordinal with a row of the index.
//! - [`RetrievedItem`]: a metadata row plus the similarity score of a query.
//!
//! The collection files use Chinese field names (`条文编号`, `案件概述`, ...). Every field
//! is optional on disk and defaults to an empty string; numbers and booleans are
//! stringified so that a hand-edited file with `"条文编号": 264` still loads. Keys we
//! don't know about are carried in `extra` and written back untouched.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Only called for keys that are present, so `null` clears the field.
fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_string(deserializer).map(Some)
}

/// A single law article.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatuteRecord {
    #[serde(rename = "条文编号", default, deserialize_with = "lenient_string")]
    pub article_id: String,

    #[serde(rename = "条文内容", default, deserialize_with = "lenient_string")]
    pub article_text: String,

    #[serde(rename = "解释说明", default, deserialize_with = "lenient_string")]
    pub explanation: String,

    /// Unknown keys, preserved on rewrite.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StatuteRecord {
    pub fn new(
        article_id: impl Into<String>,
        article_text: impl Into<String>,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            article_id: article_id.into(),
            article_text: article_text.into(),
            explanation: explanation.into(),
            extra: Map::new(),
        }
    }

    /// Text submitted to the embedding provider: id, text and explanation.
    pub fn embedding_text(&self) -> String {
        format!(
            "{} {} {}",
            self.article_id, self.article_text, self.explanation
        )
    }

    /// Merge the fields present in `patch` into this record.
    pub fn apply(&mut self, patch: StatutePatch) {
        if let Some(article_id) = patch.article_id {
            self.article_id = article_id;
        }
        if let Some(article_text) = patch.article_text {
            self.article_text = article_text;
        }
        if let Some(explanation) = patch.explanation {
            self.explanation = explanation;
        }
        self.extra.extend(patch.extra);
    }
}

/// Partial update for a [`StatuteRecord`]. Absent fields are left alone.
///
/// Deserializes from the same key names as the statute file, so
/// `{"解释说明": "新说明"}` only replaces the explanation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatutePatch {
    #[serde(
        rename = "条文编号",
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub article_id: Option<String>,

    #[serde(
        rename = "条文内容",
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub article_text: Option<String>,

    #[serde(
        rename = "解释说明",
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub explanation: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StatutePatch {
    pub fn with_article_text(mut self, text: impl Into<String>) -> Self {
        self.article_text = Some(text.into());
        self
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.article_id.is_none()
            && self.article_text.is_none()
            && self.explanation.is_none()
            && self.extra.is_empty()
    }
}

/// A precedent case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    #[serde(rename = "案件编号", default, deserialize_with = "lenient_string")]
    pub case_id: String,

    #[serde(rename = "案件概述", default, deserialize_with = "lenient_string")]
    pub summary: String,

    #[serde(rename = "判决结果", default, deserialize_with = "lenient_string")]
    pub verdict: String,

    #[serde(rename = "适用条文", default, deserialize_with = "lenient_string")]
    pub applied_articles: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CaseRecord {
    pub fn new(
        case_id: impl Into<String>,
        summary: impl Into<String>,
        verdict: impl Into<String>,
        applied_articles: impl Into<String>,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            summary: summary.into(),
            verdict: verdict.into(),
            applied_articles: applied_articles.into(),
            extra: Map::new(),
        }
    }

    /// Text submitted to the embedding provider: summary, verdict and applied articles.
    /// The case id is deliberately not part of it.
    pub fn embedding_text(&self) -> String {
        format!(
            "{} {} {}",
            self.summary, self.verdict, self.applied_articles
        )
    }
}

/// Which collection a [`KnowledgeItem`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KnowledgeKind {
    #[serde(rename = "law")]
    Statute,
    #[serde(rename = "case")]
    Case,
}

impl KnowledgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            KnowledgeKind::Statute => "law",
            KnowledgeKind::Case => "case",
        }
    }
}

/// One metadata row. Serialized as `{"type": "law"|"case", "id": ..., "content": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KnowledgeItem {
    #[serde(rename = "law")]
    Statute { id: String, content: StatuteRecord },
    #[serde(rename = "case")]
    Case { id: String, content: CaseRecord },
}

impl KnowledgeItem {
    pub fn kind(&self) -> KnowledgeKind {
        match self {
            KnowledgeItem::Statute { .. } => KnowledgeKind::Statute,
            KnowledgeItem::Case { .. } => KnowledgeKind::Case,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            KnowledgeItem::Statute { id, .. } | KnowledgeItem::Case { id, .. } => id,
        }
    }

    pub fn statute(&self) -> Option<&StatuteRecord> {
        match self {
            KnowledgeItem::Statute { content, .. } => Some(content),
            KnowledgeItem::Case { .. } => None,
        }
    }

    pub fn case(&self) -> Option<&CaseRecord> {
        match self {
            KnowledgeItem::Case { content, .. } => Some(content),
            KnowledgeItem::Statute { .. } => None,
        }
    }

    /// The record serialized as JSON, used for keyword matching by the analysis agents.
    pub fn content_text(&self) -> String {
        let rendered = match self {
            KnowledgeItem::Statute { content, .. } => serde_json::to_string(content),
            KnowledgeItem::Case { content, .. } => serde_json::to_string(content),
        };
        rendered.unwrap_or_default()
    }
}

impl From<StatuteRecord> for KnowledgeItem {
    fn from(content: StatuteRecord) -> Self {
        KnowledgeItem::Statute {
            id: content.article_id.clone(),
            content,
        }
    }
}

impl From<CaseRecord> for KnowledgeItem {
    fn from(content: CaseRecord) -> Self {
        KnowledgeItem::Case {
            id: content.case_id.clone(),
            content,
        }
    }
}

/// A metadata row returned by a query, with its raw inner-product score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedItem {
    #[serde(flatten)]
    pub item: KnowledgeItem,
    pub relevance_score: f32,
}

impl RetrievedItem {
    pub fn kind(&self) -> KnowledgeKind {
        self.item.kind()
    }

    pub fn id(&self) -> &str {
        self.item.id()
    }
}
