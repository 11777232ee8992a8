use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata key holding a passage's source link.
pub const SOURCE_KEY: &str = "source";
/// Metadata key holding a child chunk's back-reference to its parent document.
pub const PARENT_ID_KEY: &str = "parent_id";

/// An indexed unit of text. Immutable once indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub vector: Vec<f32>,
}

impl Passage {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: BTreeMap::new(),
            vector: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = vector;
        self
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).map(String::as_str)
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.metadata.get(PARENT_ID_KEY).map(String::as_str)
    }
}

/// A passage paired with a strategy-dependent relevance score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f32,
}

impl ScoredPassage {
    pub fn new(passage: Passage, score: f32) -> Self {
        Self { passage, score }
    }

    pub fn id(&self) -> &str {
        &self.passage.id
    }
}

/// Relevance-descending list of candidates.
pub type RetrievalResult = Vec<ScoredPassage>;

/// Comparison applied by a [`MetadataFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Contains,
}

impl FilterOp {
    /// Exact, case-normalised operator names.
    pub fn parse(op: &str) -> Option<Self> {
        match op.trim().to_lowercase().as_str() {
            "eq" | "=" | "==" => Some(FilterOp::Eq),
            "ne" | "!=" => Some(FilterOp::Ne),
            "contains" | "like" => Some(FilterOp::Contains),
            _ => None,
        }
    }
}

/// Structured field/operator/value predicate over passage metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub field: String,
    pub op: FilterOp,
    pub value: String,
}

impl MetadataFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn matches(&self, passage: &Passage) -> bool {
        let actual = passage.metadata.get(&self.field);
        match self.op {
            FilterOp::Eq => actual.is_some_and(|v| v.eq_ignore_ascii_case(&self.value)),
            FilterOp::Ne => actual.map_or(true, |v| !v.eq_ignore_ascii_case(&self.value)),
            FilterOp::Contains => actual
                .is_some_and(|v| v.to_lowercase().contains(&self.value.to_lowercase())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One dialogue turn held in conversation memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            at: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// A single message sent to a chat backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Chat request handed in by the transport layer.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub strategy_id: Option<String>,
    pub session_id: String,
}

/// Event streamed back to the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatEvent {
    Chunk(String),
    Error(String),
}

impl ChatEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, ChatEvent::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_eq_is_case_insensitive() {
        let p = Passage::new("1", "text").with_metadata("type", "Timetable");
        assert!(MetadataFilter::eq("type", "timetable").matches(&p));
        assert!(!MetadataFilter::eq("type", "fares").matches(&p));
    }

    #[test]
    fn test_filter_missing_field() {
        let p = Passage::new("1", "text");
        let eq = MetadataFilter::eq("type", "x");
        let ne = MetadataFilter {
            op: FilterOp::Ne,
            ..eq.clone()
        };
        assert!(!eq.matches(&p));
        assert!(ne.matches(&p));
    }

    #[test]
    fn test_filter_contains() {
        let p = Passage::new("1", "t").with_metadata("source", "https://example.org/Fares/2024");
        let f = MetadataFilter {
            field: "source".into(),
            op: FilterOp::Contains,
            value: "fares".into(),
        };
        assert!(f.matches(&p));
    }

    #[test]
    fn test_filter_op_parse_is_exact() {
        assert_eq!(FilterOp::parse("EQ"), Some(FilterOp::Eq));
        assert_eq!(FilterOp::parse("contains"), Some(FilterOp::Contains));
        assert_eq!(FilterOp::parse("equals_ish"), None);
        assert_eq!(FilterOp::parse("e"), None);
    }

    #[test]
    fn test_chat_event_serializes_snake_case() {
        let json = serde_json::to_value(ChatEvent::Chunk("hi".into())).unwrap();
        assert_eq!(json, serde_json::json!({ "chunk": "hi" }));
        let json = serde_json::to_value(ChatEvent::Error("bad".into())).unwrap();
        assert_eq!(json, serde_json::json!({ "error": "bad" }));
    }

    #[test]
    fn test_role_round_trips_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }
}
