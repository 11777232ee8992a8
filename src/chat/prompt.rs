use std::fmt::Write;

use crate::error::{RagError, RagResult};
use crate::llm::query_expand::sanitize_for_prompt;
use crate::models::ScoredPassage;

pub const CONTEXT_PLACEHOLDER: &str = "{context}";
pub const QUESTION_PLACEHOLDER: &str = "{question}";

const MAX_QUERY_LEN: usize = 2000;

const DEFAULT_TEMPLATE: &str = "You are an assistant that answers questions about a document collection.\n\
Answer ONLY from the context below. Never use outside knowledge.\n\
If the context does not contain the answer, say that you do not know.\n\
When a passage has a source link, mention it where it supports the answer.\n\n\
Context:\n{context}\n\
---\n\
Question: {question}\n\
Answer:";

/// Prompt text with `{context}` and `{question}` slots.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> RagResult<Self> {
        let text = text.into();
        for placeholder in [CONTEXT_PLACEHOLDER, QUESTION_PLACEHOLDER] {
            if !text.contains(placeholder) {
                return Err(RagError::Configuration(format!(
                    "prompt template is missing the {placeholder} placeholder"
                )));
            }
        }
        Ok(Self { text })
    }

    /// Fill both slots in one pass; inserted text is never re-scanned.
    pub fn render(&self, context: &str, question: &str) -> String {
        self.text
            .split(CONTEXT_PLACEHOLDER)
            .map(|part| part.replace(QUESTION_PLACEHOLDER, question))
            .collect::<Vec<_>>()
            .join(context)
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            text: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

/// Render retrieved passages, with their source links, as the context block.
pub fn build_context_block(passages: &[ScoredPassage]) -> String {
    if passages.is_empty() {
        return "(No relevant passages were found for this question.)\n".to_string();
    }

    let mut ctx = String::new();
    for (i, hit) in passages.iter().enumerate() {
        let text = sanitize_for_prompt(&hit.passage.text);
        let _ = match hit.passage.source() {
            Some(source) => write!(ctx, "--- [{}] source: {} ---\n{}\n\n", i + 1, source, text),
            None => write!(ctx, "--- [{}] ---\n{}\n\n", i + 1, text),
        };
    }
    ctx
}

/// Trimmed, sanitized and length-capped user question.
pub fn clean_question(query: &str) -> String {
    sanitize_for_prompt(truncate_to_char_boundary(query.trim(), MAX_QUERY_LEN))
}

/// Distinct source links of `passages`, in retrieval order.
pub fn collect_sources(passages: &[ScoredPassage]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for source in passages.iter().filter_map(|p| p.passage.source()) {
        if !sources.iter().any(|s| s == source) {
            sources.push(source.to_string());
        }
    }
    sources
}

/// Second-pass prompt that weaves source links into a finished answer.
pub fn build_refinement_prompt(answer: &str, sources: &[String]) -> String {
    let links: String = sources.iter().map(|s| format!("- {s}\n")).collect();
    format!(
        "Here is an answer written for a user:\n\n{answer}\n\n\
         These source links back the answer:\n{links}\n\
         Rewrite the answer so that each link appears where it is most relevant. \
         Keep the meaning and language of the answer. Do not add new facts. \
         Reply with the rewritten answer only."
    )
}

fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
