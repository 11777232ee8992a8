//! Translate a natural-language question into a metadata filter plus a
//! residual semantic query.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::llm::backend::LanguageModel;
use crate::llm::query_expand::sanitize_for_prompt;
use crate::models::{FilterOp, MetadataFilter};

/// A metadata field the model may filter on.
#[derive(Debug, Clone)]
pub struct AttributeInfo {
    pub name: String,
    pub description: String,
}

impl AttributeInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Fields exposed to filter construction unless a deployment declares its own.
pub fn default_attributes() -> Vec<AttributeInfo> {
    vec![
        AttributeInfo::new("source", "The link of the web page the passage was taken from"),
        AttributeInfo::new("type", "The type of the document"),
    ]
}

/// Output of filter construction.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredQuery {
    /// Semantic part of the question, searched by similarity.
    pub query: String,
    pub filter: Option<MetadataFilter>,
}

#[derive(Deserialize)]
struct RawStructuredQuery {
    query: Option<String>,
    filter: Option<RawFilter>,
}

#[derive(Deserialize)]
struct RawFilter {
    field: String,
    #[serde(alias = "operator", alias = "comparator")]
    op: String,
    value: serde_json::Value,
}

/// Ask the model to split `question` into a residual query and an optional filter.
pub async fn construct_query(
    model: &dyn LanguageModel,
    question: &str,
    attributes: &[AttributeInfo],
) -> Result<StructuredQuery> {
    let prompt = build_prompt(&sanitize_for_prompt(question), attributes);
    let response = model.complete(&prompt).await?;
    parse_structured_query(&response, attributes)
}

fn build_prompt(question: &str, attributes: &[AttributeInfo]) -> String {
    let fields: String = attributes
        .iter()
        .map(|a| format!("- {}: {}\n", a.name, a.description))
        .collect();
    format!(
        "Rewrite the user question as a structured search request over a document collection.\n\
         Documents carry these metadata fields:\n{fields}\n\
         Respond with ONLY a JSON object of the form \
         {{\"query\": \"<text to search for>\", \"filter\": {{\"field\": \"<field>\", \"op\": \"eq|ne|contains\", \"value\": \"<value>\"}}}}.\n\
         Use \"filter\": null when the question does not restrict any field.\n\n\
         Question: \"{question}\""
    )
}

/// Parse the model's reply. Errors mean the reply cannot be used at all;
/// a filter naming an undeclared field is dropped rather than rejected.
fn parse_structured_query(content: &str, attributes: &[AttributeInfo]) -> Result<StructuredQuery> {
    let json_str = match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => anyhow::bail!("no JSON object in filter response"),
    };

    let raw: RawStructuredQuery =
        serde_json::from_str(json_str).context("malformed structured query")?;

    let query = raw
        .query
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .context("structured query has no search text")?;

    let filter = match raw.filter {
        None => None,
        Some(f) => {
            let op = FilterOp::parse(&f.op)
                .with_context(|| format!("unknown filter operator '{}'", f.op))?;
            let value = match f.value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => anyhow::bail!("filter value is null"),
                other => other.to_string(),
            };
            let field = f.field.trim().to_lowercase();
            if attributes.iter().any(|a| a.name.eq_ignore_ascii_case(&field)) {
                Some(MetadataFilter { field, op, value })
            } else {
                tracing::warn!("Ignoring filter on undeclared field '{field}'");
                None
            }
        }
    };

    Ok(StructuredQuery { query, filter })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_with_filter() {
        let input = r#"{"query": "night buses", "filter": {"field": "type", "op": "eq", "value": "timetable"}}"#;
        let sq = parse_structured_query(input, &default_attributes()).unwrap();
        assert_eq!(sq.query, "night buses");
        assert_eq!(sq.filter, Some(MetadataFilter::eq("type", "timetable")));
    }

    #[test]
    fn test_parse_query_without_filter() {
        let input = r#"Sure! {"query": "fares for students", "filter": null}"#;
        let sq = parse_structured_query(input, &default_attributes()).unwrap();
        assert_eq!(sq.query, "fares for students");
        assert!(sq.filter.is_none());
    }

    #[test]
    fn test_parse_accepts_operator_alias() {
        let input = r#"{"query": "q", "filter": {"field": "source", "operator": "contains", "value": "fares"}}"#;
        let sq = parse_structured_query(input, &default_attributes()).unwrap();
        assert_eq!(sq.filter.unwrap().op, FilterOp::Contains);
    }

    #[test]
    fn test_parse_drops_undeclared_field() {
        let input = r#"{"query": "q", "filter": {"field": "author", "op": "eq", "value": "x"}}"#;
        let sq = parse_structured_query(input, &default_attributes()).unwrap();
        assert!(sq.filter.is_none());
    }

    #[test]
    fn test_parse_rejects_unknown_operator() {
        let input = r#"{"query": "q", "filter": {"field": "type", "op": "gte", "value": "x"}}"#;
        assert!(parse_structured_query(input, &default_attributes()).is_err());
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(parse_structured_query("no idea", &default_attributes()).is_err());
        assert!(parse_structured_query("{broken", &default_attributes()).is_err());
    }

    #[test]
    fn test_prompt_lists_fields() {
        let p = build_prompt("when?", &default_attributes());
        assert!(p.contains("- source:"));
        assert!(p.contains("- type:"));
        assert!(p.contains("Question: \"when?\""));
    }
}
