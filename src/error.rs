use thiserror::Error;

/// Reason carried by [`RagError::Retrieval`] when the corpus holds no passages.
pub const EMPTY_CORPUS: &str = "empty_corpus";

/// Errors surfaced by the retrieval and generation pipeline.
#[derive(Debug, Error)]
pub enum RagError {
    /// Backend initialization exhausted its retry budget.
    #[error("backend unavailable after {attempts} attempts: {message}")]
    BackendUnavailable { attempts: u32, message: String },

    #[error("retrieval failed: {reason}")]
    Retrieval { reason: String },

    /// The language model failed while producing an answer.
    #[error("generation failed: {0}")]
    Generation(String),

    /// Unsupported identifier or invalid parameter, detected before any network call.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("index error: {0}")]
    Index(String),
}

impl RagError {
    pub fn empty_corpus() -> Self {
        RagError::Retrieval {
            reason: EMPTY_CORPUS.to_string(),
        }
    }

    pub fn retrieval(reason: impl std::fmt::Display) -> Self {
        RagError::Retrieval {
            reason: reason.to_string(),
        }
    }

    pub fn is_empty_corpus(&self) -> bool {
        matches!(self, RagError::Retrieval { reason } if reason == EMPTY_CORPUS)
    }
}

pub type RagResult<T> = std::result::Result<T, RagError>;
