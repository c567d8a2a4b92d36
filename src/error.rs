//! Error taxonomy for the answer pipeline.
//!
//! None of these ever reach an end caller: the orchestrator converts every
//! failure into a fallback-tier [`AnswerResult`](crate::models::AnswerResult).
//! They exist so components can report *why* they degraded, and so logs carry
//! a stable classification.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Source documents for a jurisdiction are missing or unreadable.
    #[error("corpus unavailable for '{jurisdiction}': {reason}")]
    CorpusUnavailable { jurisdiction: String, reason: String },

    /// The retrieval worker did not finish before its deadline.
    #[error("retrieval timed out after {}ms", .elapsed.as_millis())]
    RetrievalTimeout { elapsed: Duration },

    /// The generative backend failed, or extractive synthesis found nothing.
    #[error("synthesis failed: {0}")]
    SynthesisFailure(String),

    /// The durable cache store could not be read or written.
    #[error("cache I/O error: {0}")]
    CacheIo(String),
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::CacheIo(err.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::SynthesisFailure(err.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_reports_millis() {
        let err = PipelineError::RetrievalTimeout {
            elapsed: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "retrieval timed out after 1500ms");
    }

    #[test]
    fn test_corpus_unavailable_names_jurisdiction() {
        let err = PipelineError::CorpusUnavailable {
            jurisdiction: "florida".to_string(),
            reason: "no documents found".to_string(),
        };
        assert!(err.to_string().contains("florida"));
    }
}
