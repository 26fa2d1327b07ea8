//! Error taxonomy for one analysis run.
//!
//! Every variant is terminal for the run that produced it. Variants split
//! into two families:
//!
//! - **local**: raised before any request leaves the process
//!   (validation and corpus-size preconditions);
//! - **remote**: raised by, or while talking to, the completion service.
//!
//! [`AnalysisError::ContextOverflow`] is kept apart from
//! [`AnalysisError::Service`] because the remedy differs: shrink the corpus
//! rather than try again.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("validation failed: `modes` must select at least one analysis mode")]
    NoModes,

    #[error("validation failed: `{field}` must not be empty when its analysis mode is selected")]
    MissingQuestion { field: &'static str },

    #[error("validation failed: no documents were supplied")]
    EmptyCorpus,

    #[error("validation failed: no mapping answers exist for question `{0}`")]
    UnknownQuestion(String),

    #[error("document `{name}` cannot be read as text: {reason}")]
    UnreadableDocument { name: String, reason: String },

    #[error(
        "corpus too large: {} exceeds the {} limit; remove documents or split the corpus",
        size_label(.total_bytes),
        size_label(.limit_bytes)
    )]
    CorpusTooLarge { total_bytes: u64, limit_bytes: u64 },

    #[error("the completion service reports the input is too long; reduce the number of documents and try again ({0})")]
    ContextOverflow(String),

    #[error("completion call timed out after {0}s")]
    Timeout(u64),

    #[error("completion service error: {0}")]
    Service(String),

    #[error("completion response does not match the expected shape: {0}")]
    InvalidResponse(String),
}

impl AnalysisError {
    /// True when the run stopped before any external request was built.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            AnalysisError::NoModes
                | AnalysisError::MissingQuestion { .. }
                | AnalysisError::EmptyCorpus
                | AnalysisError::UnknownQuestion(_)
                | AnalysisError::UnreadableDocument { .. }
                | AnalysisError::CorpusTooLarge { .. }
        )
    }

    /// Machine-readable code used by the HTTP API.
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::NoModes
            | AnalysisError::MissingQuestion { .. }
            | AnalysisError::EmptyCorpus
            | AnalysisError::UnknownQuestion(_)
            | AnalysisError::UnreadableDocument { .. } => "validation_error",
            AnalysisError::CorpusTooLarge { .. } => "corpus_too_large",
            AnalysisError::ContextOverflow(_) => "context_overflow",
            AnalysisError::Timeout(_) => "timeout",
            AnalysisError::Service(_) | AnalysisError::InvalidResponse(_) => "service_error",
        }
    }
}

fn size_label(bytes: &u64) -> String {
    format_bytes(*bytes)
}

/// Human-readable byte count (`15.0 MiB`, `512 B`).
pub fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    let b = bytes as f64;
    if b >= MIB {
        format!("{:.1} MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_question_names_field() {
        let err = AnalysisError::MissingQuestion {
            field: "thematic_question",
        };
        assert!(err.to_string().contains("thematic_question"));
        assert!(err.is_local());
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn corpus_too_large_is_size_specific() {
        let err = AnalysisError::CorpusTooLarge {
            total_bytes: 16 * 1024 * 1024,
            limit_bytes: 15 * 1024 * 1024,
        };
        let msg = err.to_string();
        assert!(msg.contains("16.0 MiB"), "{}", msg);
        assert!(msg.contains("15.0 MiB"), "{}", msg);
        assert!(err.is_local());
    }

    #[test]
    fn overflow_and_service_errors_differ() {
        let overflow = AnalysisError::ContextOverflow("input token count too high".into());
        let generic = AnalysisError::Service("503 unavailable".into());
        assert_eq!(overflow.code(), "context_overflow");
        assert_eq!(generic.code(), "service_error");
        assert!(overflow.to_string().contains("reduce the number of documents"));
        assert!(!overflow.is_local());
        assert!(!generic.is_local());
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(15 * 1024 * 1024), "15.0 MiB");
    }
}
