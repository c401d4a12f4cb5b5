/// Error taxonomy for the coding pipeline.
///
/// Validation errors are never repaired: they abort the current document or
/// chunk and carry enough context (document, range, code name) to diagnose.
use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::llm::{LlmError, Stage};
use crate::model::{AnalysisMode, SentenceId};

/// Errors raised by the library.
#[derive(Error, Debug)]
pub enum CoderError {
    #[error("cannot segment {document}: {reason}")]
    Segmentation { document: String, reason: String },

    #[error("invalid code book: code {name:?} {reason}")]
    CodeBookValidation { name: String, reason: String },

    #[error("invalid chunk plan for {document}: {violation}")]
    ChunkPlanValidation {
        document: String,
        violation: PlanViolation,
    },

    #[error("invalid code reference in {document}{}: {reason}", fmt_range(.range))]
    CodeReference {
        document: String,
        range: Option<(SentenceId, SentenceId)>,
        reason: String,
    },

    #[error("{stage} call failed for {subject}: {source}")]
    Llm {
        stage: Stage,
        subject: String,
        #[source]
        source: LlmError,
    },

    #[error("{}: {source}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("code book is for {found} but the run requested {expected}")]
    ModeMismatch {
        expected: AnalysisMode,
        found: AnalysisMode,
    },
}

fn fmt_range(range: &Option<(SentenceId, SentenceId)>) -> String {
    match range {
        Some((start, end)) => format!(" [{start}-{end}]"),
        None => String::new(),
    }
}

impl CoderError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: impl Into<io::Error>) -> Self {
        Self::Persistence {
            path: path.into(),
            source: source.into(),
        }
    }

    pub(crate) fn code_book(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CodeBookValidation {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Why a chunk plan was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanViolation {
    /// `start > end`, `start < 1` or `end > sentence_count`. Bounds are kept
    /// as the planner sent them, negative values included.
    Malformed {
        start: i64,
        end: i64,
        sentence_count: usize,
    },
    Overlap {
        first: (SentenceId, SentenceId),
        second: (SentenceId, SentenceId),
    },
    Gap {
        after: Option<(SentenceId, SentenceId)>,
        missing: (SentenceId, SentenceId),
    },
    Empty { sentence_count: usize },
}

impl fmt::Display for PlanViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed {
                start,
                end,
                sentence_count,
            } => write!(
                f,
                "range [{start}-{end}] is malformed for a document of {sentence_count} sentences"
            ),
            Self::Overlap { first, second } => write!(
                f,
                "ranges [{}-{}] and [{}-{}] overlap",
                first.0, first.1, second.0, second.1
            ),
            Self::Gap {
                after: Some(prev),
                missing,
            } => write!(
                f,
                "sentences {}-{} after range [{}-{}] are not covered",
                missing.0, missing.1, prev.0, prev.1
            ),
            Self::Gap {
                after: None,
                missing,
            } => write!(f, "sentences {}-{} are not covered", missing.0, missing.1),
            Self::Empty { sentence_count } => {
                write!(f, "no ranges given for {sentence_count} sentences")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_message_names_both_ranges() {
        let err = CoderError::ChunkPlanValidation {
            document: "a.txt".into(),
            violation: PlanViolation::Overlap {
                first: (1, 3),
                second: (2, 4),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("a.txt"));
        assert!(msg.contains("[1-3]"));
        assert!(msg.contains("[2-4]"));
    }

    #[test]
    fn test_code_reference_message_with_range() {
        let err = CoderError::CodeReference {
            document: "b.md".into(),
            range: Some((4, 7)),
            reason: "unknown code \"Joy\"".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid code reference in b.md [4-7]: unknown code \"Joy\""
        );
    }

    #[test]
    fn test_gap_at_start() {
        let v = PlanViolation::Gap {
            after: None,
            missing: (1, 2),
        };
        assert_eq!(v.to_string(), "sentences 1-2 are not covered");
    }
}
