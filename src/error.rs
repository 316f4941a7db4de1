//! Error taxonomy for the usage pipeline.
//!
//! Entry-level faults ([`MalformedEntry`], [`PricingUnavailable`]) are
//! recoverable and never abort a run. [`ReconstructionError`] signals a
//! caller contract violation and is the only condition allowed to halt
//! processing.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A raw record failed validation. Names the offending field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed entry: `{field}` {reason}")]
pub struct MalformedEntry {
    pub field: &'static str,
    pub reason: String,
}

impl MalformedEntry {
    pub fn missing(field: &'static str) -> Self {
        Self {
            field,
            reason: "is missing".to_string(),
        }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// No pricing rate could be found for a model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no pricing available for model `{model}`")]
pub struct PricingUnavailable {
    pub model: String,
}

/// Contract violations detected by the block reconstructor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconstructionError {
    #[error("entries are not sorted by timestamp: index {index} ({current}) precedes {previous}")]
    Unsorted {
        index: usize,
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error("mixed sessions in a single-session reconstruction: expected `{expected}`, found `{found}` at index {index}")]
    MixedSessions {
        index: usize,
        expected: String,
        found: String,
    },
}

/// Fatal pipeline errors surfaced by [`crate::analyzer::UsageAnalyzer`].
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    Reconstruction(#[from] ReconstructionError),
}

pub type Result<T, E = AnalysisError> = std::result::Result<T, E>;
