//! Error types for the breakdown pipeline
//!
//! Provides the error taxonomy for:
//! - Request validation (rejected before any stage runs)
//! - Issue tracker lookups and write-back
//! - Isolated per-persona analysis failures
//! - Synthesizer output checks
//! - Configuration and persona loading

use crate::types::ItemKind;
use serde::{Deserialize, Serialize};

/// Main pipeline error type
///
/// Everything that can terminate a run. Per-persona failures are deliberately
/// absent: they are reported as [`PersonaError`] and never abort the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum BreakdownError {
    /// Bad or missing request fields
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Issue identifier does not resolve in the tracker
    #[error("issue not found: {0}")]
    NotFound(String),

    /// Tracker transport, auth or write failure
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// Synthesizer produced an unusable breakdown
    #[error("synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl BreakdownError {
    /// Stable classification used in terminal error events
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::NotFound(_) => ErrorKind::NotFoundError,
            Self::Upstream(_) => ErrorKind::UpstreamError,
            Self::Synthesis(_) => ErrorKind::SynthesisError,
            Self::Config(_) => ErrorKind::ConfigError,
        }
    }

    /// Check if the request was rejected before any stage ran
    #[inline]
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if error is retryable
    ///
    /// Only tracker transport failures are worth retrying; everything else
    /// fails the same way on a second attempt.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream(_))
    }
}

impl From<TrackerError> for BreakdownError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::NotFound(id) => Self::NotFound(id),
            TrackerError::Upstream(message) => Self::Upstream(message),
        }
    }
}

/// Error classification carried in terminal error events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request rejected before the pipeline started
    ValidationError,
    /// Issue identifier unresolvable
    NotFoundError,
    /// Tracker transport/auth/write failure
    UpstreamError,
    /// Invalid synthesizer output
    SynthesisError,
    /// Invalid configuration
    ConfigError,
}

/// Request validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// `issue_id` missing or blank
    #[error("issue_id is required")]
    MissingIssueId,

    /// `issue_id` present but unusable as a tracker key
    #[error("issue_id must not contain whitespace: {0:?}")]
    InvalidIssueId(String),

    /// Request body could not be decoded
    #[error("malformed request: {0}")]
    Malformed(String),

    /// Write-back requested from a pipeline without a writer
    #[error("create_items requested but no issue writer is configured")]
    WriteBackUnavailable,
}

/// Errors returned by issue tracker collaborators
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    /// Identifier does not resolve
    #[error("issue not found: {0}")]
    NotFound(String),

    /// Transport, auth or write failure
    #[error("{0}")]
    Upstream(String),
}

impl TrackerError {
    /// Create an upstream error
    #[inline]
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }
}

/// Isolated per-persona failure
///
/// Logged and dropped by the fan-out; only affects which personas
/// contribute to synthesis.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersonaError {
    /// Analyzer reported a failure
    #[error("persona {persona} failed: {reason}")]
    AnalysisFailed {
        /// Persona key
        persona: String,
        /// Failure reason
        reason: String,
    },

    /// Analyzer did not answer in time
    #[error("persona {persona} timed out after {duration_secs}s")]
    Timeout {
        /// Persona key
        persona: String,
        /// Elapsed budget
        duration_secs: u64,
    },

    /// Nothing to analyze
    #[error("persona {0} received an empty description")]
    EmptyDescription(String),
}

impl PersonaError {
    /// Create an analysis failure
    #[inline]
    pub fn failed(persona: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AnalysisFailed {
            persona: persona.into(),
            reason: reason.into(),
        }
    }

    /// Persona the failure belongs to
    #[must_use]
    pub fn persona(&self) -> &str {
        match self {
            Self::AnalysisFailed { persona, .. } | Self::Timeout { persona, .. } => persona,
            Self::EmptyDescription(persona) => persona,
        }
    }
}

/// Priority name outside `Lowest..=Highest`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown priority: {0:?}")]
pub struct UnknownPriority(pub String);

/// Breakdown integrity errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SynthesisError {
    /// At least one epic is required
    #[error("breakdown has no epics")]
    NoEpics,

    /// Epic titles are used as parent references and must be unique
    #[error("duplicate epic title: {0:?}")]
    DuplicateEpic(String),

    /// Story parent does not name an epic of the same breakdown
    #[error("story {story:?} references unknown epic {parent:?}")]
    DanglingParent {
        /// Story title
        story: String,
        /// Unresolved parent reference
        parent: String,
    },

    /// Item placed in the wrong list
    #[error("item {title:?} is a {found}, expected {expected}")]
    WrongKind {
        /// Item title
        title: String,
        /// Kind required by the list
        expected: ItemKind,
        /// Kind found
        found: ItemKind,
    },

    /// Synthesizer-specific failure
    #[error("{0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakdown_error_display() {
        let err = BreakdownError::from(ValidationError::MissingIssueId);
        assert!(err.to_string().contains("issue_id is required"));
        assert!(err.is_rejection());
    }

    #[test]
    fn tracker_errors_map_onto_taxonomy() {
        let not_found = BreakdownError::from(TrackerError::NotFound("PROJ-9".into()));
        assert_eq!(not_found.kind(), ErrorKind::NotFoundError);

        let upstream = BreakdownError::from(TrackerError::upstream("503"));
        assert_eq!(upstream.kind(), ErrorKind::UpstreamError);
        assert!(upstream.to_string().contains("503"));
    }

    #[test]
    fn only_upstream_is_retryable() {
        assert!(BreakdownError::Upstream("reset".into()).is_retryable());
        assert!(!BreakdownError::NotFound("X-1".into()).is_retryable());
        assert!(!BreakdownError::Config("bad".into()).is_retryable());
        assert!(!BreakdownError::from(SynthesisError::NoEpics).is_retryable());
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::NotFoundError).unwrap();
        assert_eq!(json, "\"not_found_error\"");
    }

    #[test]
    fn persona_error_names_persona() {
        let err = PersonaError::Timeout {
            persona: "STAFF_ENGINEER".into(),
            duration_secs: 5,
        };
        assert_eq!(err.persona(), "STAFF_ENGINEER");
        assert!(err.to_string().contains("5s"));
    }
}
