//! Error types for the safety center core
//!
//! Only calls rejected at the API boundary surface an error. Everything
//! downstream of a validated call logs and degrades instead.

use sc_model::{IssueCategory, IssueKey, SeverityLevel, UserId};
use std::path::PathBuf;

/// Error returned by [`crate::SafetyCenterService`] entry points
#[derive(Debug, thiserror::Error)]
pub enum SafetyCenterError {
    /// Safety center is turned off
    #[error("safety center is not enabled")]
    NotEnabled,

    /// Source id is not configured
    #[error("unknown source: {0}")]
    UnknownSource(String),

    /// Static sources never report data
    #[error("source {0} is static and cannot report data")]
    StaticSource(String),

    /// Caller does not own the source
    #[error("package {actual} cannot report for source {source_id} (owned by {expected})")]
    PackageMismatch {
        source_id: String,
        expected: String,
        actual: String,
    },

    /// User id unknown to the platform
    #[error("unknown user: {0}")]
    UnknownUser(UserId),

    /// Source does not report for this profile
    #[error("source {source_id} does not apply to user {user_id}")]
    NotApplicableToUser { source_id: String, user_id: UserId },

    /// Issue-only sources must not report a status
    #[error("source {0} is issue-only and cannot report a status")]
    StatusNotAllowed(String),

    /// Reported severity above the configured maximum
    #[error("source {source_id} reported {level} above its maximum {max}")]
    SeverityTooHigh {
        source_id: String,
        level: SeverityLevel,
        max: SeverityLevel,
    },

    /// Category restricted to other sources
    #[error("source {source_id} is not allowed to report {category:?} issues")]
    DisallowedCategory {
        source_id: String,
        category: IssueCategory,
    },

    /// Malformed report
    #[error("invalid data from {source_id}: {reason}")]
    InvalidData { source_id: String, reason: String },

    /// Issue not currently reported
    #[error("unknown issue: {0}")]
    UnknownIssue(IssueKey),

    /// Action not offered by the issue
    #[error("unknown action {action_id} for issue {issue}")]
    UnknownAction { issue: IssueKey, action_id: String },

    /// Action already running
    #[error("action {action_id} for issue {issue} is already in flight")]
    ActionInFlight { issue: IssueKey, action_id: String },

    /// Timer infrastructure unavailable
    #[error("timeout error: {0}")]
    Timeout(#[from] TimeoutError),

    /// Dismissal state could not be read or written
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl SafetyCenterError {
    /// Whether the caller broke the reporting protocol
    ///
    /// Protocol violations leave all state untouched.
    #[inline]
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(
            self,
            Self::NotEnabled | Self::Timeout(_) | Self::Persistence(_)
        )
    }

    /// Create an invalid data error
    pub fn invalid_data(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidData {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }
}

/// Errors of the timeout scheduler
#[derive(Debug, thiserror::Error)]
pub enum TimeoutError {
    /// No tokio runtime to run timers on
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),
}

/// Errors while loading or saving dismissal state
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// IO failure on the backing file
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Contents could not be (de)serialized
    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    /// Stored document has an unsupported version
    #[error("unsupported store version {0}")]
    UnsupportedVersion(u32),
}

impl PersistenceError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
