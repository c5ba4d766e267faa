//! Safety Center Model
//!
//! Shared vocabulary for every other crate in the workspace:
//! - Identity keys for sources, issues, users and refresh broadcasts
//! - Severity scales (per source and overall)
//! - Data reported by sources and the events that accompany it
//! - Refresh reasons and the request types they translate to
//! - The persisted form of issue dismissal state
//!
//! # Example
//!
//! ```rust
//! use sc_model::{IssueCategory, SafetySourceData, SafetySourceIssue, SeverityLevel, SourceKey, UserId};
//!
//! let key = SourceKey::new("lock_screen", UserId::new(0));
//! let data = SafetySourceData::new().with_issue(SafetySourceIssue::new(
//!     "no_pin",
//!     "Set a screen lock",
//!     SeverityLevel::CriticalWarning,
//!     IssueCategory::Device,
//! ));
//!
//! assert_eq!(key.source_id(), "lock_screen");
//! assert_eq!(data.max_severity_level(), Some(SeverityLevel::CriticalWarning));
//! ```

#![warn(unreachable_pub)]

mod data;
mod error;
mod keys;
mod record;
mod refresh;
mod severity;

pub use data::{
    IssueAction, IssueCategory, SafetyEvent, SafetySourceData, SafetySourceIssue,
    SafetySourceStatus,
};
pub use error::ModelError;
pub use keys::{BroadcastId, IssueKey, SourceKey, UserId};
pub use record::PersistedRecord;
pub use refresh::{RefreshReason, RefreshStatus, RequestType};
pub use severity::{OverallSeverity, SeverityLevel};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
