//! Persisted dismissal state

use crate::keys::IssueKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Serialized form of one issue's dismissal state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    /// Issue the record belongs to
    pub key: IssueKey,
    /// When the issue was first reported
    pub first_seen_at: DateTime<Utc>,
    /// Last dismissal, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dismissed_at: Option<DateTime<Utc>>,
    /// Number of dismissals so far
    #[serde(default)]
    pub dismiss_count: u32,
}
