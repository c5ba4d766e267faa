//! Data reported by sources
//!
//! A report replaces whatever the source previously reported for the same
//! user; there is no incremental merge.

use crate::keys::BroadcastId;
use crate::severity::SeverityLevel;
use serde::{Deserialize, Serialize};

/// Top-level status of a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySourceStatus {
    /// Short title
    pub title: String,
    /// One-line summary
    pub summary: String,
    /// Severity of the source as a whole
    pub severity_level: SeverityLevel,
    /// Whether the entry is interactive
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl SafetySourceStatus {
    /// Create an enabled status
    #[inline]
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        summary: impl Into<String>,
        severity_level: SeverityLevel,
    ) -> Self {
        Self {
            title: title.into(),
            summary: summary.into(),
            severity_level,
            enabled: true,
        }
    }

    /// Mark the entry as disabled
    #[inline]
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Category of an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    /// Device security
    Device,
    /// Account security
    Account,
    /// Uncategorized
    General,
    /// Data protection
    Data,
    /// Password hygiene
    Passwords,
    /// Personal safety
    PersonalSafety,
}

/// Action a user can take on an issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueAction {
    /// Identifier, unique within the issue
    pub id: String,
    /// Button label
    pub label: String,
    /// Whether the action resolves the issue in place
    #[serde(default)]
    pub will_resolve: bool,
}

impl IssueAction {
    /// Create an action that opens something elsewhere
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            will_resolve: false,
        }
    }

    /// Action is resolved in place and reports back
    #[inline]
    #[must_use]
    pub fn resolving(mut self) -> Self {
        self.will_resolve = true;
        self
    }
}

/// One actionable finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySourceIssue {
    /// Identifier, unique within the source
    pub id: String,
    /// Short title
    pub title: String,
    /// Longer explanation
    #[serde(default)]
    pub summary: String,
    /// Severity of this issue
    pub severity_level: SeverityLevel,
    /// Category of this issue
    pub category: IssueCategory,
    /// Actions offered to the user
    #[serde(default)]
    pub actions: Vec<IssueAction>,
}

impl SafetySourceIssue {
    /// Create an issue without actions
    #[inline]
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        severity_level: SeverityLevel,
        category: IssueCategory,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            summary: String::new(),
            severity_level,
            category,
            actions: Vec::new(),
        }
    }

    /// With summary text
    #[inline]
    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// With an extra action
    #[inline]
    #[must_use]
    pub fn with_action(mut self, action: IssueAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Look up an action by id
    #[inline]
    #[must_use]
    pub fn action(&self, action_id: &str) -> Option<&IssueAction> {
        self.actions.iter().find(|a| a.id == action_id)
    }
}

/// Full report of one source for one user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySourceData {
    /// Source status, absent for issue-only sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SafetySourceStatus>,
    /// Issues in the order the source reported them
    #[serde(default)]
    pub issues: Vec<SafetySourceIssue>,
}

impl SafetySourceData {
    /// Empty report
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a status
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: SafetySourceStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// With an extra issue
    #[inline]
    #[must_use]
    pub fn with_issue(mut self, issue: SafetySourceIssue) -> Self {
        self.issues.push(issue);
        self
    }

    /// Look up an issue by id
    #[inline]
    #[must_use]
    pub fn issue(&self, issue_id: &str) -> Option<&SafetySourceIssue> {
        self.issues.iter().find(|i| i.id == issue_id)
    }

    /// Ids of all issues, in report order
    pub fn issue_ids(&self) -> impl Iterator<Item = &str> {
        self.issues.iter().map(|i| i.id.as_str())
    }

    /// Highest severity across status and issues
    #[must_use]
    pub fn max_severity_level(&self) -> Option<SeverityLevel> {
        self.status
            .iter()
            .map(|s| s.severity_level)
            .chain(self.issues.iter().map(|i| i.severity_level))
            .max()
    }
}

/// Event accompanying a source report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SafetyEvent {
    /// The source's state changed on its own
    SourceStateChanged,
    /// Answer to a refresh request
    RefreshRequested {
        /// Id of the refresh being answered
        broadcast_id: BroadcastId,
    },
    /// An in-flight issue action succeeded
    ResolvingActionSucceeded {
        /// Issue the action belongs to
        issue_id: String,
        /// Action that ran
        action_id: String,
    },
    /// An in-flight issue action failed
    ResolvingActionFailed {
        /// Issue the action belongs to
        issue_id: String,
        /// Action that ran
        action_id: String,
    },
    /// Device rebooted
    DeviceRebooted,
    /// Device locale changed
    DeviceLocaleChanged,
}

impl SafetyEvent {
    /// Refresh this event answers, if any
    #[inline]
    #[must_use]
    pub fn refresh_broadcast_id(&self) -> Option<&BroadcastId> {
        match self {
            SafetyEvent::RefreshRequested { broadcast_id } => Some(broadcast_id),
            _ => None,
        }
    }
}
