//! Issue actions in flight
//!
//! An action is in flight from the moment it is dispatched until the
//! source reports the outcome, the resolve timeout fires, or the issue
//! disappears from the source's report.

use sc_model::{IssueKey, SafetySourceData, SourceKey, UserId};
use std::collections::BTreeSet;
use std::fmt;

/// One action of one issue
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActionKey {
    /// Issue offering the action
    pub issue: IssueKey,
    /// Action id within the issue
    pub action_id: String,
}

impl ActionKey {
    /// Key for `action_id` of `issue`
    #[inline]
    #[must_use]
    pub fn new(issue: IssueKey, action_id: impl Into<String>) -> Self {
        Self {
            issue,
            action_id: action_id.into(),
        }
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.issue, self.action_id)
    }
}

/// Actions awaiting an outcome
#[derive(Debug, Default, Clone)]
pub struct ActionsInFlight {
    actions: BTreeSet<ActionKey>,
}

impl ActionsInFlight {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` in flight; false if it already was
    pub fn begin(&mut self, key: ActionKey) -> bool {
        self.actions.insert(key)
    }

    /// Outcome arrived; false if `key` was not in flight
    pub fn finish(&mut self, key: &ActionKey) -> bool {
        self.actions.remove(key)
    }

    #[must_use]
    pub fn is_in_flight(&self, key: &ActionKey) -> bool {
        self.actions.contains(key)
    }

    /// Whether any action of `issue` is in flight
    #[must_use]
    pub fn is_issue_in_flight(&self, issue: &IssueKey) -> bool {
        self.actions.iter().any(|key| key.issue == *issue)
    }

    /// Drop actions of `source` no longer offered by its latest report
    ///
    /// Returns the dropped keys so their timeouts can be cancelled.
    pub fn retain_reported(
        &mut self,
        source: &SourceKey,
        data: Option<&SafetySourceData>,
    ) -> Vec<ActionKey> {
        let stale: Vec<ActionKey> = self
            .actions
            .iter()
            .filter(|key| key.issue.belongs_to(source))
            .filter(|key| {
                data.and_then(|d| d.issue(key.issue.issue_id()))
                    .and_then(|issue| issue.action(&key.action_id))
                    .is_none()
            })
            .cloned()
            .collect();
        for key in &stale {
            self.actions.remove(key);
        }
        stale
    }

    /// Keep only actions matching `keep`; returns the dropped keys
    pub fn retain(&mut self, keep: impl Fn(&ActionKey) -> bool) -> Vec<ActionKey> {
        let dropped: Vec<ActionKey> = self.actions.iter().filter(|k| !keep(k)).cloned().collect();
        for key in &dropped {
            self.actions.remove(key);
        }
        dropped
    }

    /// Drop everything
    pub fn clear(&mut self) -> Vec<ActionKey> {
        std::mem::take(&mut self.actions).into_iter().collect()
    }

    /// Drop actions of `user_id`
    pub fn clear_for_user(&mut self, user_id: UserId) -> Vec<ActionKey> {
        let removed: Vec<ActionKey> = self
            .actions
            .iter()
            .filter(|key| key.issue.user_id() == user_id)
            .cloned()
            .collect();
        for key in &removed {
            self.actions.remove(key);
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
