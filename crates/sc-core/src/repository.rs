//! Latest report per source key
//!
//! Reports are replaced wholesale; there is no incremental merge. A source
//! key can additionally be marked errored, which a fresh report clears.

use chrono::{DateTime, Utc};
use sc_config::SafetyCenterConfig;
use sc_model::{IssueKey, SafetySourceData, SafetySourceIssue, SourceKey, UserId};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// One stored report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    /// Reported data
    pub data: SafetySourceData,
    /// When it arrived
    pub received_at: DateTime<Utc>,
}

/// Store of the latest source reports
#[derive(Debug, Default)]
pub struct DataRepository {
    reports: BTreeMap<SourceKey, SourceReport>,
    errored: BTreeSet<SourceKey>,
}

impl DataRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` for `key`, or forget it when `None`
    ///
    /// Clears any error mark. Returns whether anything visible changed.
    pub fn set(
        &mut self,
        key: &SourceKey,
        data: Option<SafetySourceData>,
        received_at: DateTime<Utc>,
    ) -> bool {
        let was_errored = self.errored.remove(key);
        let changed = match data {
            Some(data) => {
                let changed = self.reports.get(key).map(|r| &r.data) != Some(&data);
                self.reports
                    .insert(key.clone(), SourceReport { data, received_at });
                changed
            }
            None => self.reports.remove(key).is_some(),
        };
        changed || was_errored
    }

    /// Stored report for `key`
    #[inline]
    #[must_use]
    pub fn get(&self, key: &SourceKey) -> Option<&SourceReport> {
        self.reports.get(key)
    }

    /// Stored data for `key`
    #[must_use]
    pub fn data(&self, key: &SourceKey) -> Option<&SafetySourceData> {
        self.reports.get(key).map(|r| &r.data)
    }

    /// Issue by key, if its source currently reports it
    #[must_use]
    pub fn issue(&self, key: &IssueKey) -> Option<&SafetySourceIssue> {
        self.data(&key.source_key())?.issue(key.issue_id())
    }

    /// Mark `key` errored; returns whether it was not already
    pub fn mark_error(&mut self, key: &SourceKey) -> bool {
        self.errored.insert(key.clone())
    }

    #[must_use]
    pub fn is_errored(&self, key: &SourceKey) -> bool {
        self.errored.contains(key)
    }

    /// Whether `key` has no data or data older than `max_age`
    #[must_use]
    pub fn is_stale(&self, key: &SourceKey, now: DateTime<Utc>, max_age: Duration) -> bool {
        let Some(report) = self.reports.get(key) else {
            return true;
        };
        match (now - report.received_at).to_std() {
            Ok(age) => age >= max_age,
            // received in the future
            Err(_) => false,
        }
    }

    /// Whether `key` contributes to the view: has data or is errored
    #[must_use]
    pub fn is_active(&self, key: &SourceKey) -> bool {
        self.reports.contains_key(key) || self.errored.contains(key)
    }

    /// Whether stats for `key` may be logged
    #[must_use]
    pub fn is_loggable(&self, key: &SourceKey, config: &SafetyCenterConfig) -> bool {
        config
            .source(key.source_id())
            .is_some_and(|source| source.logging_allowed)
    }

    /// Source keys with stored data
    pub fn keys(&self) -> impl Iterator<Item = &SourceKey> {
        self.reports.keys()
    }

    /// Drop everything; returns whether anything was stored
    pub fn clear(&mut self) -> bool {
        let had_any = !self.reports.is_empty() || !self.errored.is_empty();
        self.reports.clear();
        self.errored.clear();
        had_any
    }

    /// Drop everything stored for `user_id`
    pub fn clear_for_user(&mut self, user_id: UserId) -> bool {
        let before = self.reports.len() + self.errored.len();
        self.reports.retain(|key, _| key.user_id() != user_id);
        self.errored.retain(|key| key.user_id() != user_id);
        before != self.reports.len() + self.errored.len()
    }

    /// Drop data of sources that are no longer configured as external
    pub fn retain_configured(&mut self, config: &SafetyCenterConfig) {
        let before = self.reports.len();
        self.reports
            .retain(|key, _| config.is_external_source(key.source_id()));
        self.errored
            .retain(|key| config.is_external_source(key.source_id()));
        let dropped = before - self.reports.len();
        if dropped > 0 {
            tracing::info!("Dropped {} reports of unconfigured sources", dropped);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}
