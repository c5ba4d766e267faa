//! Issue dismissal cache
//!
//! Tracks, per [`IssueKey`], when an issue was first seen, when it was last
//! dismissed and how many times. Resurfacing is bounded both by count and
//! by time: a dismissed issue comes back after the configured delay, until
//! it has been dismissed more often than the configured maximum, after
//! which it stays dismissed.
//!
//! Records are created and removed only by [`IssueDismissalCache::reconcile`]
//! (driven by source reports), bulk clears, and [`IssueDismissalCache::load`]
//! dropping records of sources that are no longer configured.

use crate::clock::Clock;
use chrono::{DateTime, TimeDelta, Utc};
use sc_config::{ResurfacePolicy, SafetyCenterConfig};
use sc_model::{IssueKey, PersistedRecord, SeverityLevel, SourceKey, UserId};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Dismissal state of one issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DismissalRecord {
    /// When the issue was first reported
    pub first_seen_at: DateTime<Utc>,
    /// Last dismissal
    pub dismissed_at: Option<DateTime<Utc>>,
    /// Dismissals so far
    pub dismiss_count: u32,
}

impl DismissalRecord {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            first_seen_at: now,
            dismissed_at: None,
            dismiss_count: 0,
        }
    }
}

/// Dismissal state of every tracked issue
#[derive(Debug)]
pub struct IssueDismissalCache {
    records: BTreeMap<IssueKey, DismissalRecord>,
    dirty: bool,
    clock: Arc<dyn Clock>,
}

impl IssueDismissalCache {
    /// Empty, clean cache
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: BTreeMap::new(),
            dirty: false,
            clock,
        }
    }

    /// Whether `key` is currently hidden from the user
    ///
    /// Unknown and never-dismissed issues are not dismissed.
    #[must_use]
    pub fn is_dismissed(
        &self,
        key: &IssueKey,
        severity_level: SeverityLevel,
        policy: &dyn ResurfacePolicy,
    ) -> bool {
        let Some(record) = self.records.get(key) else {
            return false;
        };
        let Some(dismissed_at) = record.dismissed_at else {
            return false;
        };
        if record.dismiss_count > policy.max_resurface_count(severity_level) {
            return true;
        }
        let elapsed = self.clock.now() - dismissed_at;
        elapsed < to_delta(policy.resurface_delay(severity_level))
    }

    /// When a currently dismissed issue will resurface
    ///
    /// `None` if the issue is not dismissed or will never resurface.
    #[must_use]
    pub fn resurface_at(
        &self,
        key: &IssueKey,
        severity_level: SeverityLevel,
        policy: &dyn ResurfacePolicy,
    ) -> Option<DateTime<Utc>> {
        let record = self.records.get(key)?;
        let dismissed_at = record.dismissed_at?;
        if record.dismiss_count > policy.max_resurface_count(severity_level) {
            return None;
        }
        let at = dismissed_at.checked_add_signed(to_delta(policy.resurface_delay(severity_level)))?;
        (at > self.clock.now()).then_some(at)
    }

    /// Record a dismissal of `key`
    ///
    /// Returns `false` and leaves the cache untouched when the key is not
    /// tracked.
    pub fn dismiss(&mut self, key: &IssueKey) -> bool {
        let now = self.clock.now();
        let Some(record) = self.records.get_mut(key) else {
            tracing::warn!("Dismissing untracked issue {}", key);
            return false;
        };
        record.dismissed_at = Some(now);
        record.dismiss_count = record.dismiss_count.saturating_add(1);
        self.dirty = true;
        true
    }

    /// Align records of `source_key` with the issue ids it just reported
    ///
    /// Forgets issues no longer reported and starts tracking new ones.
    pub fn reconcile<'a, I>(&mut self, source_key: &SourceKey, reported_issue_ids: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let reported: HashSet<&str> = reported_issue_ids.into_iter().collect();
        let before = self.records.len();
        self.records
            .retain(|key, _| !key.belongs_to(source_key) || reported.contains(key.issue_id()));
        let mut changed = self.records.len() != before;

        let now = self.clock.now();
        for issue_id in reported {
            let key = source_key.issue(issue_id);
            if !self.records.contains_key(&key) {
                self.records.insert(key, DismissalRecord::fresh(now));
                changed = true;
            }
        }

        if changed {
            self.dirty = true;
        }
    }

    /// Persistable copy of every record; clears the dirty flag
    pub fn snapshot(&mut self) -> Vec<PersistedRecord> {
        self.dirty = false;
        self.records
            .iter()
            .map(|(key, record)| PersistedRecord {
                key: key.clone(),
                first_seen_at: record.first_seen_at,
                dismissed_at: record.dismissed_at,
                dismiss_count: record.dismiss_count,
            })
            .collect()
    }

    /// Replace the cache with persisted records
    ///
    /// Records of sources missing from `config` are dropped and leave the
    /// cache dirty so the pruned state gets written back.
    pub fn load(&mut self, records: Vec<PersistedRecord>, config: &SafetyCenterConfig) {
        self.records.clear();
        self.dirty = false;
        for record in records {
            if !config.is_external_source(record.key.source_id()) {
                tracing::info!("Dropping dismissal record of unconfigured source: {}", record.key);
                self.dirty = true;
                continue;
            }
            self.records.insert(
                record.key,
                DismissalRecord {
                    first_seen_at: record.first_seen_at,
                    dismissed_at: record.dismissed_at,
                    dismiss_count: record.dismiss_count,
                },
            );
        }
    }

    /// Drop records of sources missing from `config`
    pub fn retain_configured(&mut self, config: &SafetyCenterConfig) {
        let before = self.records.len();
        self.records
            .retain(|key, _| config.is_external_source(key.source_id()));
        if self.records.len() != before {
            tracing::info!(
                "Dropped {} dismissal records of unconfigured sources",
                before - self.records.len()
            );
            self.dirty = true;
        }
    }

    /// Remove every record
    pub fn clear(&mut self) {
        self.records.clear();
        self.dirty = true;
    }

    /// Remove every record of `user_id`
    pub fn clear_for_user(&mut self, user_id: UserId) {
        self.records.retain(|key, _| key.user_id() != user_id);
        self.dirty = true;
    }

    /// Record of `key`, if tracked
    #[must_use]
    pub fn record(&self, key: &IssueKey) -> Option<&DismissalRecord> {
        self.records.get(key)
    }

    /// Flag a snapshot that failed to persist
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Whether memory diverged from the last snapshot
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of tracked issues
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is tracked
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn to_delta(duration: std::time::Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
