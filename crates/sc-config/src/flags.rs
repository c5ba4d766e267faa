//! Policy flags
//!
//! Every value has a default so a config file only lists what it
//! overrides. Durations are stored in milliseconds.

use sc_model::{IssueCategory, RefreshReason, SeverityLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

const DAY_MILLIS: u64 = 24 * 60 * 60 * 1000;

/// Resurfacing limits looked up per issue severity
pub trait ResurfacePolicy {
    /// Dismissals allowed to resurface before the issue stays dismissed
    fn max_resurface_count(&self, level: SeverityLevel) -> u32;

    /// Time after a dismissal before the issue resurfaces
    fn resurface_delay(&self, level: SeverityLevel) -> Duration;
}

/// One value per severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityValues<T> {
    /// For `SeverityLevel::Unspecified`
    pub unspecified: T,
    /// For `SeverityLevel::Information`
    pub information: T,
    /// For `SeverityLevel::Recommendation`
    pub recommendation: T,
    /// For `SeverityLevel::CriticalWarning`
    pub critical_warning: T,
}

impl<T: Copy> SeverityValues<T> {
    /// Same value for every level
    #[must_use]
    pub fn uniform(value: T) -> Self {
        Self {
            unspecified: value,
            information: value,
            recommendation: value,
            critical_warning: value,
        }
    }

    /// Value for `level`
    #[inline]
    #[must_use]
    pub fn get(&self, level: SeverityLevel) -> T {
        match level {
            SeverityLevel::Unspecified => self.unspecified,
            SeverityLevel::Information => self.information,
            SeverityLevel::Recommendation => self.recommendation,
            SeverityLevel::CriticalWarning => self.critical_warning,
        }
    }

    /// Replace the value for `level`
    #[must_use]
    pub fn with(mut self, level: SeverityLevel, value: T) -> Self {
        match level {
            SeverityLevel::Unspecified => self.unspecified = value,
            SeverityLevel::Information => self.information = value,
            SeverityLevel::Recommendation => self.recommendation = value,
            SeverityLevel::CriticalWarning => self.critical_warning = value,
        }
        self
    }
}

/// Timeout override for one refresh reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonTimeout {
    /// Reason the override applies to
    pub reason: RefreshReason,
    /// Timeout in milliseconds
    pub millis: u64,
}

/// Sources allowed to report issues of a category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryAllowlist {
    /// Restricted category
    pub category: IssueCategory,
    /// Sources allowed to use it
    pub source_ids: BTreeSet<String>,
}

/// Tunable policy values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyCenterFlags {
    /// Safety center is turned on
    pub enabled: bool,
    /// Device supports the safety center at all
    pub supported: bool,
    /// Package that hosts the safety center UI
    pub owning_package_name: String,
    /// Render timed-out sources as error entries
    pub show_error_entries_on_timeout: bool,
    /// Resurfacing budget per severity
    pub resurface_max_count: SeverityValues<u32>,
    /// Resurfacing delay per severity
    pub resurface_delay_millis: SeverityValues<u64>,
    /// Refresh timeout when no override matches
    pub refresh_timeout_millis: u64,
    /// Per-reason refresh timeouts
    pub refresh_timeouts: Vec<ReasonTimeout>,
    /// Time an issue action may stay in flight
    pub resolve_action_timeout_millis: u64,
    /// Delay before dirty dismissal state is written
    pub persist_write_delay_millis: u64,
    /// Age after which reported data counts as stale
    pub stale_data_age_millis: u64,
    /// Sources whose refresh answers are not waited for
    pub untracked_sources: BTreeSet<String>,
    /// Category restrictions
    pub issue_category_allowlists: Vec<CategoryAllowlist>,
}

impl Default for SafetyCenterFlags {
    fn default() -> Self {
        Self {
            enabled: true,
            supported: true,
            owning_package_name: "com.android.permissioncontroller".to_string(),
            show_error_entries_on_timeout: false,
            resurface_max_count: SeverityValues::uniform(0),
            resurface_delay_millis: SeverityValues::uniform(180 * DAY_MILLIS),
            refresh_timeout_millis: 15_000,
            refresh_timeouts: vec![ReasonTimeout {
                reason: RefreshReason::RescanButtonClick,
                millis: 60_000,
            }],
            resolve_action_timeout_millis: 10_000,
            persist_write_delay_millis: 500,
            stale_data_age_millis: DAY_MILLIS,
            untracked_sources: BTreeSet::new(),
            issue_category_allowlists: Vec::new(),
        }
    }
}

impl SafetyCenterFlags {
    /// Default flags
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With error entries shown for timed-out sources
    #[inline]
    #[must_use]
    pub fn with_error_entries_on_timeout(mut self, show: bool) -> Self {
        self.show_error_entries_on_timeout = show;
        self
    }

    /// With a resurfacing budget and delay for `level`
    #[inline]
    #[must_use]
    pub fn with_resurface(mut self, level: SeverityLevel, max_count: u32, delay: Duration) -> Self {
        self.resurface_max_count = self.resurface_max_count.with(level, max_count);
        self.resurface_delay_millis = self
            .resurface_delay_millis
            .with(level, duration_millis(delay));
        self
    }

    /// With a refresh timeout for `reason`
    #[must_use]
    pub fn with_refresh_timeout(mut self, reason: RefreshReason, timeout: Duration) -> Self {
        self.refresh_timeouts.retain(|t| t.reason != reason);
        self.refresh_timeouts.push(ReasonTimeout {
            reason,
            millis: duration_millis(timeout),
        });
        self
    }

    /// With an untracked source
    #[inline]
    #[must_use]
    pub fn with_untracked_source(mut self, source_id: impl Into<String>) -> Self {
        self.untracked_sources.insert(source_id.into());
        self
    }

    /// Restrict `category` to `source_ids`
    #[must_use]
    pub fn with_category_allowlist<I, S>(mut self, category: IssueCategory, source_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issue_category_allowlists.retain(|a| a.category != category);
        self.issue_category_allowlists.push(CategoryAllowlist {
            category,
            source_ids: source_ids.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Timeout for a refresh started for `reason`
    #[must_use]
    pub fn refresh_timeout(&self, reason: RefreshReason) -> Duration {
        let millis = self
            .refresh_timeouts
            .iter()
            .find(|t| t.reason == reason)
            .map_or(self.refresh_timeout_millis, |t| t.millis);
        Duration::from_millis(millis)
    }

    /// Resolve timeout for issue actions
    #[inline]
    #[must_use]
    pub fn resolve_action_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_action_timeout_millis)
    }

    /// Delay before writing dirty dismissal state
    #[inline]
    #[must_use]
    pub fn persist_write_delay(&self) -> Duration {
        Duration::from_millis(self.persist_write_delay_millis)
    }

    /// Maximum age of fresh data
    #[inline]
    #[must_use]
    pub fn stale_data_age(&self) -> Duration {
        Duration::from_millis(self.stale_data_age_millis)
    }

    /// Whether refresh answers from `source_id` are waited for
    #[inline]
    #[must_use]
    pub fn is_tracked(&self, source_id: &str) -> bool {
        !self.untracked_sources.contains(source_id)
    }

    /// Whether `source_id` may report issues of `category`
    #[must_use]
    pub fn is_category_allowed(&self, category: IssueCategory, source_id: &str) -> bool {
        self.issue_category_allowlists
            .iter()
            .find(|a| a.category == category)
            .map_or(true, |a| a.source_ids.contains(source_id))
    }
}

impl ResurfacePolicy for SafetyCenterFlags {
    fn max_resurface_count(&self, level: SeverityLevel) -> u32 {
        self.resurface_max_count.get(level)
    }

    fn resurface_delay(&self, level: SeverityLevel) -> Duration {
        Duration::from_millis(self.resurface_delay_millis.get(level))
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
