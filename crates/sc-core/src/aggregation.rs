//! Aggregation of source reports into one view per profile group
//!
//! Assembly never fails: anything missing or inconsistent is logged and
//! treated as absent data. The output is fully ordered so that two
//! assemblies over the same state compare equal, which listener delivery
//! relies on.
//!
//! Issue order:
//! 1. Severity, highest first
//! 2. Source declaration order in the configuration
//! 3. User id
//! 4. Order within the source's report

use crate::actions::{ActionKey, ActionsInFlight};
use crate::dismissal::IssueDismissalCache;
use crate::repository::DataRepository;
use crate::users::UserProfileGroup;
use sc_config::{InitialDisplayState, SafetyCenterConfig, SafetyCenterFlags, SafetySource};
use sc_model::{
    IssueCategory, IssueKey, OverallSeverity, RefreshStatus, SeverityLevel, SourceKey, UserId,
};
use serde::Serialize;
use std::cmp::Reverse;

/// Everything a listener sees for one profile group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateView {
    /// Overall status
    pub status: SafetyCenterStatus,
    /// Visible issues, ordered
    pub issues: Vec<IssueView>,
    /// Dismissed issues, same order
    pub dismissed_issues: Vec<IssueView>,
    /// One entry per non issue-only source and applicable user
    pub entries: Vec<EntryView>,
    /// Counts over loggable sources
    pub stats: IssueStats,
}

impl AggregateView {
    /// Visible issue by key
    #[must_use]
    pub fn issue(&self, key: &IssueKey) -> Option<&IssueView> {
        self.issues.iter().find(|issue| issue.key == *key)
    }
}

/// Overall status of a profile group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SafetyCenterStatus {
    /// Highest severity over visible issues and source statuses
    pub severity: OverallSeverity,
    /// Refresh in flight for this group
    pub refresh_status: RefreshStatus,
    /// Sources currently shown as errored
    pub error_entry_count: usize,
}

/// One visible issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueView {
    pub key: IssueKey,
    pub title: String,
    pub summary: String,
    pub severity_level: SeverityLevel,
    pub category: IssueCategory,
    pub actions: Vec<ActionView>,
}

/// One action of a visible issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionView {
    pub id: String,
    pub label: String,
    pub will_resolve: bool,
    /// Dispatched and awaiting an outcome
    pub in_flight: bool,
}

/// Entry of one source for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryView {
    pub source_key: SourceKey,
    pub group_id: String,
    pub state: EntryState,
}

/// What an entry shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntryState {
    /// Reported status
    Data {
        title: String,
        summary: String,
        severity_level: SeverityLevel,
        enabled: bool,
    },
    /// Nothing reported yet, or reported without status
    NoData { enabled: bool },
    /// Last refresh failed or timed out
    Error,
}

/// Issue counts over sources allowed to log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IssueStats {
    /// Sources with data
    pub active_sources: usize,
    /// Issues shown
    pub open_issues: usize,
    /// Issues hidden by dismissal
    pub dismissed_issues: usize,
}

impl IssueStats {
    /// Emit as a structured stats event
    pub fn log(&self, group: &UserProfileGroup, severity: OverallSeverity) {
        tracing::info!(
            target: "safety_center::stats",
            user = %group.profile_parent(),
            severity = ?severity,
            active_sources = self.active_sources,
            open_issues = self.open_issues,
            dismissed_issues = self.dismissed_issues,
            "safety center stats"
        );
    }
}

struct RankedIssue {
    view: IssueView,
    dismissed: bool,
    source_order: usize,
    user_id: UserId,
    index: usize,
}

/// Builds [`AggregateView`]s from the engine state
#[derive(Debug, Clone, Copy)]
pub struct SafetyCenterDataFactory<'a> {
    config: &'a SafetyCenterConfig,
    flags: &'a SafetyCenterFlags,
    repository: &'a DataRepository,
    dismissals: &'a IssueDismissalCache,
    actions: &'a ActionsInFlight,
    refresh_status: RefreshStatus,
}

impl<'a> SafetyCenterDataFactory<'a> {
    #[must_use]
    pub fn new(
        config: &'a SafetyCenterConfig,
        flags: &'a SafetyCenterFlags,
        repository: &'a DataRepository,
        dismissals: &'a IssueDismissalCache,
        actions: &'a ActionsInFlight,
        refresh_status: RefreshStatus,
    ) -> Self {
        Self {
            config,
            flags,
            repository,
            dismissals,
            actions,
            refresh_status,
        }
    }

    /// Assemble the view of `group` for `calling_package`
    #[must_use]
    pub fn assemble(&self, calling_package: &str, group: &UserProfileGroup) -> AggregateView {
        tracing::trace!(
            "Assembling view of user {} for {}",
            group.profile_parent(),
            calling_package
        );

        let mut entries = Vec::new();
        let mut ranked = Vec::new();
        let mut max_level: Option<SeverityLevel> = None;
        let mut has_data = false;
        let mut error_entry_count = 0;
        let mut stats = IssueStats::default();

        for (source_order, source) in self.config.external_sources().enumerate() {
            let Some(group_id) = self.config.group_of(&source.id).map(|g| g.id.clone()) else {
                tracing::warn!("Source {} has no group", source.id);
                continue;
            };
            for user_id in applicable_users(source, group) {
                let key = SourceKey::new(source.id.as_str(), user_id);
                let loggable = source.logging_allowed;
                let errored = self.repository.is_errored(&key);
                let data = self.repository.data(&key);

                if errored {
                    error_entry_count += 1;
                }

                if let Some(data) = data {
                    has_data = true;
                    if loggable {
                        stats.active_sources += 1;
                    }
                    if let Some(status) = &data.status {
                        max_level = max_level.max(Some(status.severity_level));
                    }
                    for (index, issue) in data.issues.iter().enumerate() {
                        let issue_key = key.issue(issue.id.as_str());
                        let dismissed = self.dismissals.is_dismissed(
                            &issue_key,
                            issue.severity_level,
                            self.flags,
                        );
                        if dismissed {
                            if loggable {
                                stats.dismissed_issues += 1;
                            }
                        } else {
                            max_level = max_level.max(Some(issue.severity_level));
                            if loggable {
                                stats.open_issues += 1;
                            }
                        }
                        ranked.push(RankedIssue {
                            view: self.issue_view(issue_key, issue),
                            dismissed,
                            source_order,
                            user_id,
                            index,
                        });
                    }
                }

                if source.is_issue_only() {
                    continue;
                }
                let state = if errored {
                    EntryState::Error
                } else {
                    match data.and_then(|d| d.status.as_ref()) {
                        Some(status) => EntryState::Data {
                            title: status.title.clone(),
                            summary: status.summary.clone(),
                            severity_level: status.severity_level,
                            enabled: status.enabled,
                        },
                        None => match source.initial_display_state {
                            InitialDisplayState::Hidden => continue,
                            InitialDisplayState::Enabled => EntryState::NoData { enabled: true },
                            InitialDisplayState::Disabled => EntryState::NoData { enabled: false },
                        },
                    }
                };
                entries.push(EntryView {
                    source_key: key,
                    group_id: group_id.clone(),
                    state,
                });
            }
        }

        ranked.sort_by_key(|r| {
            (
                Reverse(r.view.severity_level),
                r.source_order,
                r.user_id,
                r.index,
            )
        });
        let (dismissed, visible): (Vec<RankedIssue>, Vec<RankedIssue>) =
            ranked.into_iter().partition(|r| r.dismissed);

        let severity = if has_data {
            max_level.map_or(OverallSeverity::Ok, OverallSeverity::from)
        } else {
            OverallSeverity::Unknown
        };

        AggregateView {
            status: SafetyCenterStatus {
                severity,
                refresh_status: self.refresh_status,
                error_entry_count,
            },
            issues: visible.into_iter().map(|r| r.view).collect(),
            dismissed_issues: dismissed.into_iter().map(|r| r.view).collect(),
            entries,
            stats,
        }
    }

    fn issue_view(&self, key: IssueKey, issue: &sc_model::SafetySourceIssue) -> IssueView {
        let actions = issue
            .actions
            .iter()
            .map(|action| ActionView {
                id: action.id.clone(),
                label: action.label.clone(),
                will_resolve: action.will_resolve,
                in_flight: self
                    .actions
                    .is_in_flight(&ActionKey::new(key.clone(), action.id.as_str())),
            })
            .collect();
        IssueView {
            key,
            title: issue.title.clone(),
            summary: issue.summary.clone(),
            severity_level: issue.severity_level,
            category: issue.category,
            actions,
        }
    }
}

/// Users of `group` that `source` reports for
fn applicable_users(source: &SafetySource, group: &UserProfileGroup) -> Vec<UserId> {
    let mut users = vec![group.profile_parent()];
    if source.applies_to_managed_profiles() {
        users.extend_from_slice(group.running_managed_profiles());
    }
    users
}
