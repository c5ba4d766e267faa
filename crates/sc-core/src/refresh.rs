//! Refresh tracking
//!
//! At most one refresh is tracked at a time. Starting a refresh expands
//! the broadcast topology over a profile group into the (source, user)
//! pairs expected to answer. Each pair moves from `Pending` to exactly one
//! terminal state; the refresh is over once no pair is pending.
//!
//! Answers carrying a broadcast id other than the current one come from an
//! abandoned refresh and are ignored.

use crate::clock::{Clock, SystemClock};
use crate::transport::RefreshRequest;
use crate::users::UserProfileGroup;
use sc_config::Broadcast;
use sc_model::{BroadcastId, RefreshReason, RefreshStatus, RequestType, SourceKey, UserId};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Per-pair refresh state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceRefreshState {
    /// Waiting for an answer
    Pending,
    /// Source answered with data
    Completed,
    /// Source answered with an error
    Failed,
    /// No answer before the deadline
    TimedOut,
}

impl SourceRefreshState {
    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != SourceRefreshState::Pending
    }
}

/// States reachable from `from`
#[must_use]
pub fn allowed_transitions(from: SourceRefreshState) -> Vec<SourceRefreshState> {
    use SourceRefreshState::*;
    match from {
        Pending => vec![Completed, Failed, TimedOut],
        Completed | Failed | TimedOut => vec![],
    }
}

/// Whether `from -> to` is a legal pair transition
#[must_use]
pub fn is_allowed(from: SourceRefreshState, to: SourceRefreshState) -> bool {
    allowed_transitions(from).contains(&to)
}

/// The refresh currently tracked
#[derive(Debug, Clone)]
pub struct RefreshInProgress {
    broadcast_id: BroadcastId,
    reason: RefreshReason,
    request_type: RequestType,
    group: UserProfileGroup,
    states: BTreeMap<SourceKey, SourceRefreshState>,
    pending: BTreeSet<SourceKey>,
}

impl RefreshInProgress {
    /// Correlation id
    #[inline]
    #[must_use]
    pub fn broadcast_id(&self) -> &BroadcastId {
        &self.broadcast_id
    }

    /// Why the refresh started
    #[inline]
    #[must_use]
    pub fn reason(&self) -> RefreshReason {
        self.reason
    }

    /// What sources were asked to do
    #[inline]
    #[must_use]
    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    /// Group being refreshed
    #[inline]
    #[must_use]
    pub fn group(&self) -> &UserProfileGroup {
        &self.group
    }

    /// Pairs still expected to answer
    #[inline]
    #[must_use]
    pub fn pending(&self) -> &BTreeSet<SourceKey> {
        &self.pending
    }

    /// State of one pair, if it is part of this refresh
    #[must_use]
    pub fn state(&self, key: &SourceKey) -> Option<SourceRefreshState> {
        self.states.get(key).copied()
    }
}

/// Outcome of starting a refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPlan {
    /// Correlation id to put on every request
    pub broadcast_id: BroadcastId,
    /// Requests the caller must dispatch, one per package and user
    pub requests: Vec<RefreshRequest>,
    /// Number of pairs waited for
    pub tracked_count: usize,
    /// Nothing to wait for; no refresh is in flight
    pub completed_immediately: bool,
}

/// Tracks the refresh in flight, if any
#[derive(Debug)]
pub struct RefreshTracker {
    current: Option<RefreshInProgress>,
    counter: u64,
    clock: Arc<dyn Clock>,
}

impl Default for RefreshTracker {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl RefreshTracker {
    /// Tracker with nothing in flight
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker salting broadcast ids with `clock`'s time
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            current: None,
            counter: 0,
            clock,
        }
    }

    /// Start tracking a refresh, replacing any refresh in flight
    ///
    /// Managed-profile sources are asked once per running managed profile.
    /// On page open only page-open sources are asked, plus any source for
    /// which `needs_data` holds. Sources in `untracked` receive requests
    /// but are not waited for.
    pub fn start(
        &mut self,
        reason: RefreshReason,
        request_type: RequestType,
        group: &UserProfileGroup,
        broadcasts: &[Broadcast],
        untracked: &BTreeSet<String>,
        needs_data: impl Fn(&SourceKey) -> bool,
    ) -> RefreshPlan {
        self.counter += 1;
        let broadcast_id = self.next_broadcast_id(reason, group);
        let page_open = reason == RefreshReason::PageOpen;

        let mut requests = Vec::new();
        let mut pending = BTreeSet::new();
        for broadcast in broadcasts {
            let mut add = |user_id: UserId, all: &[String], on_page_open: &[String]| {
                let source_ids: Vec<String> = all
                    .iter()
                    .filter(|id| {
                        !page_open
                            || on_page_open.contains(id)
                            || needs_data(&SourceKey::new(id.as_str(), user_id))
                    })
                    .cloned()
                    .collect();
                if source_ids.is_empty() {
                    return;
                }
                for id in source_ids.iter().filter(|id| !untracked.contains(*id)) {
                    pending.insert(SourceKey::new(id.as_str(), user_id));
                }
                requests.push(RefreshRequest {
                    package_name: broadcast.package_name.clone(),
                    source_ids,
                    user_id,
                    request_type,
                    broadcast_id: broadcast_id.clone(),
                });
            };

            add(
                group.profile_parent(),
                broadcast.source_ids_for_profile_parent.as_slice(),
                broadcast.source_ids_for_profile_parent_on_page_open.as_slice(),
            );
            for &profile in group.running_managed_profiles() {
                add(
                    profile,
                    broadcast.source_ids_for_managed_profiles.as_slice(),
                    broadcast.source_ids_for_managed_profiles_on_page_open.as_slice(),
                );
            }
        }

        if let Some(previous) = self.current.take() {
            tracing::warn!(
                "Replacing refresh {} ({} sources still pending) with {}",
                previous.broadcast_id,
                previous.pending.len(),
                broadcast_id
            );
        }

        let tracked_count = pending.len();
        let completed_immediately = pending.is_empty();
        if completed_immediately {
            tracing::info!("Refresh {} for {} has nothing to wait for", broadcast_id, reason);
        } else {
            tracing::info!(
                "Refresh {} for {} started, waiting for {} sources",
                broadcast_id,
                reason,
                tracked_count
            );
            self.current = Some(RefreshInProgress {
                broadcast_id: broadcast_id.clone(),
                reason,
                request_type,
                group: group.clone(),
                states: pending
                    .iter()
                    .map(|key| (key.clone(), SourceRefreshState::Pending))
                    .collect(),
                pending,
            });
        }

        RefreshPlan {
            broadcast_id,
            requests,
            tracked_count,
            completed_immediately,
        }
    }

    /// Source answered with data; returns whether the refresh just completed
    pub fn source_completed(&mut self, key: &SourceKey, broadcast_id: &BroadcastId) -> bool {
        self.retire(key, broadcast_id, SourceRefreshState::Completed)
    }

    /// Source answered with an error; returns whether the refresh just completed
    pub fn source_failed(&mut self, key: &SourceKey, broadcast_id: &BroadcastId) -> bool {
        self.retire(key, broadcast_id, SourceRefreshState::Failed)
    }

    /// Deadline passed for a pair; returns whether the refresh just completed
    pub fn timeout(&mut self, key: &SourceKey, broadcast_id: &BroadcastId) -> bool {
        self.retire(key, broadcast_id, SourceRefreshState::TimedOut)
    }

    /// Time out every pending pair of `broadcast_id`
    ///
    /// Returns the pairs that timed out; empty on id mismatch.
    pub fn timeout_all(&mut self, broadcast_id: &BroadcastId) -> Vec<SourceKey> {
        let pending: Vec<SourceKey> = match &self.current {
            Some(current) if current.broadcast_id == *broadcast_id => {
                current.pending.iter().cloned().collect()
            }
            _ => {
                tracing::warn!("Timeout for refresh {} which is not in flight", broadcast_id);
                return Vec::new();
            }
        };
        for key in &pending {
            self.timeout(key, broadcast_id);
        }
        pending
    }

    fn retire(
        &mut self,
        key: &SourceKey,
        broadcast_id: &BroadcastId,
        to: SourceRefreshState,
    ) -> bool {
        let Some(current) = self.current.as_mut() else {
            tracing::warn!("{:?} for {} but no refresh in flight", to, key);
            return false;
        };
        if current.broadcast_id != *broadcast_id {
            tracing::warn!(
                "{:?} for {} with stale broadcast id {} (current {})",
                to,
                key,
                broadcast_id,
                current.broadcast_id
            );
            return false;
        }
        let Some(state) = current.states.get_mut(key) else {
            tracing::warn!("{:?} for {} which is not part of refresh {}", to, key, broadcast_id);
            return false;
        };
        if !is_allowed(*state, to) {
            tracing::warn!("Ignoring {:?} -> {:?} for {}", state, to, key);
            return false;
        }

        *state = to;
        current.pending.remove(key);
        tracing::debug!(
            "{} is {:?}, {} still pending in refresh {}",
            key,
            to,
            current.pending.len(),
            broadcast_id
        );

        if current.pending.is_empty() {
            tracing::info!("Refresh {} completed", broadcast_id);
            self.current = None;
            return true;
        }
        false
    }

    /// Stop tracking `broadcast_id`; returns whether it was in flight
    pub fn clear(&mut self, broadcast_id: &BroadcastId) -> bool {
        match &self.current {
            Some(current) if current.broadcast_id == *broadcast_id => {
                tracing::info!("Clearing refresh {}", broadcast_id);
                self.current = None;
                true
            }
            _ => false,
        }
    }

    /// Stop tracking whatever is in flight
    pub fn clear_all(&mut self) -> Option<BroadcastId> {
        self.current.take().map(|current| {
            tracing::info!("Clearing refresh {}", current.broadcast_id);
            current.broadcast_id
        })
    }

    /// Stop tracking the refresh if it involves `user_id`
    pub fn clear_for_user(&mut self, user_id: UserId) -> Option<BroadcastId> {
        let involved = self
            .current
            .as_ref()
            .is_some_and(|current| current.group.contains(user_id));
        if involved {
            self.clear_all()
        } else {
            None
        }
    }

    /// Refresh in flight, if any
    #[inline]
    #[must_use]
    pub fn current(&self) -> Option<&RefreshInProgress> {
        self.current.as_ref()
    }

    /// Whether a refresh is in flight
    #[inline]
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.current.is_some()
    }

    /// Whether `key` is still awaited
    #[must_use]
    pub fn is_pending(&self, key: &SourceKey) -> bool {
        self.current
            .as_ref()
            .is_some_and(|current| current.pending.contains(key))
    }

    /// Refresh status as seen by `group`
    #[must_use]
    pub fn refresh_status(&self, group: &UserProfileGroup) -> RefreshStatus {
        match &self.current {
            Some(current) if current.group.profile_parent() == group.profile_parent() => {
                current.reason.in_progress_status()
            }
            _ => RefreshStatus::None,
        }
    }

    fn next_broadcast_id(&self, reason: RefreshReason, group: &UserProfileGroup) -> BroadcastId {
        let mut hasher = Sha256::new();
        hasher.update(self.counter.to_le_bytes());
        hasher.update(reason.value().to_le_bytes());
        hasher.update(group.profile_parent().get().to_le_bytes());
        hasher.update(std::process::id().to_le_bytes());
        let now = self.clock.now();
        hasher.update(now.timestamp().to_le_bytes());
        hasher.update(now.timestamp_subsec_nanos().to_le_bytes());
        let digest = hex::encode(hasher.finalize());
        BroadcastId::new(format!("{}-{}", self.counter, &digest[..12]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcasts() -> Vec<Broadcast> {
        vec![
            Broadcast {
                package_name: "com.settings".to_string(),
                source_ids_for_profile_parent: vec!["a".to_string(), "b".to_string()],
                source_ids_for_profile_parent_on_page_open: vec!["a".to_string()],
                source_ids_for_managed_profiles: vec!["b".to_string()],
                source_ids_for_managed_profiles_on_page_open: vec![],
            },
            Broadcast {
                package_name: "com.gms".to_string(),
                source_ids_for_profile_parent: vec!["c".to_string()],
                ..Broadcast::default()
            },
        ]
    }

    fn group() -> UserProfileGroup {
        UserProfileGroup::new(
            UserId::new(0),
            [(UserId::new(10), true), (UserId::new(11), false)],
        )
    }

    fn start(tracker: &mut RefreshTracker, reason: RefreshReason) -> RefreshPlan {
        tracker.start(
            reason,
            reason.request_type(),
            &group(),
            &broadcasts(),
            &BTreeSet::new(),
            |_| false,
        )
    }

    #[test]
    fn expands_topology_over_group() {
        let mut tracker = RefreshTracker::new();
        let plan = start(&mut tracker, RefreshReason::RescanButtonClick);

        // a, b, c for the parent and b for the one running profile
        assert_eq!(plan.tracked_count, 4);
        assert_eq!(plan.requests.len(), 3);
        assert!(plan
            .requests
            .iter()
            .all(|r| r.request_type == RequestType::FetchFreshData));
        let current = tracker.current().unwrap();
        assert!(current.pending().contains(&SourceKey::new("b", UserId::new(10))));
        assert!(!current.pending().contains(&SourceKey::new("b", UserId::new(11))));
        assert_eq!(
            tracker.refresh_status(&group()),
            RefreshStatus::FullRescanInProgress
        );
    }

    #[test]
    fn broadcast_ids_follow_the_injected_clock() {
        let clock = Arc::new(crate::clock::ManualClock::at_epoch());
        let mut first = RefreshTracker::with_clock(clock.clone());
        let mut second = RefreshTracker::with_clock(clock.clone());

        let a = start(&mut first, RefreshReason::Other).broadcast_id;
        let b = start(&mut second, RefreshReason::Other).broadcast_id;
        assert_eq!(a, b);

        clock.advance(std::time::Duration::from_secs(1));
        let mut third = RefreshTracker::with_clock(clock);
        assert_ne!(start(&mut third, RefreshReason::Other).broadcast_id, a);
    }

    #[test]
    fn page_open_asks_page_open_sources_and_sources_without_data() {
        let mut tracker = RefreshTracker::new();
        let needs = SourceKey::new("c", UserId::new(0));
        let plan = tracker.start(
            RefreshReason::PageOpen,
            RequestType::GetData,
            &group(),
            &broadcasts(),
            &BTreeSet::new(),
            |key| *key == needs,
        );

        let pending = tracker.current().unwrap().pending().clone();
        assert_eq!(plan.tracked_count, 2);
        assert!(pending.contains(&SourceKey::new("a", UserId::new(0))));
        assert!(pending.contains(&needs));
        assert!(!pending.contains(&SourceKey::new("b", UserId::new(0))));
    }

    #[test]
    fn untracked_sources_get_requests_but_are_not_awaited() {
        let mut tracker = RefreshTracker::new();
        let untracked: BTreeSet<String> = ["c".to_string()].into_iter().collect();
        let plan = tracker.start(
            RefreshReason::Periodic,
            RequestType::GetData,
            &UserProfileGroup::single(UserId::new(0)),
            &broadcasts(),
            &untracked,
            |_| false,
        );

        assert_eq!(plan.tracked_count, 2);
        assert!(plan.requests.iter().any(|r| r.source_ids == vec!["c".to_string()]));
    }

    #[test]
    fn completes_only_when_all_pairs_retire() {
        let mut tracker = RefreshTracker::new();
        let plan = tracker.start(
            RefreshReason::Other,
            RequestType::GetData,
            &UserProfileGroup::single(UserId::new(0)),
            &broadcasts(),
            &BTreeSet::new(),
            |_| false,
        );
        let id = plan.broadcast_id;

        assert!(!tracker.source_completed(&SourceKey::new("a", UserId::new(0)), &id));
        assert!(!tracker.source_failed(&SourceKey::new("b", UserId::new(0)), &id));
        assert!(tracker.is_in_progress());
        assert!(tracker.timeout(&SourceKey::new("c", UserId::new(0)), &id));
        assert!(!tracker.is_in_progress());
    }

    #[test]
    fn repeated_answer_is_ignored() {
        let mut tracker = RefreshTracker::new();
        let id = start(&mut tracker, RefreshReason::Other).broadcast_id;
        let key = SourceKey::new("a", UserId::new(0));

        assert!(!tracker.source_completed(&key, &id));
        assert!(!tracker.timeout(&key, &id));
        assert_eq!(
            tracker.current().unwrap().state(&key),
            Some(SourceRefreshState::Completed)
        );
    }

    #[test]
    fn stale_ids_are_ignored() {
        let mut tracker = RefreshTracker::new();
        let first = start(&mut tracker, RefreshReason::Other).broadcast_id;
        let second = start(&mut tracker, RefreshReason::Other).broadcast_id;
        assert_ne!(first, second);

        let key = SourceKey::new("a", UserId::new(0));
        assert!(!tracker.source_completed(&key, &first));
        assert!(tracker.is_pending(&key));

        assert!(tracker.clear(&second));
        assert!(!tracker.source_completed(&key, &second));
        assert!(!tracker.clear(&second));
    }

    #[test]
    fn empty_refresh_completes_immediately() {
        let mut tracker = RefreshTracker::new();
        let plan = tracker.start(
            RefreshReason::Other,
            RequestType::GetData,
            &group(),
            &[],
            &BTreeSet::new(),
            |_| false,
        );
        assert!(plan.completed_immediately);
        assert!(plan.requests.is_empty());
        assert!(!tracker.is_in_progress());
    }

    #[test]
    fn timeout_all_retires_remaining() {
        let mut tracker = RefreshTracker::new();
        let id = start(&mut tracker, RefreshReason::Other).broadcast_id;
        tracker.source_completed(&SourceKey::new("a", UserId::new(0)), &id);

        let timed_out = tracker.timeout_all(&id);
        assert_eq!(timed_out.len(), 3);
        assert!(!tracker.is_in_progress());
        assert!(tracker.timeout_all(&id).is_empty());
    }

    #[test]
    fn clear_for_user_only_when_involved() {
        let mut tracker = RefreshTracker::new();
        start(&mut tracker, RefreshReason::Other);
        assert!(tracker.clear_for_user(UserId::new(42)).is_none());
        assert!(tracker.clear_for_user(UserId::new(10)).is_some());
        assert!(!tracker.is_in_progress());
    }

    #[test]
    fn transitions_only_leave_pending() {
        use SourceRefreshState::*;
        for to in [Completed, Failed, TimedOut] {
            assert!(is_allowed(Pending, to));
            assert!(to.is_terminal());
            assert!(allowed_transitions(to).is_empty());
        }
        assert!(!is_allowed(Pending, Pending));
    }
}
