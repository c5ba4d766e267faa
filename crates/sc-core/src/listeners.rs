//! Listener registry and change-only delivery
//!
//! Listeners register per profile group (keyed by the group's profile
//! parent). Delivery iterates a snapshot of the registrations, so
//! listeners may register or unregister from inside a callback. A
//! listener only receives a view that differs from the last one it got.
//!
//! Every view carries the sequence number it was assembled under.
//! Deliveries are serialized by one reentrant lock and a registration
//! drops any view older than the last one it was offered.

use crate::aggregation::AggregateView;
use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex};
use sc_model::UserId;
use std::fmt;
use std::sync::Arc;

/// Receives aggregated views and errors
pub trait SafetyCenterListener: Send + Sync {
    /// Aggregated view changed
    fn on_data_changed(&self, view: &AggregateView);

    /// Something went wrong that the user may want to know about
    fn on_error(&self, error: &ErrorDetails) {
        let _ = error;
    }
}

/// Kind of reported error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Some sources did not answer a refresh in time
    RefreshTimeout,
    /// A resolving action reported failure
    ActionFailed,
    /// A resolving action never reported back
    ActionTimeout,
}

/// Error delivered to listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetails {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorDetails {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Default)]
struct Delivered {
    sequence: u64,
    view: Option<AggregateView>,
}

struct Registration {
    package_name: String,
    listener: Arc<dyn SafetyCenterListener>,
    last: Mutex<Delivered>,
}

impl Registration {
    /// Deliver unless stale or equal to the last delivered view
    fn offer(&self, sequence: u64, view: &AggregateView) -> bool {
        {
            let mut last = self.last.lock();
            if sequence <= last.sequence {
                tracing::trace!(
                    "Dropping view {} for {}, already at {}",
                    sequence,
                    self.package_name,
                    last.sequence
                );
                return false;
            }
            last.sequence = sequence;
            if last.view.as_ref() == Some(view) {
                return false;
            }
            last.view = Some(view.clone());
        }
        self.listener.on_data_changed(view);
        true
    }
}

/// Listeners per profile group
#[derive(Default)]
pub struct ListenerRegistry {
    groups: DashMap<UserId, Vec<Arc<Registration>>>,
    delivery: ReentrantMutex<()>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for the group of `profile_parent`
    ///
    /// Returns `false` if the same listener is already registered there.
    pub fn register(
        &self,
        profile_parent: UserId,
        package_name: impl Into<String>,
        listener: Arc<dyn SafetyCenterListener>,
    ) -> bool {
        let mut registrations = self.groups.entry(profile_parent).or_default();
        if registrations
            .iter()
            .any(|r| Arc::ptr_eq(&r.listener, &listener))
        {
            return false;
        }
        registrations.push(Arc::new(Registration {
            package_name: package_name.into(),
            listener,
            last: Mutex::new(Delivered::default()),
        }));
        true
    }

    /// Remove `listener` from every group; returns whether it was found
    pub fn unregister(&self, listener: &Arc<dyn SafetyCenterListener>) -> bool {
        let mut found = false;
        for mut entry in self.groups.iter_mut() {
            let before = entry.len();
            entry.retain(|r| !Arc::ptr_eq(&r.listener, listener));
            found |= entry.len() != before;
        }
        self.groups.retain(|_, registrations| !registrations.is_empty());
        found
    }

    /// Drop every listener of the group of `profile_parent`
    pub fn clear_for_user(&self, profile_parent: UserId) -> usize {
        self.groups
            .remove(&profile_parent)
            .map_or(0, |(_, registrations)| registrations.len())
    }

    /// Profile parents with at least one listener, ascending
    #[must_use]
    pub fn listened_groups(&self) -> Vec<UserId> {
        let mut parents: Vec<UserId> = self.groups.iter().map(|e| *e.key()).collect();
        parents.sort();
        parents
    }

    /// Distinct packages listening to the group of `profile_parent`, sorted
    #[must_use]
    pub fn packages(&self, profile_parent: UserId) -> Vec<String> {
        let mut packages: Vec<String> = self
            .snapshot(profile_parent)
            .iter()
            .map(|r| r.package_name.clone())
            .collect();
        packages.sort();
        packages.dedup();
        packages
    }

    fn snapshot(&self, profile_parent: UserId) -> Vec<Arc<Registration>> {
        self.groups
            .get(&profile_parent)
            .map(|registrations| registrations.value().clone())
            .unwrap_or_default()
    }

    /// Offer `view`, assembled for `package_name` under `sequence`, to the
    /// group's listeners registered by that package; returns deliveries made
    pub fn deliver(
        &self,
        profile_parent: UserId,
        package_name: &str,
        sequence: u64,
        view: &AggregateView,
    ) -> usize {
        let _delivering = self.delivery.lock();
        let delivered = self
            .snapshot(profile_parent)
            .iter()
            .filter(|r| r.package_name == package_name)
            .filter(|r| r.offer(sequence, view))
            .count();
        if delivered > 0 {
            tracing::debug!(
                "Delivered view of user {} to {} listeners",
                profile_parent,
                delivered
            );
        }
        delivered
    }

    /// Offer `view` only to `listener`, if registered for the group
    pub fn deliver_to(
        &self,
        profile_parent: UserId,
        listener: &Arc<dyn SafetyCenterListener>,
        sequence: u64,
        view: &AggregateView,
    ) -> bool {
        let _delivering = self.delivery.lock();
        self.snapshot(profile_parent)
            .iter()
            .find(|r| Arc::ptr_eq(&r.listener, listener))
            .is_some_and(|r| r.offer(sequence, view))
    }

    /// Send `error` to every listener of the group
    pub fn deliver_error(&self, profile_parent: UserId, error: &ErrorDetails) {
        let _delivering = self.delivery.lock();
        for registration in self.snapshot(profile_parent) {
            registration.listener.on_error(error);
        }
    }

    /// Total registrations
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.iter().map(|e| e.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::SafetyCenterStatus;
    use sc_model::OverallSeverity;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        views: AtomicUsize,
        errors: AtomicUsize,
    }

    impl SafetyCenterListener for Counting {
        fn on_data_changed(&self, _view: &AggregateView) {
            self.views.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, _error: &ErrorDetails) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn view(severity: OverallSeverity) -> AggregateView {
        AggregateView {
            status: SafetyCenterStatus {
                severity,
                ..SafetyCenterStatus::default()
            },
            ..AggregateView::default()
        }
    }

    #[test]
    fn register_is_idempotent_per_group() {
        let registry = ListenerRegistry::new();
        let listener: Arc<dyn SafetyCenterListener> = Arc::new(Counting::default());

        assert!(registry.register(UserId::new(0), "com.settings", Arc::clone(&listener)));
        assert!(!registry.register(UserId::new(0), "com.settings", Arc::clone(&listener)));
        assert!(registry.register(UserId::new(10), "com.settings", Arc::clone(&listener)));
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister(&listener));
        assert!(!registry.unregister(&listener));
        assert!(registry.is_empty());
        assert!(registry.listened_groups().is_empty());
    }

    #[test]
    fn delivers_only_changes() {
        let registry = ListenerRegistry::new();
        let counting = Arc::new(Counting::default());
        let listener: Arc<dyn SafetyCenterListener> = counting.clone();
        registry.register(UserId::new(0), "com.settings", listener);

        let parent = UserId::new(0);
        assert_eq!(registry.deliver(parent, "com.settings", 1, &view(OverallSeverity::Ok)), 1);
        assert_eq!(registry.deliver(parent, "com.settings", 2, &view(OverallSeverity::Ok)), 0);
        assert_eq!(
            registry.deliver(parent, "com.settings", 3, &view(OverallSeverity::CriticalWarning)),
            1
        );
        assert_eq!(
            registry.deliver(UserId::new(10), "com.settings", 4, &view(OverallSeverity::Ok)),
            0
        );
        assert_eq!(counting.views.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn older_views_never_replace_newer_ones() {
        let registry = ListenerRegistry::new();
        let counting = Arc::new(Counting::default());
        registry.register(UserId::new(0), "com.settings", counting.clone());

        let parent = UserId::new(0);
        assert_eq!(
            registry.deliver(parent, "com.settings", 7, &view(OverallSeverity::CriticalWarning)),
            1
        );
        // assembled before 7, dispatched after it
        assert_eq!(registry.deliver(parent, "com.settings", 6, &view(OverallSeverity::Ok)), 0);
        assert_eq!(registry.deliver(parent, "com.settings", 7, &view(OverallSeverity::Ok)), 0);
        assert_eq!(counting.views.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn views_go_to_the_package_they_were_assembled_for() {
        let registry = ListenerRegistry::new();
        let settings = Arc::new(Counting::default());
        let other = Arc::new(Counting::default());
        registry.register(UserId::new(0), "com.settings", settings.clone());
        registry.register(UserId::new(0), "com.other", other.clone());
        assert_eq!(
            registry.packages(UserId::new(0)),
            vec!["com.other".to_string(), "com.settings".to_string()]
        );

        registry.deliver(UserId::new(0), "com.other", 1, &view(OverallSeverity::Ok));
        assert_eq!(settings.views.load(Ordering::SeqCst), 0);
        assert_eq!(other.views.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn errors_reach_group_listeners() {
        let registry = ListenerRegistry::new();
        let counting = Arc::new(Counting::default());
        registry.register(UserId::new(0), "com.settings", counting.clone());

        registry.deliver_error(
            UserId::new(0),
            &ErrorDetails::new(ErrorKind::RefreshTimeout, "timed out"),
        );
        registry.deliver_error(
            UserId::new(10),
            &ErrorDetails::new(ErrorKind::RefreshTimeout, "timed out"),
        );
        assert_eq!(counting.errors.load(Ordering::SeqCst), 1);
        assert_eq!(registry.packages(UserId::new(0)), vec!["com.settings".to_string()]);
    }
}
