//! Safety center service
//!
//! [`SafetyCenterService`] is the only concurrent entry point. All engine
//! state sits behind one mutex (the API lock). Every entry point takes the
//! lock, mutates, assembles whatever listeners need, and queues outbound
//! work in an outbox. The outbox is dispatched after the guard is
//! dropped, so no transport call or listener callback ever runs under the
//! lock.
//!
//! Views are stamped with a sequence number taken under the lock, so a
//! listener never ends up holding a view older than one it already got,
//! whatever order concurrent entry points finish their dispatch in.
//!
//! Timers hold a weak reference to the service and take the lock only for
//! their state transition.

use crate::actions::{ActionKey, ActionsInFlight};
use crate::aggregation::{AggregateView, SafetyCenterDataFactory};
use crate::clock::{Clock, SystemClock};
use crate::dismissal::IssueDismissalCache;
use crate::error::SafetyCenterError;
use crate::listeners::{ErrorDetails, ErrorKind, ListenerRegistry, SafetyCenterListener};
use crate::persistence::DismissalStore;
use crate::refresh::RefreshTracker;
use crate::repository::DataRepository;
use crate::timeouts::{TimeoutKey, TimeoutScheduler};
use crate::transport::{RefreshRequest, SourceTransport};
use crate::users::{UserProfileGroup, UserTopology};
use crate::validation::{validate_caller, validate_data};
use parking_lot::Mutex;
use sc_config::{SafetyCenterConfig, SafetyCenterFlags};
use sc_model::{
    BroadcastId, IssueKey, RefreshReason, SafetyEvent, SafetySourceData, SourceKey, UserId,
};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;

/// External collaborators of the service
#[derive(Clone)]
pub struct Collaborators {
    /// Outbound wire to sources
    pub transport: Arc<dyn SourceTransport>,
    /// Dismissal state storage
    pub store: Arc<dyn DismissalStore>,
    /// Live user topology
    pub users: Arc<dyn UserTopology>,
    /// Wall clock for dismissal and staleness decisions
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Collaborators using the system clock
    #[must_use]
    pub fn new(
        transport: Arc<dyn SourceTransport>,
        store: Arc<dyn DismissalStore>,
        users: Arc<dyn UserTopology>,
    ) -> Self {
        Self {
            transport,
            store,
            users,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock
    #[inline]
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("store", &self.store)
            .field("users", &self.users)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// Everything guarded by the API lock
#[derive(Debug)]
struct SafetyCenterState {
    config: SafetyCenterConfig,
    flags: SafetyCenterFlags,
    dismissals: IssueDismissalCache,
    tracker: RefreshTracker,
    repository: DataRepository,
    actions: ActionsInFlight,
    view_sequence: u64,
}

impl SafetyCenterState {
    fn next_view_sequence(&mut self) -> u64 {
        self.view_sequence += 1;
        self.view_sequence
    }
}

/// Work to do once the API lock is released
#[derive(Default)]
struct Outbox {
    requests: Vec<RefreshRequest>,
    actions: Vec<(String, ActionKey)>,
    view_sequence: u64,
    views: Vec<(UserId, String, AggregateView)>,
    errors: Vec<(UserId, ErrorDetails)>,
}

struct Inner {
    state: Mutex<SafetyCenterState>,
    listeners: ListenerRegistry,
    timeouts: TimeoutScheduler,
    collaborators: Collaborators,
    /// Held from snapshot through save
    persist_lock: Mutex<()>,
}

/// Lock-owning facade over the engine
#[derive(Clone)]
pub struct SafetyCenterService {
    inner: Arc<Inner>,
}

impl fmt::Debug for SafetyCenterService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafetyCenterService")
            .field("listeners", &self.inner.listeners)
            .field("timeouts", &self.inner.timeouts)
            .finish_non_exhaustive()
    }
}

impl SafetyCenterService {
    /// Service running its timers on the current tokio runtime
    ///
    /// Loads persisted dismissal state. A store that cannot be read is
    /// logged and treated as empty.
    pub fn new(
        config: SafetyCenterConfig,
        flags: SafetyCenterFlags,
        collaborators: Collaborators,
    ) -> Result<Self, SafetyCenterError> {
        let handle = Handle::try_current()
            .map_err(|e| crate::error::TimeoutError::NoRuntime(e.to_string()))?;
        Ok(Self::with_runtime(config, flags, collaborators, handle))
    }

    /// Service running its timers on `handle`
    #[must_use]
    pub fn with_runtime(
        config: SafetyCenterConfig,
        flags: SafetyCenterFlags,
        collaborators: Collaborators,
        handle: Handle,
    ) -> Self {
        let mut dismissals = IssueDismissalCache::new(Arc::clone(&collaborators.clock));
        match collaborators.store.load() {
            Ok(records) => dismissals.load(records, &config),
            Err(e) => tracing::warn!("Could not load dismissal state, starting empty: {}", e),
        }
        tracing::info!(
            "Safety center started with {} sources, {} dismissal records",
            config.source_count(),
            dismissals.len()
        );

        let service = Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SafetyCenterState {
                    config,
                    flags,
                    dismissals,
                    tracker: RefreshTracker::with_clock(Arc::clone(&collaborators.clock)),
                    repository: DataRepository::new(),
                    actions: ActionsInFlight::new(),
                    view_sequence: 0,
                }),
                listeners: ListenerRegistry::new(),
                timeouts: TimeoutScheduler::new(handle),
                collaborators,
                persist_lock: Mutex::new(()),
            }),
        };
        {
            let state = service.inner.state.lock();
            service.schedule_persist(&state);
        }
        service
    }

    // ---- flags ----

    /// Whether the safety center is supported and turned on
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        let state = self.inner.state.lock();
        state.flags.supported && state.flags.enabled
    }

    /// Whether the device supports the safety center
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.inner.state.lock().flags.supported
    }

    /// Package hosting the safety center UI
    #[must_use]
    pub fn owning_package_name(&self) -> String {
        self.inner.state.lock().flags.owning_package_name.clone()
    }

    fn ensure_enabled(state: &SafetyCenterState) -> Result<(), SafetyCenterError> {
        if state.flags.supported && state.flags.enabled {
            Ok(())
        } else {
            Err(SafetyCenterError::NotEnabled)
        }
    }

    fn resolve_group(&self, user_id: UserId) -> Result<UserProfileGroup, SafetyCenterError> {
        UserProfileGroup::resolve(user_id, self.inner.collaborators.users.as_ref())
            .ok_or(SafetyCenterError::UnknownUser(user_id))
    }

    // ---- refresh ----

    /// Ask every applicable source of `user_id`'s group to report
    ///
    /// Replaces any refresh in flight. Returns the id sources must echo.
    pub fn refresh_safety_sources(
        &self,
        reason: RefreshReason,
        user_id: UserId,
    ) -> Result<BroadcastId, SafetyCenterError> {
        let group = self.resolve_group(user_id)?;
        let mut outbox = Outbox::default();
        let broadcast_id = {
            let mut guard = self.inner.state.lock();
            Self::ensure_enabled(&guard)?;
            let now = self.inner.collaborators.clock.now();
            let state = &mut *guard;
            let max_age = state.flags.stale_data_age();
            let repository = &state.repository;
            let plan = state.tracker.start(
                reason,
                reason.request_type(),
                &group,
                state.config.broadcasts(),
                &state.flags.untracked_sources,
                |key| repository.is_stale(key, now, max_age),
            );

            self.inner
                .timeouts
                .disarm_matching(|key| matches!(key, TimeoutKey::Refresh(_)));
            if !plan.completed_immediately {
                let id = plan.broadcast_id.clone();
                self.inner.timeouts.arm(
                    TimeoutKey::Refresh(plan.broadcast_id.clone()),
                    state.flags.refresh_timeout(reason),
                    self.on_timer(move |service| service.handle_refresh_timeout(&id)),
                );
            }
            outbox.requests = plan.requests;
            self.collect_views(state, &mut outbox);
            plan.broadcast_id
        };
        self.dispatch(outbox);
        Ok(broadcast_id)
    }

    /// Broadcast id of the refresh in flight, if any
    #[must_use]
    pub fn current_refresh(&self) -> Option<BroadcastId> {
        self.inner
            .state
            .lock()
            .tracker
            .current()
            .map(|current| current.broadcast_id().clone())
    }

    fn handle_refresh_timeout(&self, broadcast_id: &BroadcastId) {
        let mut outbox = Outbox::default();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let Some(group) = state.tracker.current().map(|c| c.group().clone()) else {
                return;
            };
            let timed_out = state.tracker.timeout_all(broadcast_id);
            if timed_out.is_empty() {
                return;
            }
            tracing::warn!(
                "Refresh {} timed out waiting for {} sources",
                broadcast_id,
                timed_out.len()
            );
            if state.flags.show_error_entries_on_timeout {
                for key in &timed_out {
                    state.repository.mark_error(key);
                }
            }
            let sources: Vec<String> = timed_out.iter().map(ToString::to_string).collect();
            outbox.errors.push((
                group.profile_parent(),
                ErrorDetails::new(
                    ErrorKind::RefreshTimeout,
                    format!("no answer from {}", sources.join(", ")),
                ),
            ));
            self.log_stats(state, &group);
            self.collect_views(state, &mut outbox);
        }
        self.dispatch(outbox);
    }

    // ---- source reports ----

    /// Store a source's report for `user_id`
    ///
    /// `None` clears the source's data. The event says why the source
    /// reported and may answer a refresh or an issue action.
    pub fn set_safety_source_data(
        &self,
        package_name: &str,
        source_id: &str,
        user_id: UserId,
        data: Option<SafetySourceData>,
        event: &SafetyEvent,
    ) -> Result<(), SafetyCenterError> {
        let mut outbox = Outbox::default();
        {
            let mut guard = self.inner.state.lock();
            Self::ensure_enabled(&guard)?;
            let state = &mut *guard;
            let source = validate_caller(
                &state.config,
                self.inner.collaborators.users.as_ref(),
                source_id,
                user_id,
                package_name,
            )?;
            if let Some(data) = &data {
                validate_data(source, &state.flags, data)?;
            }

            let key = SourceKey::new(source_id, user_id);
            let issue_ids: Vec<&str> = data.iter().flat_map(|d| d.issue_ids()).collect();
            state.dismissals.reconcile(&key, issue_ids);
            let dropped = state.actions.retain_reported(&key, data.as_ref());
            for action in dropped {
                self.inner
                    .timeouts
                    .disarm(&TimeoutKey::ResolveAction(action));
            }
            let now = self.inner.collaborators.clock.now();
            if state.repository.set(&key, data, now) {
                tracing::debug!("Data of {} changed", key);
            }

            self.apply_event(state, &key, event, false, &mut outbox);
            self.schedule_persist(state);
            self.schedule_resurface(state);
            self.collect_views(state, &mut outbox);
        }
        self.dispatch(outbox);
        Ok(())
    }

    /// Record that a source failed to produce data for `user_id`
    pub fn report_safety_source_error(
        &self,
        package_name: &str,
        source_id: &str,
        user_id: UserId,
        event: &SafetyEvent,
    ) -> Result<(), SafetyCenterError> {
        let mut outbox = Outbox::default();
        {
            let mut guard = self.inner.state.lock();
            Self::ensure_enabled(&guard)?;
            let state = &mut *guard;
            validate_caller(
                &state.config,
                self.inner.collaborators.users.as_ref(),
                source_id,
                user_id,
                package_name,
            )?;

            let key = SourceKey::new(source_id, user_id);
            tracing::info!("Source {} reported an error", key);
            state.repository.mark_error(&key);
            self.apply_event(state, &key, event, true, &mut outbox);
            self.collect_views(state, &mut outbox);
        }
        self.dispatch(outbox);
        Ok(())
    }

    /// Latest data a source reported for `user_id`
    pub fn get_safety_source_data(
        &self,
        package_name: &str,
        source_id: &str,
        user_id: UserId,
    ) -> Result<Option<SafetySourceData>, SafetyCenterError> {
        let state = self.inner.state.lock();
        Self::ensure_enabled(&state)?;
        validate_caller(
            &state.config,
            self.inner.collaborators.users.as_ref(),
            source_id,
            user_id,
            package_name,
        )?;
        Ok(state
            .repository
            .data(&SourceKey::new(source_id, user_id))
            .cloned())
    }

    fn apply_event(
        &self,
        state: &mut SafetyCenterState,
        key: &SourceKey,
        event: &SafetyEvent,
        failed: bool,
        outbox: &mut Outbox,
    ) {
        match event {
            SafetyEvent::RefreshRequested { broadcast_id } => {
                let group = state.tracker.current().map(|c| c.group().clone());
                let completed = if failed {
                    state.tracker.source_failed(key, broadcast_id)
                } else {
                    state.tracker.source_completed(key, broadcast_id)
                };
                if completed {
                    self.inner
                        .timeouts
                        .disarm(&TimeoutKey::Refresh(broadcast_id.clone()));
                    if let Some(group) = group {
                        self.log_stats(state, &group);
                    }
                }
            }
            SafetyEvent::ResolvingActionSucceeded {
                issue_id,
                action_id,
            } => {
                let action = ActionKey::new(key.issue(issue_id.as_str()), action_id.as_str());
                if self.finish_action(state, &action) {
                    tracing::info!("Action {} succeeded", action);
                }
            }
            SafetyEvent::ResolvingActionFailed {
                issue_id,
                action_id,
            } => {
                let action = ActionKey::new(key.issue(issue_id.as_str()), action_id.as_str());
                if self.finish_action(state, &action) {
                    tracing::warn!("Action {} failed", action);
                    self.push_error(
                        key.user_id(),
                        ErrorDetails::new(ErrorKind::ActionFailed, format!("action {action} failed")),
                        outbox,
                    );
                }
            }
            SafetyEvent::SourceStateChanged
            | SafetyEvent::DeviceRebooted
            | SafetyEvent::DeviceLocaleChanged => {}
        }
    }

    fn finish_action(&self, state: &mut SafetyCenterState, action: &ActionKey) -> bool {
        let finished = state.actions.finish(action);
        if finished {
            self.inner
                .timeouts
                .disarm(&TimeoutKey::ResolveAction(action.clone()));
        }
        finished
    }

    // ---- aggregate view and listeners ----

    /// Aggregated view of `user_id`'s profile group
    pub fn get_safety_center_data(
        &self,
        package_name: &str,
        user_id: UserId,
    ) -> Result<AggregateView, SafetyCenterError> {
        let group = self.resolve_group(user_id)?;
        let state = self.inner.state.lock();
        Self::ensure_enabled(&state)?;
        Ok(Self::factory(&state, &group).assemble(package_name, &group))
    }

    /// Register `listener` for `user_id`'s group and send it the current view
    ///
    /// Returns `false` if it was already registered for that group.
    pub fn add_listener(
        &self,
        package_name: &str,
        user_id: UserId,
        listener: Arc<dyn SafetyCenterListener>,
    ) -> Result<bool, SafetyCenterError> {
        let group = self.resolve_group(user_id)?;
        let parent = group.profile_parent();
        let (sequence, view) = {
            let mut state = self.inner.state.lock();
            Self::ensure_enabled(&state)?;
            if !self
                .inner
                .listeners
                .register(parent, package_name, Arc::clone(&listener))
            {
                return Ok(false);
            }
            let sequence = state.next_view_sequence();
            (sequence, Self::factory(&state, &group).assemble(package_name, &group))
        };
        self.inner
            .listeners
            .deliver_to(parent, &listener, sequence, &view);
        Ok(true)
    }

    /// Unregister `listener` everywhere
    pub fn remove_listener(&self, listener: &Arc<dyn SafetyCenterListener>) -> bool {
        self.inner.listeners.unregister(listener)
    }

    fn factory<'a>(
        state: &'a SafetyCenterState,
        group: &UserProfileGroup,
    ) -> SafetyCenterDataFactory<'a> {
        SafetyCenterDataFactory::new(
            &state.config,
            &state.flags,
            &state.repository,
            &state.dismissals,
            &state.actions,
            state.tracker.refresh_status(group),
        )
    }

    fn collect_views(&self, state: &mut SafetyCenterState, outbox: &mut Outbox) {
        outbox.view_sequence = state.next_view_sequence();
        let users = self.inner.collaborators.users.as_ref();
        for parent in self.inner.listeners.listened_groups() {
            let Some(group) = UserProfileGroup::resolve(parent, users) else {
                tracing::debug!("Listened user {} no longer exists", parent);
                continue;
            };
            let factory = Self::factory(state, &group);
            for package_name in self.inner.listeners.packages(parent) {
                let view = factory.assemble(&package_name, &group);
                outbox.views.push((parent, package_name, view));
            }
        }
    }

    fn log_stats(&self, state: &SafetyCenterState, group: &UserProfileGroup) {
        let view = Self::factory(state, group).assemble(&state.flags.owning_package_name, group);
        view.stats.log(group, view.status.severity);
    }

    fn push_error(&self, user_id: UserId, error: ErrorDetails, outbox: &mut Outbox) {
        let parent = UserProfileGroup::resolve(user_id, self.inner.collaborators.users.as_ref())
            .map_or(user_id, |group| group.profile_parent());
        outbox.errors.push((parent, error));
    }

    fn dispatch(&self, outbox: Outbox) {
        let transport = &self.inner.collaborators.transport;
        for request in &outbox.requests {
            transport.send_refresh_request(request);
        }
        for (package_name, action) in &outbox.actions {
            transport.send_issue_action(package_name, &action.issue, &action.action_id);
        }
        for (parent, package_name, view) in &outbox.views {
            self.inner
                .listeners
                .deliver(*parent, package_name, outbox.view_sequence, view);
        }
        for (parent, error) in &outbox.errors {
            self.inner.listeners.deliver_error(*parent, error);
        }
    }

    // ---- issues ----

    /// Hide an issue until it resurfaces
    pub fn dismiss_issue(&self, issue: &IssueKey) -> Result<(), SafetyCenterError> {
        let mut outbox = Outbox::default();
        {
            let mut guard = self.inner.state.lock();
            Self::ensure_enabled(&guard)?;
            let state = &mut *guard;
            if state.repository.issue(issue).is_none() {
                return Err(SafetyCenterError::UnknownIssue(issue.clone()));
            }
            if state.dismissals.dismiss(issue) {
                tracing::info!("Dismissed issue {}", issue);
            }
            self.schedule_persist(state);
            self.schedule_resurface(state);
            self.collect_views(state, &mut outbox);
        }
        self.dispatch(outbox);
        Ok(())
    }

    /// Ask the source of `issue` to run one of its actions
    pub fn execute_issue_action(
        &self,
        issue: &IssueKey,
        action_id: &str,
    ) -> Result<(), SafetyCenterError> {
        let mut outbox = Outbox::default();
        {
            let mut guard = self.inner.state.lock();
            Self::ensure_enabled(&guard)?;
            let state = &mut *guard;
            let reported = state
                .repository
                .issue(issue)
                .ok_or_else(|| SafetyCenterError::UnknownIssue(issue.clone()))?;
            if reported.action(action_id).is_none() {
                return Err(SafetyCenterError::UnknownAction {
                    issue: issue.clone(),
                    action_id: action_id.to_string(),
                });
            }
            let package_name = state
                .config
                .source(issue.source_id())
                .and_then(|source| source.package_name.clone())
                .ok_or_else(|| SafetyCenterError::UnknownSource(issue.source_id().to_string()))?;

            let action = ActionKey::new(issue.clone(), action_id);
            if !state.actions.begin(action.clone()) {
                return Err(SafetyCenterError::ActionInFlight {
                    issue: issue.clone(),
                    action_id: action_id.to_string(),
                });
            }
            let timed_out = action.clone();
            self.inner.timeouts.arm(
                TimeoutKey::ResolveAction(action.clone()),
                state.flags.resolve_action_timeout(),
                self.on_timer(move |service| service.handle_action_timeout(&timed_out)),
            );
            tracing::info!("Executing action {}", action);
            outbox.actions.push((package_name, action));
            self.collect_views(state, &mut outbox);
        }
        self.dispatch(outbox);
        Ok(())
    }

    fn handle_action_timeout(&self, action: &ActionKey) {
        let mut outbox = Outbox::default();
        {
            let mut state = self.inner.state.lock();
            if !state.actions.finish(action) {
                return;
            }
            tracing::warn!("Action {} timed out", action);
            self.push_error(
                action.issue.user_id(),
                ErrorDetails::new(
                    ErrorKind::ActionTimeout,
                    format!("action {action} did not complete"),
                ),
                &mut outbox,
            );
            self.collect_views(&mut state, &mut outbox);
        }
        self.dispatch(outbox);
    }

    // ---- lifecycle ----

    /// Forget all data, dismissals, actions and the refresh in flight
    pub fn clear_all_data(&self) {
        let mut outbox = Outbox::default();
        {
            let mut state = self.inner.state.lock();
            state.tracker.clear_all();
            state.repository.clear();
            state.dismissals.clear();
            state.actions.clear();
            self.inner.timeouts.disarm_matching(|key| {
                !matches!(key, TimeoutKey::PersistWrite)
            });
            tracing::info!("Cleared all safety center data");
            self.schedule_persist(&state);
            self.collect_views(&mut state, &mut outbox);
        }
        self.dispatch(outbox);
    }

    /// Forget everything about `user_id`
    pub fn remove_user(&self, user_id: UserId) {
        let mut outbox = Outbox::default();
        {
            let mut state = self.inner.state.lock();
            if let Some(id) = state.tracker.clear_for_user(user_id) {
                self.inner.timeouts.disarm(&TimeoutKey::Refresh(id));
            }
            state.repository.clear_for_user(user_id);
            state.dismissals.clear_for_user(user_id);
            for action in state.actions.clear_for_user(user_id) {
                self.inner
                    .timeouts
                    .disarm(&TimeoutKey::ResolveAction(action));
            }
            let dropped = self.inner.listeners.clear_for_user(user_id);
            tracing::info!("Removed user {} ({} listeners dropped)", user_id, dropped);
            self.schedule_persist(&state);
            self.schedule_resurface(&state);
            self.collect_views(&mut state, &mut outbox);
        }
        self.dispatch(outbox);
    }

    /// Swap in a new source topology and flags
    ///
    /// The refresh in flight is dropped, as are data and dismissal records
    /// of sources that are no longer configured.
    pub fn reload_config(&self, config: SafetyCenterConfig, flags: SafetyCenterFlags) {
        let mut outbox = Outbox::default();
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if let Some(id) = state.tracker.clear_all() {
                self.inner.timeouts.disarm(&TimeoutKey::Refresh(id));
            }
            state.config = config;
            state.flags = flags;
            state.dismissals.retain_configured(&state.config);
            state.repository.retain_configured(&state.config);
            let config = &state.config;
            for action in state
                .actions
                .retain(|key| config.is_external_source(key.issue.source_id()))
            {
                self.inner
                    .timeouts
                    .disarm(&TimeoutKey::ResolveAction(action));
            }
            tracing::info!("Reloaded config with {} sources", state.config.source_count());
            self.schedule_persist(state);
            self.schedule_resurface(state);
            self.collect_views(state, &mut outbox);
        }
        self.dispatch(outbox);
    }

    // ---- timers ----

    fn on_timer<F>(&self, f: F) -> impl FnOnce() + Send + 'static
    where
        F: FnOnce(&SafetyCenterService) + Send + 'static,
    {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        move || {
            if let Some(inner) = weak.upgrade() {
                f(&SafetyCenterService { inner });
            }
        }
    }

    fn schedule_persist(&self, state: &SafetyCenterState) {
        let key = TimeoutKey::PersistWrite;
        if !state.dismissals.is_dirty() || self.inner.timeouts.is_armed(&key) {
            return;
        }
        self.inner.timeouts.arm(
            key,
            state.flags.persist_write_delay(),
            self.on_timer(|service| {
                if let Err(e) = service.write_dismissals() {
                    tracing::warn!("Failed to persist dismissal state: {}", e);
                }
            }),
        );
    }

    /// Arm the resurface timer for the earliest dismissed issue to come back
    fn schedule_resurface(&self, state: &SafetyCenterState) {
        let now = self.inner.collaborators.clock.now();
        let next = state
            .repository
            .keys()
            .filter_map(|key| state.repository.data(key).map(|data| (key, data)))
            .flat_map(|(key, data)| {
                data.issues.iter().filter_map(move |issue| {
                    state.dismissals.resurface_at(
                        &key.issue(issue.id.as_str()),
                        issue.severity_level,
                        &state.flags,
                    )
                })
            })
            .min();

        let Some(at) = next else {
            self.inner.timeouts.disarm(&TimeoutKey::Resurface);
            return;
        };
        let delay = (at - now).to_std().unwrap_or(Duration::ZERO);
        self.inner.timeouts.arm(
            TimeoutKey::Resurface,
            delay,
            self.on_timer(|service| service.handle_resurface()),
        );
    }

    fn handle_resurface(&self) {
        let mut outbox = Outbox::default();
        {
            let mut state = self.inner.state.lock();
            tracing::debug!("Dismissed issues resurfaced");
            self.schedule_resurface(&state);
            self.collect_views(&mut state, &mut outbox);
        }
        self.dispatch(outbox);
    }

    fn write_dismissals(&self) -> Result<(), SafetyCenterError> {
        let _writing = self.inner.persist_lock.lock();
        let records = {
            let mut state = self.inner.state.lock();
            if !state.dismissals.is_dirty() {
                return Ok(());
            }
            state.dismissals.snapshot()
        };
        if let Err(e) = self.inner.collaborators.store.save(&records) {
            self.inner.state.lock().dismissals.mark_dirty();
            return Err(e.into());
        }
        tracing::debug!("Persisted {} dismissal records", records.len());
        Ok(())
    }

    /// Write dirty dismissal state now
    pub fn flush(&self) -> Result<(), SafetyCenterError> {
        self.inner.timeouts.disarm(&TimeoutKey::PersistWrite);
        self.write_dismissals()
    }
}
