//! Testing utilities for the safety center workspace
//!
//! Shared fixtures: a transport and a listener that record what they
//! receive, gated fakes that park a caller mid-call, a two-source
//! configuration, and service builders.

#![allow(missing_docs)]

use parking_lot::{Condvar, Mutex};
use sc_config::{SafetyCenterConfig, SafetyCenterFlags, SafetySource, SafetySourcesGroup};
use sc_core::{
    AggregateView, Collaborators, DismissalStore, ErrorDetails, InMemoryStore, PersistenceError,
    RefreshRequest, SafetyCenterListener, SafetyCenterService, SourceTransport,
    StaticUserTopology, UserInfo,
};
use sc_model::{
    IssueCategory, IssueKey, PersistedRecord, SafetySourceData, SafetySourceIssue, SeverityLevel,
    UserId,
};
use std::sync::Arc;

pub use sc_core::ManualClock;

pub const PACKAGE_A: &str = "com.example.a";
pub const PACKAGE_B: &str = "com.example.b";
pub const SETTINGS_PACKAGE: &str = "com.android.settings";

/// Transport remembering every request
#[derive(Debug, Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<RefreshRequest>>,
    actions: Mutex<Vec<(String, IssueKey, String)>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn requests(&self) -> Vec<RefreshRequest> {
        self.requests.lock().clone()
    }

    pub fn actions(&self) -> Vec<(String, IssueKey, String)> {
        self.actions.lock().clone()
    }

    pub fn clear(&self) {
        self.requests.lock().clear();
        self.actions.lock().clear();
    }
}

impl SourceTransport for RecordingTransport {
    fn send_refresh_request(&self, request: &RefreshRequest) {
        self.requests.lock().push(request.clone());
    }

    fn send_issue_action(&self, package_name: &str, issue: &IssueKey, action_id: &str) {
        self.actions
            .lock()
            .push((package_name.to_string(), issue.clone(), action_id.to_string()));
    }
}

#[derive(Debug, Default)]
struct GateState {
    used: bool,
    waiting: bool,
    open: bool,
}

/// Parks the first caller of [`Gate::pass`] until [`Gate::open`]
#[derive(Debug, Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Blocks the first caller only
    pub fn pass(&self) {
        let mut state = self.state.lock();
        if state.used {
            return;
        }
        state.used = true;
        state.waiting = true;
        self.changed.notify_all();
        while !state.open {
            self.changed.wait(&mut state);
        }
    }

    /// Returns once a caller is parked in `pass`
    pub fn wait_for_caller(&self) {
        let mut state = self.state.lock();
        while !state.waiting {
            self.changed.wait(&mut state);
        }
    }

    pub fn open(&self) {
        self.state.lock().open = true;
        self.changed.notify_all();
    }
}

/// Recording transport whose first refresh request parks on a gate
#[derive(Debug)]
pub struct GatedTransport {
    pub inner: Arc<RecordingTransport>,
    pub gate: Arc<Gate>,
}

impl GatedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RecordingTransport::new(),
            gate: Gate::new(),
        })
    }
}

impl SourceTransport for GatedTransport {
    fn send_refresh_request(&self, request: &RefreshRequest) {
        self.gate.pass();
        self.inner.send_refresh_request(request);
    }

    fn send_issue_action(&self, package_name: &str, issue: &IssueKey, action_id: &str) {
        self.inner.send_issue_action(package_name, issue, action_id);
    }
}

/// In-memory store whose first save parks on a gate before writing
#[derive(Debug)]
pub struct GatedStore {
    pub inner: InMemoryStore,
    pub gate: Arc<Gate>,
}

impl GatedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryStore::new(),
            gate: Gate::new(),
        })
    }
}

impl DismissalStore for GatedStore {
    fn load(&self) -> Result<Vec<PersistedRecord>, PersistenceError> {
        self.inner.load()
    }

    fn save(&self, records: &[PersistedRecord]) -> Result<(), PersistenceError> {
        self.gate.pass();
        self.inner.save(records)
    }
}

/// Listener remembering every delivery
#[derive(Debug, Default)]
pub struct RecordingListener {
    views: Mutex<Vec<AggregateView>>,
    errors: Mutex<Vec<ErrorDetails>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn views(&self) -> Vec<AggregateView> {
        self.views.lock().clone()
    }

    pub fn last_view(&self) -> Option<AggregateView> {
        self.views.lock().last().cloned()
    }

    pub fn view_count(&self) -> usize {
        self.views.lock().len()
    }

    pub fn errors(&self) -> Vec<ErrorDetails> {
        self.errors.lock().clone()
    }
}

impl SafetyCenterListener for RecordingListener {
    fn on_data_changed(&self, view: &AggregateView) {
        self.views.lock().push(view.clone());
    }

    fn on_error(&self, error: &ErrorDetails) {
        self.errors.lock().push(error.clone());
    }
}

/// Sources `a` (all profiles, refreshed on page open) and `b`
pub fn two_source_config() -> SafetyCenterConfig {
    SafetyCenterConfig::new(vec![SafetySourcesGroup::new(
        "security",
        vec![
            SafetySource::dynamic("a", PACKAGE_A)
                .for_all_profiles()
                .refreshed_on_page_open(),
            SafetySource::dynamic("b", PACKAGE_B),
        ],
    )])
    .expect("fixture config is valid")
}

/// User 0 with managed profile 10
pub fn topology_with_profile() -> Arc<StaticUserTopology> {
    Arc::new(StaticUserTopology::new(vec![
        UserInfo::full(UserId::new(0)),
        UserInfo::managed(UserId::new(10), UserId::new(0)),
    ]))
}

pub fn issue(id: &str, level: SeverityLevel) -> SafetySourceIssue {
    SafetySourceIssue::new(id, id, level, IssueCategory::Device)
}

pub fn data_with_issue(id: &str, level: SeverityLevel) -> SafetySourceData {
    SafetySourceData::new().with_issue(issue(id, level))
}

/// A service wired to recording fakes
pub struct Harness {
    pub service: SafetyCenterService,
    pub transport: Arc<RecordingTransport>,
    pub store: Arc<InMemoryStore>,
    pub users: Arc<StaticUserTopology>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// Must run inside a tokio runtime
    pub fn new(config: SafetyCenterConfig, flags: SafetyCenterFlags) -> Self {
        Self::with_store(config, flags, Arc::new(InMemoryStore::new()))
    }

    pub fn with_store(
        config: SafetyCenterConfig,
        flags: SafetyCenterFlags,
        store: Arc<InMemoryStore>,
    ) -> Self {
        let transport = RecordingTransport::new();
        let users = topology_with_profile();
        let clock = Arc::new(ManualClock::at_epoch());
        let collaborators = Collaborators::new(transport.clone(), store.clone(), users.clone())
            .with_clock(clock.clone());
        let service = SafetyCenterService::new(config, flags, collaborators)
            .expect("tests run inside a tokio runtime");
        Self {
            service,
            transport,
            store,
            users,
            clock,
        }
    }

    pub fn default_setup() -> Self {
        Self::new(two_source_config(), SafetyCenterFlags::default())
    }

    pub fn listen(&self, user: i32) -> Arc<RecordingListener> {
        let listener = RecordingListener::new();
        self.service
            .add_listener(SETTINGS_PACKAGE, UserId::new(user), listener.clone())
            .expect("listener registration");
        listener
    }
}
