//! Service behavior: protocol checks, dismissals, actions, listeners,
//! persistence and config reload

use chrono::{DateTime, Utc};
use pretty_assertions::assert_eq;
use sc_config::{SafetyCenterConfig, SafetyCenterFlags, SafetySource, SafetySourcesGroup};
use sc_core::{
    Collaborators, DismissalStore, ErrorKind, InMemoryStore, JsonFileStore, SafetyCenterError,
    SafetyCenterService, SourceTransport, StaticUserTopology,
};
use sc_model::{
    IssueAction, IssueKey, OverallSeverity, PersistedRecord, RefreshReason, SafetyEvent,
    SafetySourceData, SeverityLevel, UserId,
};
use sc_test_utils::{
    data_with_issue, issue, two_source_config, GatedStore, GatedTransport, Harness,
    RecordingListener, RecordingTransport, PACKAGE_A, PACKAGE_B, SETTINGS_PACKAGE,
};
use std::sync::Arc;
use std::time::Duration;

async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
    tokio::task::yield_now().await;
}

fn report(harness: &Harness, data: SafetySourceData) {
    harness
        .service
        .set_safety_source_data(
            PACKAGE_A,
            "a",
            UserId::SYSTEM,
            Some(data),
            &SafetyEvent::SourceStateChanged,
        )
        .unwrap();
}

fn issue_x() -> IssueKey {
    IssueKey::new("a", "x", UserId::SYSTEM)
}

#[tokio::test(start_paused = true)]
async fn single_critical_issue_sets_severity() {
    let harness = Harness::default_setup();
    report(&harness, data_with_issue("x", SeverityLevel::CriticalWarning));

    let view = harness
        .service
        .get_safety_center_data(SETTINGS_PACKAGE, UserId::SYSTEM)
        .unwrap();
    assert_eq!(view.status.severity, OverallSeverity::CriticalWarning);
    assert_eq!(view.issues.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn protocol_violations_leave_state_untouched() {
    let config = SafetyCenterConfig::new(vec![SafetySourcesGroup::new(
        "g",
        vec![SafetySource::dynamic("a", PACKAGE_A).with_max_severity(SeverityLevel::Information)],
    )])
    .unwrap();
    let harness = Harness::new(config, SafetyCenterFlags::default());

    let wrong_package = harness.service.set_safety_source_data(
        PACKAGE_B,
        "a",
        UserId::SYSTEM,
        Some(SafetySourceData::new()),
        &SafetyEvent::SourceStateChanged,
    );
    let too_severe = harness.service.set_safety_source_data(
        PACKAGE_A,
        "a",
        UserId::SYSTEM,
        Some(data_with_issue("x", SeverityLevel::CriticalWarning)),
        &SafetyEvent::SourceStateChanged,
    );
    let managed_profile = harness.service.set_safety_source_data(
        PACKAGE_A,
        "a",
        UserId::new(10),
        Some(SafetySourceData::new()),
        &SafetyEvent::SourceStateChanged,
    );

    for result in [wrong_package, too_severe, managed_profile] {
        let err = result.unwrap_err();
        assert!(err.is_protocol_violation(), "{err}");
    }
    assert_eq!(
        harness
            .service
            .get_safety_source_data(PACKAGE_A, "a", UserId::SYSTEM)
            .unwrap(),
        None
    );
}

#[tokio::test(start_paused = true)]
async fn disabled_service_rejects_calls() {
    let flags = SafetyCenterFlags {
        enabled: false,
        ..SafetyCenterFlags::default()
    };
    let harness = Harness::new(two_source_config(), flags);
    assert!(!harness.service.is_enabled());
    assert!(matches!(
        harness
            .service
            .get_safety_center_data(SETTINGS_PACKAGE, UserId::SYSTEM),
        Err(SafetyCenterError::NotEnabled)
    ));
}

#[tokio::test(start_paused = true)]
async fn dismissal_hides_issue_and_persists() {
    let harness = Harness::default_setup();
    report(&harness, data_with_issue("x", SeverityLevel::CriticalWarning));

    harness.service.dismiss_issue(&issue_x()).unwrap();
    let view = harness
        .service
        .get_safety_center_data(SETTINGS_PACKAGE, UserId::SYSTEM)
        .unwrap();
    assert!(view.issues.is_empty());
    assert_eq!(view.dismissed_issues.len(), 1);
    assert_eq!(view.status.severity, OverallSeverity::Ok);

    advance(Duration::from_secs(1)).await;
    let stored = harness.store.records();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].dismiss_count, 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_issue_cannot_be_dismissed() {
    let harness = Harness::default_setup();
    assert!(matches!(
        harness.service.dismiss_issue(&issue_x()),
        Err(SafetyCenterError::UnknownIssue(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn dismissed_issue_resurfaces_after_delay() {
    let flags = SafetyCenterFlags::default().with_resurface(
        SeverityLevel::CriticalWarning,
        1,
        Duration::from_secs(3600),
    );
    let harness = Harness::new(two_source_config(), flags);
    let listener = harness.listen(0);
    report(&harness, data_with_issue("x", SeverityLevel::CriticalWarning));
    harness.service.dismiss_issue(&issue_x()).unwrap();
    assert!(listener.last_view().unwrap().issues.is_empty());

    harness.clock.advance(Duration::from_secs(3600));
    advance(Duration::from_secs(3601)).await;
    assert_eq!(listener.last_view().unwrap().issues.len(), 1);

    // second dismissal exceeds the budget of one resurface
    harness.service.dismiss_issue(&issue_x()).unwrap();
    harness.clock.advance(Duration::from_secs(7200));
    let view = harness
        .service
        .get_safety_center_data(SETTINGS_PACKAGE, UserId::SYSTEM)
        .unwrap();
    assert!(view.issues.is_empty());
}

#[tokio::test(start_paused = true)]
async fn dismissals_survive_restart() {
    let store = Arc::new(InMemoryStore::new());
    {
        let harness = Harness::with_store(
            two_source_config(),
            SafetyCenterFlags::default(),
            Arc::clone(&store),
        );
        report(&harness, data_with_issue("x", SeverityLevel::Recommendation));
        harness.service.dismiss_issue(&issue_x()).unwrap();
        harness.service.flush().unwrap();
    }

    let harness = Harness::with_store(two_source_config(), SafetyCenterFlags::default(), store);
    report(&harness, data_with_issue("x", SeverityLevel::Recommendation));
    let view = harness
        .service
        .get_safety_center_data(SETTINGS_PACKAGE, UserId::SYSTEM)
        .unwrap();
    assert!(view.issues.is_empty());
    assert_eq!(view.dismissed_issues.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn records_of_unconfigured_sources_are_pruned_on_load() {
    let orphan = PersistedRecord {
        key: IssueKey::new("gone", "x", UserId::SYSTEM),
        first_seen_at: DateTime::<Utc>::UNIX_EPOCH,
        dismissed_at: None,
        dismiss_count: 0,
    };
    let store = Arc::new(InMemoryStore::with_records(vec![orphan]));
    let harness =
        Harness::with_store(two_source_config(), SafetyCenterFlags::default(), store);

    advance(Duration::from_secs(1)).await;
    assert!(harness.store.records().is_empty());
    assert_eq!(harness.store.save_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn json_store_round_trips_through_service() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dismissals.json");
    let collaborators = Collaborators::new(
        RecordingTransport::new(),
        Arc::new(JsonFileStore::new(&path)),
        Arc::new(StaticUserTopology::single(UserId::SYSTEM)),
    );
    let service =
        SafetyCenterService::new(two_source_config(), SafetyCenterFlags::default(), collaborators)
            .unwrap();
    service
        .set_safety_source_data(
            PACKAGE_A,
            "a",
            UserId::SYSTEM,
            Some(data_with_issue("x", SeverityLevel::Information)),
            &SafetyEvent::SourceStateChanged,
        )
        .unwrap();
    service.dismiss_issue(&issue_x()).unwrap();
    service.flush().unwrap();

    let records = JsonFileStore::new(&path).load().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key, issue_x());
    assert!(records[0].dismissed_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn issue_action_success_clears_in_flight() {
    let harness = Harness::default_setup();
    report(
        &harness,
        SafetySourceData::new().with_issue(
            issue("x", SeverityLevel::Recommendation)
                .with_action(IssueAction::new("fix", "Fix it").resolving()),
        ),
    );

    harness.service.execute_issue_action(&issue_x(), "fix").unwrap();
    assert_eq!(
        harness.transport.actions(),
        vec![(PACKAGE_A.to_string(), issue_x(), "fix".to_string())]
    );
    assert!(matches!(
        harness.service.execute_issue_action(&issue_x(), "fix"),
        Err(SafetyCenterError::ActionInFlight { .. })
    ));
    assert!(matches!(
        harness.service.execute_issue_action(&issue_x(), "other"),
        Err(SafetyCenterError::UnknownAction { .. })
    ));
    let view = harness
        .service
        .get_safety_center_data(SETTINGS_PACKAGE, UserId::SYSTEM)
        .unwrap();
    assert!(view.issues[0].actions[0].in_flight);

    harness
        .service
        .set_safety_source_data(
            PACKAGE_A,
            "a",
            UserId::SYSTEM,
            Some(SafetySourceData::new()),
            &SafetyEvent::ResolvingActionSucceeded {
                issue_id: "x".to_string(),
                action_id: "fix".to_string(),
            },
        )
        .unwrap();
    let view = harness
        .service
        .get_safety_center_data(SETTINGS_PACKAGE, UserId::SYSTEM)
        .unwrap();
    assert!(view.issues.is_empty());
}

#[tokio::test(start_paused = true)]
async fn issue_action_timeout_reports_error() {
    let harness = Harness::default_setup();
    let listener = harness.listen(0);
    report(
        &harness,
        SafetySourceData::new().with_issue(
            issue("x", SeverityLevel::Recommendation).with_action(IssueAction::new("fix", "Fix")),
        ),
    );
    harness.service.execute_issue_action(&issue_x(), "fix").unwrap();
    assert!(listener.last_view().unwrap().issues[0].actions[0].in_flight);

    advance(Duration::from_secs(11)).await;
    assert!(!listener.last_view().unwrap().issues[0].actions[0].in_flight);
    assert_eq!(listener.errors().len(), 1);
    assert_eq!(listener.errors()[0].kind, ErrorKind::ActionTimeout);
}

#[tokio::test(start_paused = true)]
async fn failed_action_notifies_listeners() {
    let harness = Harness::default_setup();
    let listener = harness.listen(0);
    let data = SafetySourceData::new().with_issue(
        issue("x", SeverityLevel::Recommendation).with_action(IssueAction::new("fix", "Fix")),
    );
    report(&harness, data.clone());
    harness.service.execute_issue_action(&issue_x(), "fix").unwrap();

    harness
        .service
        .set_safety_source_data(
            PACKAGE_A,
            "a",
            UserId::SYSTEM,
            Some(data),
            &SafetyEvent::ResolvingActionFailed {
                issue_id: "x".to_string(),
                action_id: "fix".to_string(),
            },
        )
        .unwrap();
    assert_eq!(listener.errors()[0].kind, ErrorKind::ActionFailed);

    // the timeout was disarmed with the action
    advance(Duration::from_secs(11)).await;
    assert_eq!(listener.errors().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn listeners_only_see_changes() {
    let harness = Harness::default_setup();
    let listener = harness.listen(0);
    assert_eq!(listener.view_count(), 1);

    report(&harness, data_with_issue("x", SeverityLevel::Information));
    report(&harness, data_with_issue("x", SeverityLevel::Information));
    assert_eq!(listener.view_count(), 2);

    // a managed profile listens to its parent's group and gets the current view
    let other = harness.listen(10);
    assert_eq!(other.view_count(), 1);
    assert_eq!(other.last_view(), listener.last_view());
    assert_eq!(listener.view_count(), 2);

    let as_dyn: Arc<dyn sc_core::SafetyCenterListener> = listener.clone();
    assert!(harness.service.remove_listener(&as_dyn));
    report(&harness, data_with_issue("y", SeverityLevel::Information));
    assert_eq!(listener.view_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn assembly_is_deterministic() {
    let harness = Harness::default_setup();
    report(
        &harness,
        SafetySourceData::new()
            .with_issue(issue("x", SeverityLevel::Information))
            .with_issue(issue("y", SeverityLevel::CriticalWarning))
            .with_issue(issue("z", SeverityLevel::Information)),
    );
    let first = harness
        .service
        .get_safety_center_data(SETTINGS_PACKAGE, UserId::SYSTEM)
        .unwrap();
    let second = harness
        .service
        .get_safety_center_data(SETTINGS_PACKAGE, UserId::SYSTEM)
        .unwrap();
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    let ids: Vec<&str> = first.issues.iter().map(|i| i.key.issue_id()).collect();
    assert_eq!(ids, vec!["y", "x", "z"]);
}

#[tokio::test(start_paused = true)]
async fn reload_drops_unconfigured_sources() {
    let harness = Harness::default_setup();
    report(&harness, data_with_issue("x", SeverityLevel::Information));
    harness
        .service
        .set_safety_source_data(
            PACKAGE_B,
            "b",
            UserId::SYSTEM,
            Some(data_with_issue("y", SeverityLevel::Information)),
            &SafetyEvent::SourceStateChanged,
        )
        .unwrap();

    let only_b = SafetyCenterConfig::new(vec![SafetySourcesGroup::new(
        "security",
        vec![SafetySource::dynamic("b", PACKAGE_B)],
    )])
    .unwrap();
    harness
        .service
        .reload_config(only_b, SafetyCenterFlags::default());

    let view = harness
        .service
        .get_safety_center_data(SETTINGS_PACKAGE, UserId::SYSTEM)
        .unwrap();
    assert_eq!(view.issues.len(), 1);
    assert_eq!(view.issues[0].key.source_id(), "b");
    assert!(matches!(
        harness
            .service
            .get_safety_source_data(PACKAGE_A, "a", UserId::SYSTEM),
        Err(SafetyCenterError::UnknownSource(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn resurface_and_persist_outlive_a_burst_of_action_timeouts() {
    let flags = SafetyCenterFlags::default().with_resurface(
        SeverityLevel::Recommendation,
        1,
        Duration::from_secs(60),
    );
    let harness = Harness::new(two_source_config(), flags);
    let listener = harness.listen(0);
    let mut data = SafetySourceData::new();
    for n in 0..11 {
        data = data.with_issue(
            issue(&format!("i{n}"), SeverityLevel::Recommendation)
                .with_action(IssueAction::new("fix", "Fix")),
        );
    }
    report(&harness, data);

    let dismissed = IssueKey::new("a", "i0", UserId::SYSTEM);
    harness.service.dismiss_issue(&dismissed).unwrap();
    for n in 1..11 {
        let key = IssueKey::new("a", format!("i{n}"), UserId::SYSTEM);
        harness.service.execute_issue_action(&key, "fix").unwrap();
    }
    let shows_dismissed = |listener: &RecordingListener| {
        listener
            .last_view()
            .unwrap()
            .issues
            .iter()
            .any(|i| i.key == dismissed)
    };

    advance(Duration::from_secs(11)).await;
    assert_eq!(listener.errors().len(), 10);
    assert!(!shows_dismissed(&*listener));
    assert_eq!(harness.store.save_count(), 1);
    assert_eq!(harness.store.records().iter().map(|r| r.dismiss_count).sum::<u32>(), 1);

    harness.clock.advance(Duration::from_secs(61));
    advance(Duration::from_secs(50)).await;
    assert!(shows_dismissed(&*listener));
}

fn threaded_service(
    transport: Arc<dyn SourceTransport>,
    store: Arc<dyn DismissalStore>,
) -> (tokio::runtime::Runtime, SafetyCenterService) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let collaborators = Collaborators::new(
        transport,
        store,
        Arc::new(StaticUserTopology::single(UserId::SYSTEM)),
    );
    let service = SafetyCenterService::with_runtime(
        two_source_config(),
        SafetyCenterFlags::default(),
        collaborators,
        runtime.handle().clone(),
    );
    (runtime, service)
}

fn current_view(service: &SafetyCenterService) -> sc_core::AggregateView {
    service
        .get_safety_center_data(SETTINGS_PACKAGE, UserId::SYSTEM)
        .unwrap()
}

#[test]
fn view_assembled_earlier_never_overwrites_a_newer_delivery() {
    let transport = GatedTransport::new();
    let (_runtime, service) = threaded_service(transport.clone(), Arc::new(InMemoryStore::new()));
    let listener = RecordingListener::new();
    service
        .add_listener(SETTINGS_PACKAGE, UserId::SYSTEM, listener.clone())
        .unwrap();

    let refreshing = {
        let service = service.clone();
        std::thread::spawn(move || {
            service
                .refresh_safety_sources(RefreshReason::RescanButtonClick, UserId::SYSTEM)
                .unwrap()
        })
    };
    // the refresh assembled its view and is parked sending requests
    transport.gate.wait_for_caller();
    service
        .set_safety_source_data(
            PACKAGE_A,
            "a",
            UserId::SYSTEM,
            Some(data_with_issue("x", SeverityLevel::CriticalWarning)),
            &SafetyEvent::SourceStateChanged,
        )
        .unwrap();
    transport.gate.open();
    refreshing.join().unwrap();

    let fresh = current_view(&service);
    assert_eq!(fresh.issues.len(), 1);
    assert_eq!(listener.last_view(), Some(fresh));
}

#[test]
fn concurrent_reports_leave_every_listener_current() {
    let (_runtime, service) =
        threaded_service(RecordingTransport::new(), Arc::new(InMemoryStore::new()));
    let listeners: Vec<Arc<RecordingListener>> = (0..3).map(|_| RecordingListener::new()).collect();
    for listener in &listeners {
        service
            .add_listener(SETTINGS_PACKAGE, UserId::SYSTEM, listener.clone())
            .unwrap();
    }

    let levels = [
        SeverityLevel::Information,
        SeverityLevel::Recommendation,
        SeverityLevel::CriticalWarning,
    ];
    let workers: Vec<_> = (0..4usize)
        .map(|worker| {
            let service = service.clone();
            std::thread::spawn(move || {
                let (package, source) = if worker % 2 == 0 {
                    (PACKAGE_A, "a")
                } else {
                    (PACKAGE_B, "b")
                };
                for round in 0..50usize {
                    let level = levels[(worker + round) % levels.len()];
                    service
                        .set_safety_source_data(
                            package,
                            source,
                            UserId::SYSTEM,
                            Some(data_with_issue(&format!("w{worker}"), level)),
                            &SafetyEvent::SourceStateChanged,
                        )
                        .unwrap();
                    if round % 10 == 0 {
                        service
                            .refresh_safety_sources(RefreshReason::Other, UserId::SYSTEM)
                            .unwrap();
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let fresh = current_view(&service);
    for listener in &listeners {
        assert_eq!(listener.last_view().as_ref(), Some(&fresh));
    }
}

#[test]
fn overlapping_flushes_keep_the_newest_dismissals() {
    let store = GatedStore::new();
    let (_runtime, service) = threaded_service(RecordingTransport::new(), store.clone());
    service
        .set_safety_source_data(
            PACKAGE_A,
            "a",
            UserId::SYSTEM,
            Some(
                SafetySourceData::new()
                    .with_issue(issue("x", SeverityLevel::Information))
                    .with_issue(issue("y", SeverityLevel::Information)),
            ),
            &SafetyEvent::SourceStateChanged,
        )
        .unwrap();
    service.dismiss_issue(&issue_x()).unwrap();

    let first = {
        let service = service.clone();
        std::thread::spawn(move || service.flush())
    };
    store.gate.wait_for_caller();
    service
        .dismiss_issue(&IssueKey::new("a", "y", UserId::SYSTEM))
        .unwrap();
    let second = {
        let service = service.clone();
        std::thread::spawn(move || service.flush())
    };
    std::thread::sleep(Duration::from_millis(50));
    store.gate.open();
    first.join().unwrap().unwrap();
    second.join().unwrap().unwrap();

    let records = store.inner.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.dismiss_count == 1));
}
