use sc_config::{load_from_path, load_from_str, ConfigError, Profile, SourceKind};
use sc_model::{IssueCategory, RefreshReason, SeverityLevel};
use std::io::Write;
use std::time::Duration;

const DOCUMENT: &str = r#"
[flags]
show_error_entries_on_timeout = true
refresh_timeout_millis = 5000
untracked_sources = ["slow_source"]

[flags.resurface_max_count]
unspecified = 0
information = 0
recommendation = 1
critical_warning = 2

[[flags.refresh_timeouts]]
reason = "page_open"
millis = 2000

[[flags.issue_category_allowlists]]
category = "personal_safety"
source_ids = ["safety_check"]

[[groups]]
id = "security"
title = "Security"

[[groups.sources]]
id = "lock_screen"
kind = "dynamic"
package_name = "com.example.settings"
max_severity_level = "critical_warning"
refresh_on_page_open_allowed = true

[[groups.sources]]
id = "slow_source"
kind = "issue_only"
package_name = "com.example.slow"
profile = "all_profiles"
logging_allowed = false
"#;

#[test]
fn loads_flags_and_topology() {
    let (config, flags) = load_from_str(DOCUMENT).unwrap();

    assert_eq!(config.source_count(), 2);
    let slow = config.source("slow_source").unwrap();
    assert_eq!(slow.kind, SourceKind::IssueOnly);
    assert_eq!(slow.profile, Profile::AllProfiles);
    assert!(!slow.logging_allowed);
    assert_eq!(slow.max_severity_level, SeverityLevel::CriticalWarning);

    assert!(flags.show_error_entries_on_timeout);
    assert_eq!(flags.refresh_timeout(RefreshReason::PageOpen), Duration::from_secs(2));
    assert_eq!(flags.refresh_timeout(RefreshReason::Periodic), Duration::from_secs(5));
    assert_eq!(flags.resurface_max_count.get(SeverityLevel::CriticalWarning), 2);
    assert!(!flags.is_tracked("slow_source"));
    assert!(!flags.is_category_allowed(IssueCategory::PersonalSafety, "lock_screen"));
    // unspecified flags keep defaults
    assert_eq!(flags.persist_write_delay(), Duration::from_millis(500));
}

#[test]
fn loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(DOCUMENT.as_bytes()).unwrap();

    let (config, _) = load_from_path(file.path()).unwrap();
    assert_eq!(config.broadcasts().len(), 2);
}

#[test]
fn missing_file_is_io_error() {
    let result = load_from_path("/definitely/not/here.toml");
    assert!(matches!(result, Err(ConfigError::Io { .. })));
}

#[test]
fn malformed_document_is_parse_error() {
    let result = load_from_str("[[groups]]\nid = 3");
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn empty_document_uses_defaults() {
    let (config, flags) = load_from_str("").unwrap();
    assert_eq!(config.source_count(), 0);
    assert!(flags.enabled);
}
