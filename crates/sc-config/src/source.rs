//! Source declarations

use sc_model::SeverityLevel;
use serde::{Deserialize, Serialize};

/// How a source contributes data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Fixed entry, never reports data
    Static,
    /// Reports a status and issues
    Dynamic,
    /// Reports issues only
    IssueOnly,
}

/// Which profiles a source reports for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Profile parent only
    #[default]
    PrimaryProfileOnly,
    /// Profile parent and every managed profile
    AllProfiles,
}

/// Display state before the source reports anything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialDisplayState {
    /// Shown and interactive
    #[default]
    Enabled,
    /// Shown greyed out
    Disabled,
    /// Not shown until data arrives
    Hidden,
}

fn default_max_severity() -> SeverityLevel {
    SeverityLevel::CriticalWarning
}

fn default_true() -> bool {
    true
}

/// One configured source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySource {
    /// Unique source id
    pub id: String,
    /// Contribution kind
    pub kind: SourceKind,
    /// Package allowed to report for this source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    /// Profiles the source applies to
    #[serde(default)]
    pub profile: Profile,
    /// Highest severity the source may report
    #[serde(default = "default_max_severity")]
    pub max_severity_level: SeverityLevel,
    /// Whether opening the page asks this source for data
    #[serde(default)]
    pub refresh_on_page_open_allowed: bool,
    /// Whether the source is counted in telemetry
    #[serde(default = "default_true")]
    pub logging_allowed: bool,
    /// Display state before any data
    #[serde(default)]
    pub initial_display_state: InitialDisplayState,
}

impl SafetySource {
    /// Dynamic source owned by `package_name`
    #[must_use]
    pub fn dynamic(id: impl Into<String>, package_name: impl Into<String>) -> Self {
        Self::external(id, SourceKind::Dynamic, package_name)
    }

    /// Issue-only source owned by `package_name`
    #[must_use]
    pub fn issue_only(id: impl Into<String>, package_name: impl Into<String>) -> Self {
        Self::external(id, SourceKind::IssueOnly, package_name)
    }

    /// Static entry
    #[must_use]
    pub fn fixed(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: SourceKind::Static,
            package_name: None,
            profile: Profile::PrimaryProfileOnly,
            max_severity_level: default_max_severity(),
            refresh_on_page_open_allowed: false,
            logging_allowed: true,
            initial_display_state: InitialDisplayState::Enabled,
        }
    }

    fn external(id: impl Into<String>, kind: SourceKind, package_name: impl Into<String>) -> Self {
        Self {
            kind,
            package_name: Some(package_name.into()),
            ..Self::fixed(id)
        }
    }

    /// Apply to managed profiles too
    #[inline]
    #[must_use]
    pub fn for_all_profiles(mut self) -> Self {
        self.profile = Profile::AllProfiles;
        self
    }

    /// Cap reported severity
    #[inline]
    #[must_use]
    pub fn with_max_severity(mut self, level: SeverityLevel) -> Self {
        self.max_severity_level = level;
        self
    }

    /// Ask on page open
    #[inline]
    #[must_use]
    pub fn refreshed_on_page_open(mut self) -> Self {
        self.refresh_on_page_open_allowed = true;
        self
    }

    /// Exclude from telemetry
    #[inline]
    #[must_use]
    pub fn without_logging(mut self) -> Self {
        self.logging_allowed = false;
        self
    }

    /// Source reports data through the API
    #[inline]
    #[must_use]
    pub fn is_external(&self) -> bool {
        self.kind != SourceKind::Static
    }

    /// Source reports for managed profiles
    #[inline]
    #[must_use]
    pub fn applies_to_managed_profiles(&self) -> bool {
        self.profile == Profile::AllProfiles
    }

    /// Source may only report issues
    #[inline]
    #[must_use]
    pub fn is_issue_only(&self) -> bool {
        self.kind == SourceKind::IssueOnly
    }
}

/// Named group of sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySourcesGroup {
    /// Unique group id
    pub id: String,
    /// Display title
    #[serde(default)]
    pub title: String,
    /// Sources in declaration order
    #[serde(default)]
    pub sources: Vec<SafetySource>,
}

impl SafetySourcesGroup {
    /// Create a group
    #[must_use]
    pub fn new(id: impl Into<String>, sources: Vec<SafetySource>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            sources,
        }
    }
}
