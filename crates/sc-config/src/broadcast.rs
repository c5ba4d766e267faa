//! Refresh broadcast topology
//!
//! One [`Broadcast`] per package owning external sources. The refresh
//! tracker expands these into the (source, user) pairs it waits for.

use crate::source::SafetySource;
use serde::{Deserialize, Serialize};

/// Sources reached by one refresh broadcast to a package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Broadcast {
    /// Receiving package
    pub package_name: String,
    /// Sources answering for the profile parent
    pub source_ids_for_profile_parent: Vec<String>,
    /// Subset asked on page open
    pub source_ids_for_profile_parent_on_page_open: Vec<String>,
    /// Sources answering once per managed profile
    pub source_ids_for_managed_profiles: Vec<String>,
    /// Subset asked on page open
    pub source_ids_for_managed_profiles_on_page_open: Vec<String>,
}

impl Broadcast {
    /// Empty broadcast for `package_name`
    #[must_use]
    pub fn new(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            ..Self::default()
        }
    }

    pub(crate) fn add_source(&mut self, source: &SafetySource) {
        self.source_ids_for_profile_parent.push(source.id.clone());
        if source.refresh_on_page_open_allowed {
            self.source_ids_for_profile_parent_on_page_open
                .push(source.id.clone());
        }
        if source.applies_to_managed_profiles() {
            self.source_ids_for_managed_profiles.push(source.id.clone());
            if source.refresh_on_page_open_allowed {
                self.source_ids_for_managed_profiles_on_page_open
                    .push(source.id.clone());
            }
        }
    }

    /// Every source id this broadcast reaches, parent list first
    pub fn all_source_ids(&self) -> impl Iterator<Item = &str> {
        self.source_ids_for_profile_parent
            .iter()
            .chain(
                self.source_ids_for_managed_profiles
                    .iter()
                    .filter(|id| !self.source_ids_for_profile_parent.contains(id)),
            )
            .map(String::as_str)
    }
}
