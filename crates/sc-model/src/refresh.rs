//! Refresh vocabulary

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Why a refresh was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshReason {
    /// The safety page was opened
    PageOpen,
    /// The user pressed the rescan button
    RescanButtonClick,
    /// Device finished booting
    Reboot,
    /// Device locale changed
    LocaleChange,
    /// The safety center was just enabled
    SafetyCenterEnabled,
    /// Anything else
    Other,
    /// Periodic background refresh
    Periodic,
}

impl RefreshReason {
    /// Every reason
    pub const ALL: [RefreshReason; 7] = [
        RefreshReason::PageOpen,
        RefreshReason::RescanButtonClick,
        RefreshReason::Reboot,
        RefreshReason::LocaleChange,
        RefreshReason::SafetyCenterEnabled,
        RefreshReason::Other,
        RefreshReason::Periodic,
    ];

    /// Request type sent to sources for this reason
    #[inline]
    #[must_use]
    pub fn request_type(self) -> RequestType {
        match self {
            RefreshReason::RescanButtonClick => RequestType::FetchFreshData,
            _ => RequestType::GetData,
        }
    }

    /// Refresh status shown while a refresh for this reason is running
    #[inline]
    #[must_use]
    pub fn in_progress_status(self) -> RefreshStatus {
        match self {
            RefreshReason::RescanButtonClick => RefreshStatus::FullRescanInProgress,
            _ => RefreshStatus::DataFetchInProgress,
        }
    }

    /// Wire value
    #[inline]
    #[must_use]
    pub fn value(self) -> u16 {
        match self {
            RefreshReason::PageOpen => 100,
            RefreshReason::RescanButtonClick => 200,
            RefreshReason::Reboot => 300,
            RefreshReason::LocaleChange => 400,
            RefreshReason::SafetyCenterEnabled => 500,
            RefreshReason::Other => 600,
            RefreshReason::Periodic => 700,
        }
    }

    /// Short name, also accepted by `FromStr`
    #[inline]
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            RefreshReason::PageOpen => "page_open",
            RefreshReason::RescanButtonClick => "rescan_button_click",
            RefreshReason::Reboot => "reboot",
            RefreshReason::LocaleChange => "locale_change",
            RefreshReason::SafetyCenterEnabled => "safety_center_enabled",
            RefreshReason::Other => "other",
            RefreshReason::Periodic => "periodic",
        }
    }
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RefreshReason {
    type Err = ModelError;

    /// Accepts either the short name or the wire value
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let by_value = s.parse::<u16>().ok();
        Self::ALL
            .into_iter()
            .find(|reason| reason.name() == s || Some(reason.value()) == by_value)
            .ok_or_else(|| ModelError::UnknownRefreshReason(s.to_string()))
    }
}

/// What sources are asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// Return whatever is cached
    GetData,
    /// Recompute state before answering
    FetchFreshData,
}

/// Refresh state surfaced in the aggregated view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    /// No refresh in flight
    #[default]
    None,
    /// Sources are asked for their data
    DataFetchInProgress,
    /// Sources are asked to rescan
    FullRescanInProgress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rescan_fetches_fresh() {
        for reason in RefreshReason::ALL {
            let expected = if reason == RefreshReason::RescanButtonClick {
                RequestType::FetchFreshData
            } else {
                RequestType::GetData
            };
            assert_eq!(reason.request_type(), expected, "{reason}");
        }
    }

    #[test]
    fn parse_by_name_and_value() {
        assert_eq!("page_open".parse(), Ok(RefreshReason::PageOpen));
        assert_eq!("200".parse(), Ok(RefreshReason::RescanButtonClick));
        assert!("sometimes".parse::<RefreshReason>().is_err());
        assert!("150".parse::<RefreshReason>().is_err());
    }

    #[test]
    fn status_while_in_progress() {
        assert_eq!(
            RefreshReason::RescanButtonClick.in_progress_status(),
            RefreshStatus::FullRescanInProgress
        );
        assert_eq!(
            RefreshReason::Periodic.in_progress_status(),
            RefreshStatus::DataFetchInProgress
        );
    }
}
