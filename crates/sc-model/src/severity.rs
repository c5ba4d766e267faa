//! Severity scales
//!
//! Sources grade their statuses and issues with [`SeverityLevel`]. The
//! aggregated view exposes an [`OverallSeverity`], whose lowest rank is
//! `Unknown` (no data at all).

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity attached to a source status or issue
///
/// Variants are declared in ascending order so the derived `Ord` ranks
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityLevel {
    /// Source has not graded its state
    Unspecified,
    /// Informational, nothing to act on
    Information,
    /// User should act at some point
    Recommendation,
    /// User should act now
    CriticalWarning,
}

impl SeverityLevel {
    /// Every level in ascending order
    pub const ALL: [SeverityLevel; 4] = [
        SeverityLevel::Unspecified,
        SeverityLevel::Information,
        SeverityLevel::Recommendation,
        SeverityLevel::CriticalWarning,
    ];

    /// Wire value
    #[inline]
    #[must_use]
    pub fn value(self) -> u16 {
        match self {
            SeverityLevel::Unspecified => 100,
            SeverityLevel::Information => 200,
            SeverityLevel::Recommendation => 300,
            SeverityLevel::CriticalWarning => 400,
        }
    }

    /// Parse a wire value
    ///
    /// # Errors
    /// `ModelError::UnknownSeverity` for values outside the scale
    pub fn from_value(value: u16) -> Result<Self, ModelError> {
        Self::ALL
            .into_iter()
            .find(|level| level.value() == value)
            .ok_or(ModelError::UnknownSeverity(value))
    }
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SeverityLevel::Unspecified => "unspecified",
            SeverityLevel::Information => "information",
            SeverityLevel::Recommendation => "recommendation",
            SeverityLevel::CriticalWarning => "critical_warning",
        };
        f.write_str(name)
    }
}

/// Severity of the aggregated view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallSeverity {
    /// No source has reported anything yet
    #[default]
    Unknown,
    /// Data present, nothing above informational
    Ok,
    /// At least one recommendation
    Recommendation,
    /// At least one critical warning
    CriticalWarning,
}

impl From<SeverityLevel> for OverallSeverity {
    fn from(level: SeverityLevel) -> Self {
        match level {
            SeverityLevel::Unspecified | SeverityLevel::Information => OverallSeverity::Ok,
            SeverityLevel::Recommendation => OverallSeverity::Recommendation,
            SeverityLevel::CriticalWarning => OverallSeverity::CriticalWarning,
        }
    }
}
