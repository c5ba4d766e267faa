//! Identity keys
//!
//! All keys are immutable value types used as map keys. Equality and
//! ordering are structural.

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Platform user (profile) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i32);

impl UserId {
    /// The primary user on a single-user device
    pub const SYSTEM: UserId = UserId(0);

    /// Wrap a raw user id
    #[inline]
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Raw numeric value
    #[inline]
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for UserId {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl FromStr for UserId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i32>()
            .map(Self)
            .map_err(|_| ModelError::InvalidUserId(s.to_string()))
    }
}

/// One source's data for one user
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceKey {
    source_id: String,
    user_id: UserId,
}

impl SourceKey {
    /// Create a key for `source_id` reporting on behalf of `user_id`
    #[inline]
    #[must_use]
    pub fn new(source_id: impl Into<String>, user_id: UserId) -> Self {
        Self {
            source_id: source_id.into(),
            user_id,
        }
    }

    /// Source identifier as declared in the config
    #[inline]
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// User the data belongs to
    #[inline]
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Key of an issue reported under this source key
    #[inline]
    #[must_use]
    pub fn issue(&self, issue_id: impl Into<String>) -> IssueKey {
        IssueKey::new(self.source_id.clone(), issue_id, self.user_id)
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/u{}", self.source_id, self.user_id)
    }
}

/// One issue instance, reported by one source for one user
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IssueKey {
    source_id: String,
    issue_id: String,
    user_id: UserId,
}

impl IssueKey {
    /// Create an issue key
    #[inline]
    #[must_use]
    pub fn new(source_id: impl Into<String>, issue_id: impl Into<String>, user_id: UserId) -> Self {
        Self {
            source_id: source_id.into(),
            issue_id: issue_id.into(),
            user_id,
        }
    }

    /// Reporting source
    #[inline]
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Issue identifier, unique within the source
    #[inline]
    #[must_use]
    pub fn issue_id(&self) -> &str {
        &self.issue_id
    }

    /// Owning user
    #[inline]
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The source key this issue was reported under
    #[inline]
    #[must_use]
    pub fn source_key(&self) -> SourceKey {
        SourceKey::new(self.source_id.clone(), self.user_id)
    }

    /// Whether the issue was reported under `key`
    #[inline]
    #[must_use]
    pub fn belongs_to(&self, key: &SourceKey) -> bool {
        self.source_id == key.source_id() && self.user_id == key.user_id()
    }
}

impl fmt::Display for IssueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/u{}", self.source_id, self.issue_id, self.user_id)
    }
}

/// Correlation token binding one refresh cycle to the responses it expects
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BroadcastId(String);

impl BroadcastId {
    /// Wrap an id received from the wire
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BroadcastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
