//! Profile groups
//!
//! A [`UserProfileGroup`] is a profile parent plus its managed profiles,
//! computed on demand from the live platform topology exposed through
//! [`UserTopology`]. It is never persisted.

use parking_lot::RwLock;
use sc_model::UserId;
use serde::{Deserialize, Serialize};

/// One platform user as seen by the topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// User id
    pub id: UserId,
    /// Parent of a managed profile, `None` for full users
    pub profile_parent: Option<UserId>,
    /// User is currently running
    pub running: bool,
    /// Managed profile is paused by the user
    pub quiet_mode: bool,
}

impl UserInfo {
    /// Running full user
    #[must_use]
    pub fn full(id: UserId) -> Self {
        Self {
            id,
            profile_parent: None,
            running: true,
            quiet_mode: false,
        }
    }

    /// Running managed profile of `parent`
    #[must_use]
    pub fn managed(id: UserId, parent: UserId) -> Self {
        Self {
            id,
            profile_parent: Some(parent),
            running: true,
            quiet_mode: false,
        }
    }

    /// Whether this user is a managed profile
    #[inline]
    #[must_use]
    pub fn is_managed_profile(&self) -> bool {
        self.profile_parent.is_some()
    }
}

/// Live user/profile topology of the platform
pub trait UserTopology: Send + Sync + std::fmt::Debug {
    /// Snapshot of every known user
    fn users(&self) -> Vec<UserInfo>;
}

/// A profile parent and its managed profiles
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserProfileGroup {
    profile_parent: UserId,
    managed_profiles: Vec<UserId>,
    running_managed_profiles: Vec<UserId>,
}

impl UserProfileGroup {
    /// Group with no managed profiles
    #[must_use]
    pub fn single(user_id: UserId) -> Self {
        Self {
            profile_parent: user_id,
            managed_profiles: Vec::new(),
            running_managed_profiles: Vec::new(),
        }
    }

    /// Group from explicit members; `(id, running)` per managed profile
    #[must_use]
    pub fn new(profile_parent: UserId, managed: impl IntoIterator<Item = (UserId, bool)>) -> Self {
        let mut managed: Vec<(UserId, bool)> = managed
            .into_iter()
            .filter(|(id, _)| *id != profile_parent)
            .collect();
        managed.sort_unstable();
        managed.dedup_by_key(|(id, _)| *id);
        Self {
            profile_parent,
            managed_profiles: managed.iter().map(|(id, _)| *id).collect(),
            running_managed_profiles: managed
                .iter()
                .filter(|(_, running)| *running)
                .map(|(id, _)| *id)
                .collect(),
        }
    }

    /// Resolve the group containing `user_id`
    ///
    /// Returns `None` when the user is unknown, or is a managed profile
    /// whose parent is unknown.
    #[must_use]
    pub fn resolve(user_id: UserId, topology: &dyn UserTopology) -> Option<Self> {
        let users = topology.users();
        let user = users.iter().find(|u| u.id == user_id)?;
        let parent_id = user.profile_parent.unwrap_or(user.id);
        let parent = users.iter().find(|u| u.id == parent_id)?;
        if parent.is_managed_profile() {
            return None;
        }

        let managed = users
            .iter()
            .filter(|u| u.profile_parent == Some(parent_id))
            .map(|u| (u.id, u.running && !u.quiet_mode));
        Some(Self::new(parent_id, managed))
    }

    /// Every group the topology currently holds
    #[must_use]
    pub fn all(topology: &dyn UserTopology) -> Vec<Self> {
        let users = topology.users();
        let mut parents: Vec<UserId> = users
            .iter()
            .filter(|u| !u.is_managed_profile())
            .map(|u| u.id)
            .collect();
        parents.sort_unstable();
        parents
            .into_iter()
            .filter_map(|parent| Self::resolve(parent, topology))
            .collect()
    }

    /// Profile parent id
    #[inline]
    #[must_use]
    pub fn profile_parent(&self) -> UserId {
        self.profile_parent
    }

    /// Managed profiles, ascending
    #[inline]
    #[must_use]
    pub fn managed_profiles(&self) -> &[UserId] {
        &self.managed_profiles
    }

    /// Managed profiles that are running and not paused, ascending
    #[inline]
    #[must_use]
    pub fn running_managed_profiles(&self) -> &[UserId] {
        &self.running_managed_profiles
    }

    /// Whether `user_id` belongs to the group
    #[must_use]
    pub fn contains(&self, user_id: UserId) -> bool {
        self.profile_parent == user_id || self.managed_profiles.contains(&user_id)
    }

    /// Whether `user_id` is a managed profile of this group
    #[must_use]
    pub fn is_managed_profile(&self, user_id: UserId) -> bool {
        self.managed_profiles.contains(&user_id)
    }

    /// Whether `user_id` can currently answer requests
    #[must_use]
    pub fn is_running(&self, user_id: UserId) -> bool {
        self.profile_parent == user_id || self.running_managed_profiles.contains(&user_id)
    }

    /// Parent first, then managed profiles
    pub fn all_user_ids(&self) -> impl Iterator<Item = UserId> + '_ {
        std::iter::once(self.profile_parent).chain(self.managed_profiles.iter().copied())
    }
}

/// In-memory topology, editable at runtime
#[derive(Debug, Default)]
pub struct StaticUserTopology {
    users: RwLock<Vec<UserInfo>>,
}

impl StaticUserTopology {
    /// Topology with the given users
    #[must_use]
    pub fn new(users: Vec<UserInfo>) -> Self {
        Self {
            users: RwLock::new(users),
        }
    }

    /// Single full user
    #[must_use]
    pub fn single(user_id: UserId) -> Self {
        Self::new(vec![UserInfo::full(user_id)])
    }

    /// Add or replace a user
    pub fn upsert(&self, user: UserInfo) {
        let mut users = self.users.write();
        users.retain(|u| u.id != user.id);
        users.push(user);
    }

    /// Remove a user
    pub fn remove(&self, user_id: UserId) -> bool {
        let mut users = self.users.write();
        let before = users.len();
        users.retain(|u| u.id != user_id);
        users.len() != before
    }

    /// Toggle quiet mode of a managed profile
    pub fn set_quiet_mode(&self, user_id: UserId, quiet: bool) {
        if let Some(user) = self.users.write().iter_mut().find(|u| u.id == user_id) {
            user.quiet_mode = quiet;
        }
    }
}

impl UserTopology for StaticUserTopology {
    fn users(&self) -> Vec<UserInfo> {
        self.users.read().clone()
    }
}
