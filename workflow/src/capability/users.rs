//! User capability seam
//!
//! The engine never models users itself. It asks a [`UserCapability`] which
//! tier a user belongs to and which agents are available at a tier. Tiers are
//! named by [`LevelId`]; the engine resolves them against its level table at
//! check time, so renumbered or deactivated tiers take effect immediately.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::state::{DepartmentId, Level, LevelId, UserRef};

/// Display information about a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserRef,
    pub display_name: String,
    pub email: Option<String>,
}

/// Questions the engine asks about users
pub trait UserCapability: Send + Sync {
    /// Support level the user works at, `None` for non-agents
    fn user_level(&self, user: &UserRef) -> Option<LevelId>;

    fn user_departments(&self, user: &UserRef) -> BTreeSet<DepartmentId>;

    /// Extra gate on manual escalation targets. `current` is the requester's
    /// own resolved level.
    fn can_user_escalate_to(
        &self,
        _user: &UserRef,
        _current: Option<&Level>,
        _target: &Level,
    ) -> bool {
        true
    }

    /// Candidate pool for automatic assignment among agents working at one
    /// of `levels`
    fn available_agents(&self, _levels: &BTreeSet<LevelId>) -> Vec<UserRef> {
        Vec::new()
    }

    fn resolve_user(&self, user: &UserRef) -> Option<UserProfile>;
}

#[derive(Debug, Clone)]
struct DirectoryEntry {
    profile: UserProfile,
    level: Option<LevelId>,
    departments: BTreeSet<DepartmentId>,
    available: bool,
}

/// In-memory user directory
#[derive(Debug, Default)]
pub struct UserDirectory {
    entries: RwLock<BTreeMap<UserRef, DirectoryEntry>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent working at `level`
    pub fn add_agent(
        &self,
        profile: UserProfile,
        level: LevelId,
        departments: BTreeSet<DepartmentId>,
    ) {
        self.insert(DirectoryEntry {
            profile,
            level: Some(level),
            departments,
            available: true,
        });
    }

    /// Register a user with no support level (e.g. a customer)
    pub fn add_user(&self, profile: UserProfile) {
        self.insert(DirectoryEntry {
            profile,
            level: None,
            departments: BTreeSet::new(),
            available: false,
        });
    }

    /// Take an agent in or out of the automatic-assignment pool
    pub fn set_available(&self, user: &UserRef, available: bool) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(user) {
            Some(entry) => {
                entry.available = available;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, entry: DirectoryEntry) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(entry.profile.id.clone(), entry);
    }

    fn with_entry<R>(&self, user: &UserRef, f: impl FnOnce(&DirectoryEntry) -> R) -> Option<R> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(user).map(f)
    }
}

impl UserCapability for UserDirectory {
    fn user_level(&self, user: &UserRef) -> Option<LevelId> {
        self.with_entry(user, |entry| entry.level).flatten()
    }

    fn user_departments(&self, user: &UserRef) -> BTreeSet<DepartmentId> {
        self.with_entry(user, |entry| entry.departments.clone())
            .unwrap_or_default()
    }

    /// Agents may only target tiers up to one above their own
    fn can_user_escalate_to(
        &self,
        _user: &UserRef,
        current: Option<&Level>,
        target: &Level,
    ) -> bool {
        current.is_some_and(|own| target.rank <= own.rank + 1)
    }

    /// Available agents working at one of `levels`, ordered by id
    fn available_agents(&self, levels: &BTreeSet<LevelId>) -> Vec<UserRef> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .values()
            .filter(|entry| entry.available)
            .filter(|entry| entry.level.is_some_and(|id| levels.contains(&id)))
            .map(|entry| entry.profile.id.clone())
            .collect()
    }

    fn resolve_user(&self, user: &UserRef) -> Option<UserProfile> {
        self.with_entry(user, |entry| entry.profile.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(rank: u32) -> Level {
        Level {
            id: LevelId(rank),
            rank,
            name: format!("Level {rank}"),
            description: String::new(),
            can_escalate: rank < 4,
            can_assess_risk: rank >= 3,
            default_sla_hours: 24 * rank,
            active: true,
        }
    }

    fn profile(id: &str) -> UserProfile {
        UserProfile {
            id: UserRef::from(id),
            display_name: id.to_uppercase(),
            email: None,
        }
    }

    #[test]
    fn test_agent_lookup() {
        let directory = UserDirectory::new();
        directory.add_agent(profile("alice"), LevelId(2), BTreeSet::from([DepartmentId(7)]));
        directory.add_user(profile("bob"));

        let alice = UserRef::from("alice");
        assert_eq!(directory.user_level(&alice), Some(LevelId(2)));
        assert!(directory.user_departments(&alice).contains(&DepartmentId(7)));
        assert!(directory.user_level(&UserRef::from("bob")).is_none());
        assert!(directory.resolve_user(&UserRef::from("carol")).is_none());
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn test_available_agents_respects_levels_and_availability() {
        let directory = UserDirectory::new();
        directory.add_agent(profile("a1"), LevelId(1), BTreeSet::new());
        directory.add_agent(profile("a2"), LevelId(2), BTreeSet::new());
        directory.add_agent(profile("a3"), LevelId(3), BTreeSet::new());
        directory.set_available(&UserRef::from("a3"), false);

        let pool = directory.available_agents(&BTreeSet::from([LevelId(2), LevelId(3)]));
        assert_eq!(pool, vec![UserRef::from("a2")]);
    }

    #[test]
    fn test_escalation_target_limit() {
        let directory = UserDirectory::new();
        let a1 = UserRef::from("a1");
        let own = level(1);

        assert!(directory.can_user_escalate_to(&a1, Some(&own), &level(2)));
        assert!(!directory.can_user_escalate_to(&a1, Some(&own), &level(3)));
        assert!(!directory.can_user_escalate_to(&UserRef::from("nobody"), None, &level(2)));
    }
}
