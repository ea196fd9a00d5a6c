//! Resolved permission sets, cached per role and per user.
//!
//! Invalidation is synchronous: the catalog calls it before a grant, revoke or
//! membership change returns. A generation counter stops a lookup that raced
//! with an invalidation from repopulating the cache with what it read before.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use warden_auth::PermissionSet;

#[derive(Debug, Default)]
struct CacheState {
    generation: u64,
    roles: HashMap<String, PermissionSet>,
    users: HashMap<String, PermissionSet>,
}

#[derive(Debug, Default)]
pub struct PermissionCache {
    state: RwLock<CacheState>,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot to pass back to `store_*` after loading from the store.
    pub fn generation(&self) -> u64 {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    pub fn role(&self, name: &str) -> Option<PermissionSet> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .roles
            .get(name)
            .cloned()
    }

    pub fn user(&self, username: &str) -> Option<PermissionSet> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .users
            .get(username)
            .cloned()
    }

    /// Cache `set` for a role unless an invalidation happened since `generation`.
    pub fn store_role(&self, generation: u64, name: &str, set: PermissionSet) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.generation == generation {
            state.roles.insert(name.to_string(), set);
        }
    }

    pub fn store_user(&self, generation: u64, username: &str, set: PermissionSet) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.generation == generation {
            state.users.insert(username.to_string(), set);
        }
    }

    /// Drop the role's entry and the entries of every user holding it.
    pub fn invalidate_role(&self, role: &str, holders: &[String]) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.generation += 1;
        state.roles.remove(role);
        for username in holders {
            state.users.remove(username);
        }
    }

    pub fn invalidate_user(&self, username: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.generation += 1;
        state.users.remove(username);
    }
}
