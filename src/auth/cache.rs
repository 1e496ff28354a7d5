// Memoized principal lookups with explicit invalidation on write

use super::AuthError;
use super::directory::PrincipalDirectory;
use crate::clock::Clock;
use crate::models::{Principal, PrincipalRole, PrincipalUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Cache of principals by name plus the admin and guest singletons.
///
/// Fills carry the generation observed before the directory read; every invalidation
/// bumps it under the same lock, so a fill that raced a write is dropped.
#[derive(Debug, Default)]
pub struct PrincipalCache {
    by_name: RwLock<HashMap<String, Principal>>,
    admin: RwLock<Option<Principal>>,
    guest: RwLock<Option<Principal>>,
    generation: AtomicU64,
}

impl PrincipalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot to pass to the `*_if_current` fills
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn get(&self, username: &str) -> Option<Principal> {
        let by_name = self.by_name.read().unwrap_or_else(|e| e.into_inner());
        by_name.get(username).cloned()
    }

    /// Store `principal` unless an invalidation happened after `seen`
    pub fn insert_if_current(&self, principal: Principal, seen: u64) -> bool {
        let mut by_name = self.by_name.write().unwrap_or_else(|e| e.into_inner());
        if self.generation() != seen {
            return false;
        }
        by_name.insert(principal.username.clone(), principal);
        true
    }

    pub fn invalidate(&self, username: &str) {
        let mut by_name = self.by_name.write().unwrap_or_else(|e| e.into_inner());
        self.bump();
        by_name.remove(username);
    }

    fn role_slot(&self, role: PrincipalRole) -> Option<&RwLock<Option<Principal>>> {
        match role {
            PrincipalRole::Admin => Some(&self.admin),
            PrincipalRole::Guest => Some(&self.guest),
            PrincipalRole::User => None,
        }
    }

    /// Cached admin/guest principal; always `None` for plain users
    pub fn get_role(&self, role: PrincipalRole) -> Option<Principal> {
        let slot = self.role_slot(role)?;
        slot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_role_if_current(
        &self,
        role: PrincipalRole,
        principal: Principal,
        seen: u64,
    ) -> bool {
        let Some(slot) = self.role_slot(role) else {
            return false;
        };
        let mut slot = slot.write().unwrap_or_else(|e| e.into_inner());
        if self.generation() != seen {
            return false;
        }
        *slot = Some(principal);
        true
    }

    pub fn invalidate_role(&self, role: PrincipalRole) {
        if let Some(slot) = self.role_slot(role) {
            let mut slot = slot.write().unwrap_or_else(|e| e.into_inner());
            self.bump();
            *slot = None;
        }
    }
}

/// Directory wrapper that memoizes reads, invalidates on every write and
/// drops expired accounts when they are looked up
pub struct CachedDirectory {
    inner: Arc<dyn PrincipalDirectory>,
    cache: PrincipalCache,
    clock: Arc<dyn Clock>,
}

impl CachedDirectory {
    pub fn new(inner: Arc<dyn PrincipalDirectory>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            cache: PrincipalCache::new(),
            clock,
        }
    }

    pub fn cache(&self) -> &PrincipalCache {
        &self.cache
    }

    pub async fn admin(&self) -> Result<Option<Principal>, AuthError> {
        self.find_by_role(PrincipalRole::Admin).await
    }

    pub async fn guest(&self) -> Result<Option<Principal>, AuthError> {
        self.find_by_role(PrincipalRole::Guest).await
    }

    /// Remove expired accounts on the sweep; returns how many went
    pub async fn purge_expired_now(&self) -> Result<u64, AuthError> {
        let removed = self.purge_expired(self.clock.now()).await?;
        Ok(removed.len() as u64)
    }

    async fn expire(&self, principal: &Principal) -> Result<(), AuthError> {
        self.inner.delete(&principal.username).await?;
        self.cache.invalidate(&principal.username);
        info!("Removed expired principal {}", principal.username);
        Ok(())
    }

    /// Drop `principal` if it has expired, otherwise hand it back
    async fn live(&self, principal: Principal) -> Result<Option<Principal>, AuthError> {
        if principal.is_expired(self.clock.now()) {
            self.expire(&principal).await?;
            return Ok(None);
        }
        Ok(Some(principal))
    }
}

#[async_trait]
impl PrincipalDirectory for CachedDirectory {
    async fn find_by_name(&self, username: &str) -> Result<Option<Principal>, AuthError> {
        if let Some(principal) = self.cache.get(username) {
            return self.live(principal).await;
        }

        let seen = self.cache.generation();
        let Some(principal) = self.inner.find_by_name(username).await? else {
            return Ok(None);
        };
        let principal = self.live(principal).await?;
        if let Some(ref principal) = principal
            && !self.cache.insert_if_current(principal.clone(), seen)
        {
            debug!("Skipped caching {} after a concurrent write", username);
        }
        Ok(principal)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Principal>, AuthError> {
        let seen = self.cache.generation();
        let Some(principal) = self.inner.find_by_id(id).await? else {
            return Ok(None);
        };
        let principal = self.live(principal).await?;
        if let Some(ref principal) = principal {
            self.cache.insert_if_current(principal.clone(), seen);
        }
        Ok(principal)
    }

    async fn find_by_role(&self, role: PrincipalRole) -> Result<Option<Principal>, AuthError> {
        if let Some(principal) = self.cache.get_role(role) {
            return Ok(Some(principal));
        }
        let seen = self.cache.generation();
        let principal = self.inner.find_by_role(role).await?;
        if let Some(ref principal) = principal {
            self.cache.set_role_if_current(role, principal.clone(), seen);
        }
        Ok(principal)
    }

    async fn update(
        &self,
        username: &str,
        update: &PrincipalUpdate,
    ) -> Result<Principal, AuthError> {
        let updated = self.inner.update(username, update).await?;
        self.cache.invalidate(username);
        if updated.is_admin() || updated.is_guest() {
            self.cache.invalidate_role(updated.role);
        }
        debug!("Invalidated cached principal {}", username);
        Ok(updated)
    }

    async fn delete(&self, username: &str) -> Result<bool, AuthError> {
        let deleted = self.inner.delete(username).await?;
        self.cache.invalidate(username);
        self.cache.invalidate_role(PrincipalRole::Admin);
        self.cache.invalidate_role(PrincipalRole::Guest);
        Ok(deleted)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, AuthError> {
        let removed = self.inner.purge_expired(now).await?;
        for username in &removed {
            self.cache.invalidate(username);
        }
        Ok(removed)
    }
}
