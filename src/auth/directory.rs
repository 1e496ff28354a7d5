// Principal directory backed by the configured account list

use super::AuthError;
use crate::models::{Principal, PrincipalRole, PrincipalUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

/// Source of principal records
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    async fn find_by_name(&self, username: &str) -> Result<Option<Principal>, AuthError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Principal>, AuthError>;

    /// First principal holding `role`
    async fn find_by_role(&self, role: PrincipalRole) -> Result<Option<Principal>, AuthError>;

    async fn update(
        &self,
        username: &str,
        update: &PrincipalUpdate,
    ) -> Result<Principal, AuthError>;

    /// Returns false when no principal had that name
    async fn delete(&self, username: &str) -> Result<bool, AuthError>;

    /// Remove every expired account and return the removed usernames
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, AuthError>;
}

pub struct MemoryDirectory {
    principals: RwLock<HashMap<String, Principal>>,
}

impl MemoryDirectory {
    pub fn new(principals: Vec<Principal>) -> Self {
        let principals = principals
            .into_iter()
            .map(|p| (p.username.clone(), p))
            .collect();
        Self {
            principals: RwLock::new(principals),
        }
    }
}

#[async_trait]
impl PrincipalDirectory for MemoryDirectory {
    async fn find_by_name(&self, username: &str) -> Result<Option<Principal>, AuthError> {
        let principals = self.principals.read().await;
        Ok(principals.get(username).cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Principal>, AuthError> {
        let principals = self.principals.read().await;
        Ok(principals.values().find(|p| p.id == id).cloned())
    }

    async fn find_by_role(&self, role: PrincipalRole) -> Result<Option<Principal>, AuthError> {
        let principals = self.principals.read().await;
        Ok(principals
            .values()
            .filter(|p| p.role == role)
            .min_by_key(|p| p.id)
            .cloned())
    }

    async fn update(
        &self,
        username: &str,
        update: &PrincipalUpdate,
    ) -> Result<Principal, AuthError> {
        let mut principals = self.principals.write().await;
        let principal = principals
            .get_mut(username)
            .ok_or(AuthError::PrincipalNotFound)?;
        update.apply(principal);
        info!("Updated principal {}", username);
        Ok(principal.clone())
    }

    async fn delete(&self, username: &str) -> Result<bool, AuthError> {
        let mut principals = self.principals.write().await;
        Ok(principals.remove(username).is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, AuthError> {
        let mut principals = self.principals.write().await;
        let expired: Vec<String> = principals
            .values()
            .filter(|p| p.is_expired(now))
            .map(|p| p.username.clone())
            .collect();
        for username in &expired {
            principals.remove(username);
        }
        if !expired.is_empty() {
            info!("Removed {} expired principal(s)", expired.len());
        }
        Ok(expired)
    }
}
