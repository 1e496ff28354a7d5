// Session manager: admission, listing and eviction of file endpoint sessions

use super::types::{Admission, DenialReason, NewSession, Session, SessionConfig};
use crate::clock::Clock;
use crate::models::Principal;
use crate::pagination::{Page, PageRequest};
use crate::storage::{StorageBackend, StorageError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Session manager for handling session lifecycle and operations
pub struct SessionManager {
    storage: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(storage: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>, config: SessionConfig) -> Self {
        Self {
            storage,
            clock,
            config,
        }
    }

    /// Delete sessions idle past the threshold (also used by the periodic sweep)
    pub async fn purge_idle(&self) -> Result<u64, StorageError> {
        let cutoff = self.config.idle_cutoff(self.clock.now());
        let count = self.storage.purge_idle_sessions(cutoff).await?;
        if count > 0 {
            debug!("Purged {} idle sessions", count);
        }
        Ok(count)
    }

    async fn purge_best_effort(&self) {
        if let Err(e) = self.purge_idle().await {
            warn!("Failed to purge idle sessions: {}", e);
        }
    }

    /// Admit, refresh or reject `principal` connecting from `address`.
    ///
    /// A denial is returned as [`Admission::Denied`]; only storage failures are errors,
    /// and callers must treat those as "not admitted".
    pub async fn ensure_session(
        &self,
        principal: &Principal,
        address: &str,
        user_agent: &str,
    ) -> Result<Admission, StorageError> {
        self.purge_best_effort().await;
        let now = self.clock.now();

        if let Some(existing) = self
            .storage
            .get_session_by_pair(principal.id, address)
            .await?
        {
            if existing.force_close {
                if let Err(e) = self.storage.delete_session(existing.id).await {
                    warn!("Failed to drop force-closed session {}: {}", existing.id, e);
                }
                info!(
                    "Rejected force-closed session {} for {} from {}",
                    existing.session_token, principal.username, address
                );
                return Ok(Admission::Denied(DenialReason::ForceClosed));
            }

            if let Some(session) = self
                .storage
                .touch_session(existing.id, user_agent, now)
                .await?
            {
                return Ok(Admission::Admitted(session));
            }
            // Purged or kicked between lookup and refresh: admit as a new pair
        }

        let limit = principal.session_limit();
        let new_session = NewSession::new(principal, address, user_agent, now);
        match self
            .storage
            .create_session_within_limit(new_session, limit)
            .await?
        {
            Some(session) => {
                info!(
                    "Created session {} for {} from {}",
                    session.session_token, principal.username, address
                );
                Ok(Admission::Admitted(session))
            }
            None => {
                let limit = limit.as_max().unwrap_or_default();
                warn!(
                    "User {} reached the session limit ({}), rejecting {}",
                    principal.username, limit, address
                );
                Ok(Admission::Denied(DenialReason::SessionLimit { limit }))
            }
        }
    }

    /// Sessions ordered by most recent activity, optionally for one principal name
    pub async fn list_sessions(
        &self,
        principal_name: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<Session>, StorageError> {
        self.purge_best_effort().await;
        let principal_name = principal_name.filter(|name| !name.is_empty());
        self.storage.list_sessions(principal_name, page.validate()).await
    }

    pub async fn get_session(&self, id: i64) -> Result<Option<Session>, StorageError> {
        self.purge_best_effort().await;
        self.storage.get_session(id).await
    }

    /// Kick a session; the owning address is denied once and must then re-admit
    pub async fn force_close_session(&self, id: i64) -> Result<(), StorageError> {
        if !self
            .storage
            .mark_session_force_close(id, self.clock.now())
            .await?
        {
            return Err(StorageError::NotFound);
        }
        info!("Session {} force-closed", id);
        Ok(())
    }

    /// Kick every session of a principal (force logout from all addresses)
    pub async fn force_close_principal_sessions(&self, principal_id: i64) -> Result<u64, StorageError> {
        let count = self
            .storage
            .mark_principal_force_close(principal_id, self.clock.now())
            .await?;
        info!("Force-closed {} sessions for principal {}", count, principal_id);
        Ok(count)
    }
}
