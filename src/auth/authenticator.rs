// Credential verification against the principal directory

use super::AuthError;
use super::directory::PrincipalDirectory;
use crate::clock::Clock;
use crate::models::Principal;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Verifies a username/secret pair and resolves the principal
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, username: &str, secret: &str) -> Result<Principal, AuthError>;
}

/// Authenticator checking bcrypt password hashes from a directory
pub struct DirectoryAuthenticator {
    directory: Arc<dyn PrincipalDirectory>,
    clock: Arc<dyn Clock>,
}

impl DirectoryAuthenticator {
    pub fn new(directory: Arc<dyn PrincipalDirectory>, clock: Arc<dyn Clock>) -> Self {
        Self { directory, clock }
    }
}

#[async_trait]
impl Authenticator for DirectoryAuthenticator {
    async fn authenticate(&self, username: &str, secret: &str) -> Result<Principal, AuthError> {
        if username.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let principal = self
            .directory
            .find_by_name(username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        // Expired accounts look like unknown ones
        if principal.is_expired(self.clock.now()) {
            debug!("Refused expired account {}", username);
            return Err(AuthError::InvalidCredentials);
        }

        let secret = secret.to_string();
        let hash = principal.password_hash.clone();
        let verified = tokio::task::spawn_blocking(move || bcrypt::verify(secret, &hash))
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;

        match verified {
            Ok(true) => {}
            Ok(false) => return Err(AuthError::InvalidCredentials),
            Err(e) => {
                warn!("Unusable password hash for {}: {}", username, e);
                return Err(AuthError::InvalidCredentials);
            }
        }

        if principal.disabled {
            return Err(AuthError::Disabled);
        }

        debug!("Authenticated {}", username);
        Ok(principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::directory::MemoryDirectory;
    use crate::clock::ManualClock;
    use crate::models::PrincipalRole;
    use chrono::Duration;

    fn alice(disabled: bool) -> Principal {
        Principal {
            id: 1,
            username: "alice".to_string(),
            password_hash: bcrypt::hash("hunter2", 4).unwrap(),
            role: PrincipalRole::User,
            max_sessions: 0,
            disabled,
            bind_address: None,
            expires_at: None,
        }
    }

    fn authenticator(disabled: bool) -> DirectoryAuthenticator {
        DirectoryAuthenticator::new(
            Arc::new(MemoryDirectory::new(vec![alice(disabled)])),
            Arc::new(ManualClock::default()),
        )
    }

    #[tokio::test]
    async fn test_valid_credentials() {
        let principal = authenticator(false)
            .authenticate("alice", "hunter2")
            .await
            .unwrap();
        assert_eq!(principal.id, 1);
    }

    #[tokio::test]
    async fn test_wrong_secret_and_unknown_user() {
        let auth = authenticator(false);
        assert_eq!(
            auth.authenticate("alice", "wrong").await.unwrap_err(),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            auth.authenticate("mallory", "hunter2").await.unwrap_err(),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            auth.authenticate("", "").await.unwrap_err(),
            AuthError::InvalidCredentials
        );
    }

    #[tokio::test]
    async fn test_disabled_principal() {
        let err = authenticator(true)
            .authenticate("alice", "hunter2")
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::Disabled);
    }

    #[tokio::test]
    async fn test_expired_account_is_rejected() {
        let clock = Arc::new(ManualClock::default());
        let mut principal = alice(false);
        principal.expires_at = Some(clock.now() + Duration::hours(1));
        let auth = DirectoryAuthenticator::new(
            Arc::new(MemoryDirectory::new(vec![principal])),
            clock.clone(),
        );

        assert!(auth.authenticate("alice", "hunter2").await.is_ok());
        clock.advance(Duration::hours(2));
        assert_eq!(
            auth.authenticate("alice", "hunter2").await.unwrap_err(),
            AuthError::InvalidCredentials
        );
    }
}
