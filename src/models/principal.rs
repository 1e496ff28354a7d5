use crate::session::types::SessionLimit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalRole {
    #[default]
    User,
    Admin,
    Guest,
}

/// An account allowed to authenticate against the file endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    #[serde(default)]
    pub role: PrincipalRole,
    /// Maximum number of distinct source addresses, 0 = unlimited
    #[serde(default)]
    pub max_sessions: u32,
    #[serde(default)]
    pub disabled: bool,
    /// Only this source address may use the file endpoint when set
    #[serde(default)]
    pub bind_address: Option<String>,
    /// Account is removed on first lookup past this instant; never applies to admin or guest
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Principal {
    pub fn session_limit(&self) -> SessionLimit {
        SessionLimit::from(self.max_sessions)
    }

    pub fn is_admin(&self) -> bool {
        self.role == PrincipalRole::Admin
    }

    pub fn is_guest(&self) -> bool {
        self.role == PrincipalRole::Guest
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_admin()
            && !self.is_guest()
            && self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    /// Whether `address` may use this account
    pub fn accepts_address(&self, address: &str) -> bool {
        self.bind_address
            .as_deref()
            .is_none_or(|bound| bound == address)
    }
}

/// Mutable principal attributes exposed to administrators
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrincipalUpdate {
    pub max_sessions: Option<u32>,
    pub disabled: Option<bool>,
    /// `Some(None)` clears the binding
    #[serde(default)]
    pub bind_address: Option<Option<String>>,
}

impl PrincipalUpdate {
    pub fn apply(&self, principal: &mut Principal) {
        if let Some(max_sessions) = self.max_sessions {
            principal.max_sessions = max_sessions;
        }
        if let Some(disabled) = self.disabled {
            principal.disabled = disabled;
        }
        if let Some(bind_address) = &self.bind_address {
            principal.bind_address = bind_address.clone();
        }
    }
}
