// Session types and data structures

use crate::models::Principal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Sessions idle longer than this are purged (seconds)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: i64,
}

fn default_idle_timeout_secs() -> i64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl SessionConfig {
    /// Configured timeout, saturating instead of overflowing on unvalidated values
    pub fn idle_timeout(&self) -> Duration {
        Duration::try_seconds(self.idle_timeout_secs.max(0)).unwrap_or(Duration::MAX)
    }

    /// Sessions last seen strictly before this instant are idle
    pub fn idle_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.idle_timeout())
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Per-principal limit on distinct source addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionLimit {
    Fixed(u32),
    Unlimited,
}

impl SessionLimit {
    /// Whether `active_addresses` already uses up every slot
    pub fn is_exceeded_by(&self, active_addresses: u64) -> bool {
        match self {
            Self::Fixed(max) => active_addresses >= *max as u64,
            Self::Unlimited => false,
        }
    }

    pub fn as_max(&self) -> Option<u32> {
        match self {
            Self::Fixed(max) => Some(*max),
            Self::Unlimited => None,
        }
    }
}

impl From<u32> for SessionLimit {
    /// `0` means unlimited
    fn from(value: u32) -> Self {
        if value == 0 {
            Self::Unlimited
        } else {
            Self::Fixed(value)
        }
    }
}

/// Live session of one principal from one source address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: i64,
    /// Opaque reference for administrators, not a credential
    pub session_token: String,
    pub principal_id: i64,
    pub principal_name: String,
    pub address: String,
    pub user_agent: String,
    pub force_close: bool,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn is_idle(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_seen < cutoff
    }
}

/// Row to insert when a new (principal, address) pair is admitted
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_token: String,
    pub principal_id: i64,
    pub principal_name: String,
    pub address: String,
    pub user_agent: String,
    pub now: DateTime<Utc>,
}

impl NewSession {
    pub fn new(principal: &Principal, address: &str, user_agent: &str, now: DateTime<Utc>) -> Self {
        Self {
            session_token: uuid::Uuid::new_v4().simple().to_string(),
            principal_id: principal.id,
            principal_name: principal.username.clone(),
            address: address.to_string(),
            user_agent: user_agent.to_string(),
            now,
        }
    }

    pub fn into_session(self, id: i64) -> Session {
        Session {
            id,
            session_token: self.session_token,
            principal_id: self.principal_id,
            principal_name: self.principal_name,
            address: self.address,
            user_agent: self.user_agent,
            force_close: false,
            last_seen: self.now,
            created_at: self.now,
            updated_at: self.now,
        }
    }
}

/// Why an authenticated principal was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenialReason {
    /// Every address slot is taken by other addresses
    SessionLimit { limit: u32 },
    /// The session was kicked; the next attempt is admitted afresh
    ForceClosed,
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::SessionLimit { limit } => {
                write!(f, "Session limit of {} address(es) reached", limit)
            }
            DenialReason::ForceClosed => write!(f, "Session was closed by an administrator"),
        }
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Admitted(Session),
    Denied(DenialReason),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            Admission::Admitted(session) => Some(session),
            Admission::Denied(_) => None,
        }
    }

    pub fn into_session(self) -> Option<Session> {
        match self {
            Admission::Admitted(session) => Some(session),
            Admission::Denied(_) => None,
        }
    }
}
