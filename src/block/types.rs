// Block entry types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Block registry configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockConfig {
    /// Treat storage failures as "not blocked" instead of "blocked"
    #[serde(default)]
    pub fail_open: bool,
}

/// A blocked source address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BlockEntry {
    pub id: i64,
    pub address: String,
    pub remark: String,
    /// `None` means the block never expires
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BlockEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at < now)
    }

    pub fn is_permanent(&self) -> bool {
        self.expires_at.is_none()
    }
}
