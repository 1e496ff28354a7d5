// Failed sign-in tracking per source address

use crate::clock::Clock;
use crate::config::LoginConfig;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct FailedAttempts {
    count: u32,
    /// Entry is forgotten after this instant
    expires_at: DateTime<Utc>,
}

/// Locks an address out after too many failed sign-ins
pub struct LoginGuard {
    attempts: RwLock<HashMap<String, FailedAttempts>>,
    clock: Arc<dyn Clock>,
    max_failed_attempts: u32,
    lock_duration: Duration,
}

impl LoginGuard {
    pub fn new(config: &LoginConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            attempts: RwLock::new(HashMap::new()),
            clock,
            max_failed_attempts: config.max_failed_attempts,
            lock_duration: Duration::try_seconds(config.lock_duration_secs.max(0))
                .unwrap_or(Duration::MAX),
        }
    }

    /// Whether `address` is locked out; a locked address has its lock extended
    pub async fn is_locked(&self, address: &str) -> bool {
        if self.max_failed_attempts == 0 {
            return false;
        }

        let now = self.clock.now();
        let mut attempts = self.attempts.write().await;
        let Some(entry) = attempts.get_mut(address) else {
            return false;
        };

        if entry.expires_at <= now {
            attempts.remove(address);
            return false;
        }
        if entry.count >= self.max_failed_attempts {
            entry.expires_at = self.lock_until(now);
            return true;
        }
        false
    }

    fn lock_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.lock_duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub async fn record_failure(&self, address: &str) {
        let now = self.clock.now();
        let mut attempts = self.attempts.write().await;
        attempts.retain(|_, a| a.expires_at > now);

        let entry = attempts
            .entry(address.to_string())
            .or_insert(FailedAttempts {
                count: 0,
                expires_at: now,
            });
        entry.count = entry.count.saturating_add(1);
        entry.expires_at = self.lock_until(now);

        if self.max_failed_attempts > 0 && entry.count >= self.max_failed_attempts {
            debug!("Locking {} after {} failed sign-ins", address, entry.count);
        }
    }

    pub async fn clear(&self, address: &str) {
        let mut attempts = self.attempts.write().await;
        attempts.remove(address);
    }
}
