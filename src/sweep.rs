// Periodic backstop for the lazy purges; runs the same predicates on a timer

use crate::auth::CachedDirectory;
use crate::block::BlockRegistry;
use crate::session::SessionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Counts removed by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub blocks: u64,
    pub sessions: u64,
    pub principals: u64,
}

/// Purge expired blocks, idle sessions and expired accounts once
pub async fn sweep_once(
    blocks: &BlockRegistry,
    sessions: &SessionManager,
    directory: &CachedDirectory,
) -> SweepReport {
    let purged_blocks = blocks.purge_expired().await.unwrap_or_else(|e| {
        warn!("Block sweep failed: {}", e);
        0
    });
    let purged_sessions = sessions.purge_idle().await.unwrap_or_else(|e| {
        warn!("Session sweep failed: {}", e);
        0
    });
    let purged_principals = directory.purge_expired_now().await.unwrap_or_else(|e| {
        warn!("Account sweep failed: {}", e);
        0
    });
    debug!(
        "Sweep removed {} block(s), {} session(s) and {} account(s)",
        purged_blocks, purged_sessions, purged_principals
    );
    SweepReport {
        blocks: purged_blocks,
        sessions: purged_sessions,
        principals: purged_principals,
    }
}

/// Run `sweep_once` every `interval` until `shutdown` flips to true
pub fn spawn_sweeper(
    blocks: Arc<BlockRegistry>,
    sessions: Arc<SessionManager>,
    directory: Arc<CachedDirectory>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting periodic sweep every {:?}", interval);
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep_once(&blocks, &sessions, &directory).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Periodic sweep stopped");
                        return;
                    }
                }
            }
        }
    })
}
