// Block registry: lookup and administration of blocked addresses

use super::types::{BlockConfig, BlockEntry};
use crate::clock::Clock;
use crate::pagination::{Page, PageRequest};
use crate::storage::{StorageBackend, StorageError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Registry of blocked source addresses
pub struct BlockRegistry {
    storage: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    config: BlockConfig,
}

impl BlockRegistry {
    pub fn new(storage: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>, config: BlockConfig) -> Self {
        Self {
            storage,
            clock,
            config,
        }
    }

    /// Delete every expired block (also used by the periodic sweep)
    pub async fn purge_expired(&self) -> Result<u64, StorageError> {
        let count = self.storage.purge_expired_blocks(self.clock.now()).await?;
        if count > 0 {
            debug!("Purged {} expired blocks", count);
        }
        Ok(count)
    }

    // Lazy eviction on read paths; a missed purge only delays cleanup
    async fn purge_best_effort(&self) {
        if let Err(e) = self.purge_expired().await {
            warn!("Failed to purge expired blocks: {}", e);
        }
    }

    /// Whether `address` is currently blocked
    pub async fn is_blocked(&self, address: &str) -> Result<bool, StorageError> {
        self.purge_best_effort().await;

        let now = self.clock.now();
        let Some(block) = self.storage.get_block_by_address(address).await? else {
            return Ok(false);
        };

        if block.is_expired(now) {
            if let Err(e) = self.storage.delete_block_if_expired(block.id, now).await {
                warn!("Failed to delete expired block {}: {}", block.id, e);
            }
            return Ok(false);
        }

        debug!("Address {} is blocked (block {})", address, block.id);
        Ok(true)
    }

    /// `is_blocked` with the configured failure policy applied
    pub async fn check(&self, address: &str) -> bool {
        match self.is_blocked(address).await {
            Ok(blocked) => blocked,
            Err(e) => {
                error!("Block lookup for {} failed: {}", address, e);
                !self.config.fail_open
            }
        }
    }

    /// Block `address`, or refresh remark and expiry of its existing block
    pub async fn add_block(
        &self,
        address: &str,
        remark: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<BlockEntry, StorageError> {
        if address.trim().is_empty() {
            return Err(StorageError::InvalidData("address must not be empty".to_string()));
        }

        self.purge_best_effort().await;
        let block = self
            .storage
            .upsert_block(address, remark, expires_at, self.clock.now())
            .await?;

        match block.expires_at {
            Some(expires_at) => info!("Blocked {} until {} ({})", address, expires_at, remark),
            None => info!("Blocked {} permanently ({})", address, remark),
        }
        Ok(block)
    }

    pub async fn update_block(
        &self,
        id: i64,
        remark: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<BlockEntry, StorageError> {
        self.purge_best_effort().await;
        let block = self
            .storage
            .update_block(id, remark, expires_at, self.clock.now())
            .await?;
        info!("Updated block {} for {}", id, block.address);
        Ok(block)
    }

    /// Returns false when no block had that id
    pub async fn delete_block(&self, id: i64) -> Result<bool, StorageError> {
        let deleted = self.storage.delete_block(id).await?;
        if deleted {
            info!("Deleted block {}", id);
        }
        Ok(deleted)
    }

    pub async fn list_blocks(&self, page: PageRequest) -> Result<Page<BlockEntry>, StorageError> {
        self.purge_best_effort().await;
        self.storage.list_blocks(page.validate()).await
    }
}
