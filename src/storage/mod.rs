// Storage backend abstraction
// Blocks and sessions live in one shared store; every invariant the gate relies on
// (unique address, unique principal/address pair, atomic admission) is enforced here

pub mod memory;
pub mod postgres;

use crate::block::BlockEntry;
use crate::pagination::{Page, PageRequest};
use crate::session::types::{NewSession, Session, SessionLimit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

/// Storage backend trait for block and session records
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // Block operations

    /// Delete every block whose expiry lies before `now`
    async fn purge_expired_blocks(&self, now: DateTime<Utc>) -> Result<u64, StorageError>;

    async fn get_block_by_address(&self, address: &str)
    -> Result<Option<BlockEntry>, StorageError>;

    /// Delete the block only if it is still expired at `now`
    async fn delete_block_if_expired(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// Insert a block or overwrite remark/expiry of the existing one for the address
    async fn upsert_block(
        &self,
        address: &str,
        remark: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<BlockEntry, StorageError>;

    /// Overwrite remark/expiry by id; `NotFound` if the id does not exist
    async fn update_block(
        &self,
        id: i64,
        remark: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<BlockEntry, StorageError>;

    async fn delete_block(&self, id: i64) -> Result<bool, StorageError>;

    /// Newest first
    async fn list_blocks(&self, page: PageRequest) -> Result<Page<BlockEntry>, StorageError>;

    // Session operations

    /// Delete every session last seen before `cutoff`
    async fn purge_idle_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError>;

    async fn get_session(&self, id: i64) -> Result<Option<Session>, StorageError>;

    async fn get_session_by_pair(
        &self,
        principal_id: i64,
        address: &str,
    ) -> Result<Option<Session>, StorageError>;

    /// Bump last_seen, clear force_close and store the user agent.
    /// Returns `None` if the row vanished in the meantime.
    async fn touch_session(
        &self,
        id: i64,
        user_agent: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StorageError>;

    async fn delete_session(&self, id: i64) -> Result<bool, StorageError>;

    /// Atomically admit a (principal, address) pair.
    ///
    /// Counts the distinct addresses other than `session.address` that hold a
    /// non-force-closed session for the principal; if that count exhausts `limit`
    /// returns `None` without writing. Otherwise inserts the row, or on a
    /// (principal_id, address) conflict refreshes the existing one.
    async fn create_session_within_limit(
        &self,
        session: NewSession,
        limit: SessionLimit,
    ) -> Result<Option<Session>, StorageError>;

    async fn mark_session_force_close(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    async fn mark_principal_force_close(
        &self,
        principal_id: i64,
        now: DateTime<Utc>,
    ) -> Result<u64, StorageError>;

    /// Most recently seen first, optionally restricted to one principal name
    async fn list_sessions(
        &self,
        principal_name: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<Session>, StorageError>;
}

/// Storage backend selection
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    #[default]
    Memory,
    Postgres {
        connection_string: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_max_connections() -> u32 {
    5
}

/// Storage errors
#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    NotFound,
    AlreadyExists,
    ConnectionError(String),
    QueryError(String),
    InvalidData(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::NotFound => write!(f, "Item not found"),
            StorageError::AlreadyExists => write!(f, "Item already exists"),
            StorageError::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
            StorageError::QueryError(msg) => write!(f, "Query error: {}", msg),
            StorageError::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::AlreadyExists,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StorageError::ConnectionError(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StorageError::InvalidData(err.to_string())
            }
            other => StorageError::QueryError(other.to_string()),
        }
    }
}

/// Factory function to create storage backend based on configuration
pub async fn create_storage_backend(
    config: &StorageConfig,
) -> Result<Arc<dyn StorageBackend>, StorageError> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(memory::MemoryStorage::new())),
        StorageConfig::Postgres {
            connection_string,
            max_connections,
        } => {
            let storage = postgres::PostgresStorage::connect(connection_string, *max_connections)
                .await?;
            storage.migrate().await?;
            Ok(Arc::new(storage))
        }
    }
}
