// PostgreSQL storage backend implementation
// Uses sqlx for async database operations

use super::*;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

const MIGRATION_LOCK: i32 = 0x646176;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS dav_blocks (
        id BIGSERIAL PRIMARY KEY,
        address TEXT NOT NULL UNIQUE,
        remark TEXT NOT NULL DEFAULT '',
        expires_at TIMESTAMPTZ NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_dav_blocks_expires_at ON dav_blocks (expires_at)",
    "CREATE TABLE IF NOT EXISTS dav_sessions (
        id BIGSERIAL PRIMARY KEY,
        session_token TEXT NOT NULL UNIQUE,
        principal_id BIGINT NOT NULL,
        principal_name TEXT NOT NULL,
        address TEXT NOT NULL,
        user_agent TEXT NOT NULL DEFAULT '',
        force_close BOOLEAN NOT NULL DEFAULT FALSE,
        last_seen TIMESTAMPTZ NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        UNIQUE (principal_id, address)
    )",
    "CREATE INDEX IF NOT EXISTS idx_dav_sessions_last_seen ON dav_sessions (last_seen)",
    "CREATE INDEX IF NOT EXISTS idx_dav_sessions_principal_name ON dav_sessions (principal_name)",
];

const SELECT_BLOCK_BY_ADDRESS: &str = "SELECT id, address, remark, expires_at, created_at, updated_at
     FROM dav_blocks WHERE address = $1";

const UPSERT_BLOCK: &str = "INSERT INTO dav_blocks (address, remark, expires_at, created_at, updated_at)
     VALUES ($1, $2, $3, $4, $4)
     ON CONFLICT (address) DO UPDATE
     SET remark = EXCLUDED.remark, expires_at = EXCLUDED.expires_at, updated_at = EXCLUDED.updated_at
     RETURNING id, address, remark, expires_at, created_at, updated_at";

const UPDATE_BLOCK: &str = "UPDATE dav_blocks SET remark = $2, expires_at = $3, updated_at = $4
     WHERE id = $1
     RETURNING id, address, remark, expires_at, created_at, updated_at";

const LIST_BLOCKS: &str = "SELECT id, address, remark, expires_at, created_at, updated_at
     FROM dav_blocks ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2";

const SELECT_SESSION: &str = "SELECT id, session_token, principal_id, principal_name, address, user_agent,
            force_close, last_seen, created_at, updated_at
     FROM dav_sessions WHERE id = $1";

const SELECT_SESSION_BY_PAIR: &str = "SELECT id, session_token, principal_id, principal_name, address, user_agent,
            force_close, last_seen, created_at, updated_at
     FROM dav_sessions WHERE principal_id = $1 AND address = $2";

const TOUCH_SESSION: &str = "UPDATE dav_sessions
     SET last_seen = $2, updated_at = $2, user_agent = $3, force_close = FALSE
     WHERE id = $1
     RETURNING id, session_token, principal_id, principal_name, address, user_agent,
               force_close, last_seen, created_at, updated_at";

const COUNT_OTHER_ADDRESSES: &str = "SELECT COUNT(DISTINCT address) FROM dav_sessions
     WHERE principal_id = $1 AND force_close = FALSE AND address <> $2";

const UPSERT_SESSION: &str = "INSERT INTO dav_sessions
        (session_token, principal_id, principal_name, address, user_agent, force_close,
         last_seen, created_at, updated_at)
     VALUES ($1, $2, $3, $4, $5, FALSE, $6, $6, $6)
     ON CONFLICT (principal_id, address) DO UPDATE
     SET last_seen = EXCLUDED.last_seen, updated_at = EXCLUDED.updated_at,
         user_agent = EXCLUDED.user_agent, force_close = FALSE
     RETURNING id, session_token, principal_id, principal_name, address, user_agent,
               force_close, last_seen, created_at, updated_at";

const LIST_SESSIONS: &str = "SELECT id, session_token, principal_id, principal_name, address, user_agent,
            force_close, last_seen, created_at, updated_at
     FROM dav_sessions
     WHERE ($1::TEXT IS NULL OR principal_name = $1)
     ORDER BY last_seen DESC, id DESC LIMIT $2 OFFSET $3";

const COUNT_SESSIONS: &str =
    "SELECT COUNT(*) FROM dav_sessions WHERE ($1::TEXT IS NULL OR principal_name = $1)";

/// PostgreSQL storage backend
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Connect a pool to the given database
    pub async fn connect(connection_string: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;

        info!("Connected to PostgreSQL (max {} connections)", max_connections);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist yet
    pub async fn migrate(&self) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        // Two-key form, disjoint from the per-principal admission locks
        sqlx::query("SELECT pg_advisory_xact_lock($1, 0)")
            .bind(MIGRATION_LOCK)
            .execute(&mut *tx)
            .await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        debug!("PostgreSQL schema is up to date");
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for PostgresStorage {
    // Block operations
    async fn purge_expired_blocks(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let result =
            sqlx::query("DELETE FROM dav_blocks WHERE expires_at IS NOT NULL AND expires_at < $1")
                .bind(now)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn get_block_by_address(
        &self,
        address: &str,
    ) -> Result<Option<BlockEntry>, StorageError> {
        let block = sqlx::query_as::<_, BlockEntry>(SELECT_BLOCK_BY_ADDRESS)
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
        Ok(block)
    }

    async fn delete_block_if_expired(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "DELETE FROM dav_blocks WHERE id = $1 AND expires_at IS NOT NULL AND expires_at < $2",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_block(
        &self,
        address: &str,
        remark: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<BlockEntry, StorageError> {
        let block = sqlx::query_as::<_, BlockEntry>(UPSERT_BLOCK)
            .bind(address)
            .bind(remark)
            .bind(expires_at)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Ok(block)
    }

    async fn update_block(
        &self,
        id: i64,
        remark: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<BlockEntry, StorageError> {
        sqlx::query_as::<_, BlockEntry>(UPDATE_BLOCK)
            .bind(id)
            .bind(remark)
            .bind(expires_at)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StorageError::NotFound)
    }

    async fn delete_block(&self, id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM dav_blocks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_blocks(&self, page: PageRequest) -> Result<Page<BlockEntry>, StorageError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dav_blocks")
            .fetch_one(&self.pool)
            .await?;
        let blocks = sqlx::query_as::<_, BlockEntry>(LIST_BLOCKS)
            .bind(page.limit() as i64)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(Page::new(blocks, total.max(0) as u64))
    }

    // Session operations
    async fn purge_idle_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM dav_sessions WHERE last_seen < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get_session(&self, id: i64) -> Result<Option<Session>, StorageError> {
        let session = sqlx::query_as::<_, Session>(SELECT_SESSION)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn get_session_by_pair(
        &self,
        principal_id: i64,
        address: &str,
    ) -> Result<Option<Session>, StorageError> {
        let session = sqlx::query_as::<_, Session>(SELECT_SESSION_BY_PAIR)
            .bind(principal_id)
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn touch_session(
        &self,
        id: i64,
        user_agent: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StorageError> {
        let session = sqlx::query_as::<_, Session>(TOUCH_SESSION)
            .bind(id)
            .bind(now)
            .bind(user_agent)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn delete_session(&self, id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM dav_sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_session_within_limit(
        &self,
        session: NewSession,
        limit: SessionLimit,
    ) -> Result<Option<Session>, StorageError> {
        let mut tx = self.pool.begin().await?;

        // Serializes admissions of one principal until commit/rollback
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(session.principal_id)
            .execute(&mut *tx)
            .await?;

        let other_addresses: i64 = sqlx::query_scalar(COUNT_OTHER_ADDRESSES)
            .bind(session.principal_id)
            .bind(&session.address)
            .fetch_one(&mut *tx)
            .await?;
        if limit.is_exceeded_by(other_addresses.max(0) as u64) {
            tx.rollback().await?;
            return Ok(None);
        }

        let created = sqlx::query_as::<_, Session>(UPSERT_SESSION)
            .bind(&session.session_token)
            .bind(session.principal_id)
            .bind(&session.principal_name)
            .bind(&session.address)
            .bind(&session.user_agent)
            .bind(session.now)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(created))
    }

    async fn mark_session_force_close(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let result =
            sqlx::query("UPDATE dav_sessions SET force_close = TRUE, updated_at = $2 WHERE id = $1")
                .bind(id)
                .bind(now)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_principal_force_close(
        &self,
        principal_id: i64,
        now: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "UPDATE dav_sessions SET force_close = TRUE, updated_at = $2
             WHERE principal_id = $1 AND force_close = FALSE",
        )
        .bind(principal_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_sessions(
        &self,
        principal_name: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<Session>, StorageError> {
        let total: i64 = sqlx::query_scalar(COUNT_SESSIONS)
            .bind(principal_name)
            .fetch_one(&self.pool)
            .await?;
        let sessions = sqlx::query_as::<_, Session>(LIST_SESSIONS)
            .bind(principal_name)
            .bind(page.limit() as i64)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(Page::new(sessions, total.max(0) as u64))
    }
}

#[cfg(test)]
mod tests {
    //! Run against a scratch database named by `DATABASE_URL`; skipped when unset.

    use super::*;
    use crate::models::{Principal, PrincipalRole};
    use chrono::Duration;
    use std::sync::Arc;
    use uuid::Uuid;

    async fn storage() -> Option<Arc<PostgresStorage>> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set, skipping PostgreSQL test");
            return None;
        };
        let storage = PostgresStorage::connect(&url, 16).await.unwrap();
        storage.migrate().await.unwrap();
        Some(Arc::new(storage))
    }

    /// Fresh principal so tests sharing one database never collide
    fn principal() -> Principal {
        let id = (Uuid::new_v4().as_u128() as i64) & i64::MAX;
        Principal {
            id,
            username: format!("pg-{}", id),
            password_hash: String::new(),
            role: PrincipalRole::User,
            max_sessions: 0,
            disabled: false,
            bind_address: None,
            expires_at: None,
        }
    }

    fn address(tag: &str) -> String {
        format!("{}-{}", tag, Uuid::new_v4().simple())
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let Some(storage) = storage().await else { return };
        storage.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_limit_blocks_new_address_and_refreshes_known_one() {
        let Some(storage) = storage().await else { return };
        let p = principal();
        let now = Utc::now();
        let limit = SessionLimit::Fixed(1);

        let first = storage
            .create_session_within_limit(NewSession::new(&p, "10.0.0.1", "ua", now), limit)
            .await
            .unwrap()
            .unwrap();
        let other = storage
            .create_session_within_limit(NewSession::new(&p, "10.0.0.2", "ua", now), limit)
            .await
            .unwrap();
        assert!(other.is_none());

        let again = storage
            .create_session_within_limit(
                NewSession::new(&p, "10.0.0.1", "ua2", now + Duration::seconds(5)),
                limit,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.session_token, first.session_token);
        assert_eq!(again.user_agent, "ua2");
    }

    #[tokio::test]
    async fn test_concurrent_admissions_respect_limit() {
        let Some(storage) = storage().await else { return };
        let p = principal();
        let now = Utc::now();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let storage = storage.clone();
                let session = NewSession::new(&p, &format!("10.1.0.{}", i), "", now);
                tokio::spawn(async move {
                    storage
                        .create_session_within_limit(session, SessionLimit::Fixed(2))
                        .await
                })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 2);

        let page = storage
            .list_sessions(Some(&p.username), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 2);
    }

    #[tokio::test]
    async fn test_concurrent_same_pair_shares_one_row() {
        let Some(storage) = storage().await else { return };
        let p = principal();
        let now = Utc::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let storage = storage.clone();
                let session = NewSession::new(&p, "10.2.0.1", "", now);
                tokio::spawn(async move {
                    storage
                        .create_session_within_limit(session, SessionLimit::Fixed(1))
                        .await
                })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn test_force_close_frees_slot_and_touch_reopens() {
        let Some(storage) = storage().await else { return };
        let p = principal();
        let now = Utc::now();
        let limit = SessionLimit::Fixed(1);

        let session = storage
            .create_session_within_limit(NewSession::new(&p, "10.3.0.1", "", now), limit)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(storage.mark_principal_force_close(p.id, now).await.unwrap(), 1);
        assert!(storage.get_session(session.id).await.unwrap().unwrap().force_close);

        let other = storage
            .create_session_within_limit(NewSession::new(&p, "10.3.0.2", "", now), limit)
            .await
            .unwrap();
        assert!(other.is_some());

        let touched = storage
            .touch_session(session.id, "ua", now)
            .await
            .unwrap()
            .unwrap();
        assert!(!touched.force_close);
        assert!(storage.delete_session(session.id).await.unwrap());
        assert!(storage.touch_session(session.id, "", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_sessions_filters_by_name() {
        let Some(storage) = storage().await else { return };
        let (a, b) = (principal(), principal());
        let now = Utc::now();

        for (i, p) in [&a, &b, &a].iter().enumerate() {
            storage
                .create_session_within_limit(
                    NewSession::new(
                        p,
                        &format!("10.4.0.{}", i),
                        "",
                        now + Duration::seconds(i as i64),
                    ),
                    SessionLimit::Unlimited,
                )
                .await
                .unwrap();
        }

        let page = storage
            .list_sessions(Some(&a.username), PageRequest::new(1, 1))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.content.len(), 1);
        assert_eq!(page.content[0].address, "10.4.0.2");

        let everything = storage.list_sessions(None, PageRequest::default()).await.unwrap();
        assert!(everything.total >= 3);
    }

    #[tokio::test]
    async fn test_purge_idle_sessions_spares_recent() {
        let Some(storage) = storage().await else { return };
        let p = principal();
        let now = Utc::now();

        let stale = storage
            .create_session_within_limit(
                NewSession::new(&p, "10.5.0.1", "", now - Duration::days(30)),
                SessionLimit::Unlimited,
            )
            .await
            .unwrap()
            .unwrap();
        let fresh = storage
            .create_session_within_limit(
                NewSession::new(&p, "10.5.0.2", "", now),
                SessionLimit::Unlimited,
            )
            .await
            .unwrap()
            .unwrap();

        let purged = storage
            .purge_idle_sessions(now - Duration::days(1))
            .await
            .unwrap();
        assert!(purged >= 1);
        assert!(storage.get_session(stale.id).await.unwrap().is_none());
        assert!(storage.get_session(fresh.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_block_upsert_keeps_one_row() {
        let Some(storage) = storage().await else { return };
        let ip = address("upsert");
        let now = Utc::now();

        let first = storage.upsert_block(&ip, "spam", None, now).await.unwrap();
        let second = storage
            .upsert_block(&ip, "abuse", Some(now + Duration::hours(1)), now)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.remark, "abuse");
        assert!(second.expires_at.is_some());

        let found = storage.get_block_by_address(&ip).await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
        assert!(storage.delete_block(first.id).await.unwrap());
        assert!(!storage.delete_block(first.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_block_expiry_and_purge() {
        let Some(storage) = storage().await else { return };
        let (timed, permanent) = (address("timed"), address("permanent"));
        let now = Utc::now();

        let block = storage
            .upsert_block(&timed, "", Some(now + Duration::minutes(5)), now)
            .await
            .unwrap();
        storage.upsert_block(&permanent, "", None, now).await.unwrap();

        assert!(!storage.delete_block_if_expired(block.id, now).await.unwrap());
        assert!(storage.get_block_by_address(&timed).await.unwrap().is_some());

        let later = now + Duration::minutes(6);
        assert!(storage.purge_expired_blocks(later).await.unwrap() >= 1);
        assert!(storage.get_block_by_address(&timed).await.unwrap().is_none());
        assert!(storage.get_block_by_address(&permanent).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_missing_block_is_not_found() {
        let Some(storage) = storage().await else { return };
        let err = storage
            .update_block(-1, "x", None, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::NotFound);
    }
}
