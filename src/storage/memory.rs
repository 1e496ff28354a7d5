// In-memory storage backend implementation
// All tables sit behind one Mutex so every trait call is a single atomic step

use super::*;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tables {
    blocks: BTreeMap<i64, BlockEntry>,
    sessions: BTreeMap<i64, Session>,
    next_block_id: i64,
    next_session_id: i64,
}

impl Tables {
    fn block_id_for(&self, address: &str) -> Option<i64> {
        self.blocks
            .values()
            .find(|b| b.address == address)
            .map(|b| b.id)
    }

    fn session_id_for(&self, principal_id: i64, address: &str) -> Option<i64> {
        self.sessions
            .values()
            .find(|s| s.principal_id == principal_id && s.address == address)
            .map(|s| s.id)
    }

    fn refresh_session(&mut self, id: i64, user_agent: &str, now: DateTime<Utc>) -> Option<Session> {
        let session = self.sessions.get_mut(&id)?;
        session.last_seen = now;
        session.updated_at = now;
        session.user_agent = user_agent.to_string();
        session.force_close = false;
        Some(session.clone())
    }
}

/// In-memory storage backend
pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables {
                next_block_id: 1,
                next_session_id: 1,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
        self.tables
            .lock()
            .map_err(|e| StorageError::ConnectionError(format!("Lock poisoned: {}", e)))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn paginate<T: Clone>(rows: Vec<T>, page: PageRequest) -> Page<T> {
    let total = rows.len() as u64;
    let content = rows
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .collect();
    Page::new(content, total)
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn purge_expired_blocks(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut tables = self.lock()?;
        let before = tables.blocks.len();
        tables.blocks.retain(|_, b| !b.is_expired(now));
        Ok((before - tables.blocks.len()) as u64)
    }

    async fn get_block_by_address(
        &self,
        address: &str,
    ) -> Result<Option<BlockEntry>, StorageError> {
        let tables = self.lock()?;
        Ok(tables
            .block_id_for(address)
            .and_then(|id| tables.blocks.get(&id).cloned()))
    }

    async fn delete_block_if_expired(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut tables = self.lock()?;
        match tables.blocks.get(&id) {
            Some(block) if block.is_expired(now) => {
                tables.blocks.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert_block(
        &self,
        address: &str,
        remark: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<BlockEntry, StorageError> {
        let mut tables = self.lock()?;

        if let Some(id) = tables.block_id_for(address)
            && let Some(block) = tables.blocks.get_mut(&id)
        {
            block.remark = remark.to_string();
            block.expires_at = expires_at;
            block.updated_at = now;
            return Ok(block.clone());
        }

        let id = tables.next_block_id;
        tables.next_block_id += 1;
        let block = BlockEntry {
            id,
            address: address.to_string(),
            remark: remark.to_string(),
            expires_at,
            created_at: now,
            updated_at: now,
        };
        tables.blocks.insert(id, block.clone());
        Ok(block)
    }

    async fn update_block(
        &self,
        id: i64,
        remark: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<BlockEntry, StorageError> {
        let mut tables = self.lock()?;
        let block = tables.blocks.get_mut(&id).ok_or(StorageError::NotFound)?;
        block.remark = remark.to_string();
        block.expires_at = expires_at;
        block.updated_at = now;
        Ok(block.clone())
    }

    async fn delete_block(&self, id: i64) -> Result<bool, StorageError> {
        let mut tables = self.lock()?;
        Ok(tables.blocks.remove(&id).is_some())
    }

    async fn list_blocks(&self, page: PageRequest) -> Result<Page<BlockEntry>, StorageError> {
        let tables = self.lock()?;
        // Ids are handed out in creation order
        let rows: Vec<BlockEntry> = tables.blocks.values().rev().cloned().collect();
        Ok(paginate(rows, page))
    }

    async fn purge_idle_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut tables = self.lock()?;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| !s.is_idle(cutoff));
        Ok((before - tables.sessions.len()) as u64)
    }

    async fn get_session(&self, id: i64) -> Result<Option<Session>, StorageError> {
        let tables = self.lock()?;
        Ok(tables.sessions.get(&id).cloned())
    }

    async fn get_session_by_pair(
        &self,
        principal_id: i64,
        address: &str,
    ) -> Result<Option<Session>, StorageError> {
        let tables = self.lock()?;
        Ok(tables
            .session_id_for(principal_id, address)
            .and_then(|id| tables.sessions.get(&id).cloned()))
    }

    async fn touch_session(
        &self,
        id: i64,
        user_agent: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StorageError> {
        let mut tables = self.lock()?;
        Ok(tables.refresh_session(id, user_agent, now))
    }

    async fn delete_session(&self, id: i64) -> Result<bool, StorageError> {
        let mut tables = self.lock()?;
        Ok(tables.sessions.remove(&id).is_some())
    }

    async fn create_session_within_limit(
        &self,
        session: NewSession,
        limit: SessionLimit,
    ) -> Result<Option<Session>, StorageError> {
        let mut tables = self.lock()?;

        let other_addresses = {
            let addresses: HashSet<&str> = tables
                .sessions
                .values()
                .filter(|s| {
                    s.principal_id == session.principal_id
                        && !s.force_close
                        && s.address != session.address
                })
                .map(|s| s.address.as_str())
                .collect();
            addresses.len() as u64
        };
        if limit.is_exceeded_by(other_addresses) {
            return Ok(None);
        }

        if let Some(id) = tables.session_id_for(session.principal_id, &session.address) {
            return Ok(tables.refresh_session(id, &session.user_agent, session.now));
        }

        let id = tables.next_session_id;
        tables.next_session_id += 1;
        let created = session.into_session(id);
        tables.sessions.insert(id, created.clone());
        Ok(Some(created))
    }

    async fn mark_session_force_close(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut tables = self.lock()?;
        match tables.sessions.get_mut(&id) {
            Some(session) => {
                session.force_close = true;
                session.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_principal_force_close(
        &self,
        principal_id: i64,
        now: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let mut tables = self.lock()?;
        let mut count = 0;
        for session in tables
            .sessions
            .values_mut()
            .filter(|s| s.principal_id == principal_id && !s.force_close)
        {
            session.force_close = true;
            session.updated_at = now;
            count += 1;
        }
        Ok(count)
    }

    async fn list_sessions(
        &self,
        principal_name: Option<&str>,
        page: PageRequest,
    ) -> Result<Page<Session>, StorageError> {
        let tables = self.lock()?;
        let mut rows: Vec<Session> = tables
            .sessions
            .values()
            .filter(|s| principal_name.is_none_or(|name| s.principal_name == name))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then(b.id.cmp(&a.id)));
        Ok(paginate(rows, page))
    }
}
