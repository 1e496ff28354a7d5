// Shared state handed to every handler and middleware

use crate::auth::{Authenticator, CachedDirectory, DirectoryAuthenticator, MemoryDirectory};
use crate::block::BlockRegistry;
use crate::clock::Clock;
use crate::config::GateConfig;
use crate::middleware::login_guard::LoginGuard;
use crate::proxy::TrustedProxies;
use crate::session::SessionManager;
use crate::storage::StorageBackend;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct GateState {
    pub config: Arc<GateConfig>,
    pub clock: Arc<dyn Clock>,
    pub blocks: Arc<BlockRegistry>,
    pub sessions: Arc<SessionManager>,
    pub directory: Arc<CachedDirectory>,
    pub authenticator: Arc<dyn Authenticator>,
    pub login_guard: Arc<LoginGuard>,
    pub proxies: Arc<TrustedProxies>,
}

impl GateState {
    /// Wire the gate components over one storage backend
    pub fn new(
        config: Arc<GateConfig>,
        storage: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let blocks = BlockRegistry::new(storage.clone(), clock.clone(), config.blocks.clone());
        let sessions = SessionManager::new(storage, clock.clone(), config.session.clone());
        let directory = Arc::new(CachedDirectory::new(
            Arc::new(MemoryDirectory::new(config.principals.clone())),
            clock.clone(),
        ));
        let authenticator = Arc::new(DirectoryAuthenticator::new(
            directory.clone(),
            clock.clone(),
        ));
        let login_guard = LoginGuard::new(&config.login, clock.clone());
        let proxies = TrustedProxies::new(&config.trusted_proxies).unwrap_or_else(|e| {
            warn!("{}; forwarding headers will be ignored", e);
            TrustedProxies::default()
        });

        Self {
            config,
            clock,
            blocks: Arc::new(blocks),
            sessions: Arc::new(sessions),
            directory,
            authenticator,
            login_guard: Arc::new(login_guard),
            proxies: Arc::new(proxies),
        }
    }
}
