use crate::block::BlockConfig;
use crate::models::Principal;
use crate::proxy::TrustedProxies;
use crate::session::SessionConfig;
use crate::storage::StorageConfig;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Upper bound for every configured duration: one year
pub const MAX_DURATION_SECS: i64 = 365 * 24 * 60 * 60;

/// Top-level gate configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Bearer token for the admin API
    #[serde(default)]
    pub admin_token: String,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub blocks: BlockConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub login: LoginConfig,
    /// Peers allowed to set X-Forwarded-For / X-Real-IP, as addresses or CIDR ranges
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    #[serde(default)]
    pub principals: Vec<Principal>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:5244".to_string()
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            admin_token: String::new(),
            storage: StorageConfig::default(),
            session: SessionConfig::default(),
            blocks: BlockConfig::default(),
            sweep: SweepConfig::default(),
            login: LoginConfig::default(),
            trusted_proxies: Vec::new(),
            principals: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// 0 disables the periodic sweep
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

fn default_sweep_interval() -> u64 {
    3600
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
        }
    }
}

/// Failed sign-in lockout per source address
#[derive(Debug, Clone, Deserialize)]
pub struct LoginConfig {
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,
    #[serde(default = "default_lock_duration")]
    pub lock_duration_secs: i64,
}

fn default_max_failed_attempts() -> u32 {
    5
}

fn default_lock_duration() -> i64 {
    300
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_failed_attempts(),
            lock_duration_secs: default_lock_duration(),
        }
    }
}

impl GateConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.admin_token.trim().is_empty() {
            return Err("admin_token must be set".to_string());
        }
        if !(1..=MAX_DURATION_SECS).contains(&self.session.idle_timeout_secs) {
            return Err(format!(
                "session.idle_timeout_secs must be between 1 and {}",
                MAX_DURATION_SECS
            ));
        }
        if !(0..=MAX_DURATION_SECS).contains(&self.login.lock_duration_secs) {
            return Err(format!(
                "login.lock_duration_secs must be between 0 and {}",
                MAX_DURATION_SECS
            ));
        }
        TrustedProxies::new(&self.trusted_proxies)?;
        if let StorageConfig::Postgres {
            connection_string, ..
        } = &self.storage
            && connection_string.trim().is_empty()
        {
            return Err("storage.connection_string must not be empty".to_string());
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for principal in &self.principals {
            if principal.username.is_empty() {
                return Err(format!("Principal {} has an empty username", principal.id));
            }
            if !ids.insert(principal.id) {
                return Err(format!("Duplicate principal id {}", principal.id));
            }
            if !names.insert(principal.username.as_str()) {
                return Err(format!("Duplicate principal username '{}'", principal.username));
            }
        }
        Ok(())
    }
}

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Arc<GateConfig>, String> {
    let path = path.as_ref();
    info!("Loading configuration from: {}", path.display());

    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

    let config: GateConfig = serde_yaml::from_str(&contents)
        .map_err(|e| format!("Failed to parse YAML config: {}", e))?;

    config.validate()?;

    info!(
        "Configuration loaded with {} principal(s), idle timeout {}s",
        config.principals.len(),
        config.session.idle_timeout_secs
    );

    Ok(Arc::new(config))
}

/// Load configuration with fallback options
pub fn load_config_with_fallback() -> Result<Arc<GateConfig>, String> {
    if let Ok(config_path) = std::env::var("CONFIG_PATH") {
        match load_config(&config_path) {
            Ok(config) => return Ok(config),
            Err(e) => warn!(
                "Failed to load config from CONFIG_PATH ({}): {}",
                config_path, e
            ),
        }
    }

    for path in ["config.yaml", "config.yml"] {
        if Path::new(path).exists() {
            match load_config(path) {
                Ok(config) => return Ok(config),
                Err(e) => warn!("Failed to load config from '{}': {}", path, e),
            }
        }
    }

    Err(
        "No configuration file found. Please create a config.yaml file or set CONFIG_PATH environment variable."
            .to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PrincipalRole;

    #[test]
    fn test_load_valid_config() {
        let yaml = r#"
listen_addr: "127.0.0.1:8080"
admin_token: "s3cret"
storage:
  type: memory
session:
  idle_timeout_secs: 90
blocks:
  fail_open: true
principals:
  - id: 1
    username: root
    password_hash: "$2b$04$abc"
    role: admin
  - id: 2
    username: alice
    password_hash: "$2b$04$def"
    max_sessions: 2
"#;

        let config: GateConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.session.idle_timeout_secs, 90);
        assert!(config.blocks.fail_open);
        assert_eq!(config.sweep.interval_secs, 3600);
        assert_eq!(config.login.max_failed_attempts, 5);
        assert_eq!(config.principals[0].role, PrincipalRole::Admin);
        assert_eq!(config.principals[1].max_sessions, 2);
    }

    #[test]
    fn test_defaults_for_missing_sections() {
        let config: GateConfig = serde_yaml::from_str("admin_token: t").unwrap();
        assert_eq!(config.session.idle_timeout_secs, 60);
        assert!(!config.blocks.fail_open);
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_duplicate_usernames() {
        let yaml = r#"
admin_token: t
principals:
  - { id: 1, username: alice }
  - { id: 2, username: alice }
"#;
        let config: GateConfig = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Duplicate principal username"));
    }

    #[test]
    fn test_validation_rejects_missing_admin_token() {
        let config = GateConfig::default();
        assert!(config.validate().unwrap_err().contains("admin_token"));
    }

    #[test]
    fn test_validation_rejects_non_positive_idle_timeout() {
        let mut config = GateConfig {
            admin_token: "t".to_string(),
            ..Default::default()
        };
        config.session.idle_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_out_of_range_durations() {
        let valid = GateConfig {
            admin_token: "t".to_string(),
            ..Default::default()
        };

        let mut config = valid.clone();
        config.session.idle_timeout_secs = i64::MAX;
        assert!(config.validate().unwrap_err().contains("idle_timeout_secs"));

        let mut config = valid.clone();
        config.login.lock_duration_secs = -1;
        assert!(config.validate().unwrap_err().contains("lock_duration_secs"));

        let mut config = valid;
        config.login.lock_duration_secs = MAX_DURATION_SECS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_trusted_proxies_parsed_and_validated() {
        let yaml = r#"
admin_token: t
trusted_proxies: ["10.0.0.1", "172.16.0.0/12"]
"#;
        let config: GateConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.trusted_proxies.len(), 2);

        let config: GateConfig =
            serde_yaml::from_str("admin_token: t\ntrusted_proxies: [\"proxy.local\"]").unwrap();
        assert!(config.validate().unwrap_err().contains("trusted proxy"));
    }
}
