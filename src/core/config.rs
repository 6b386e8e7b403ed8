use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::capability::{Capability, TransitionPolicy};
use crate::core::errors::{EngineError, Result};
pub use crate::core::memory::CacheConfig;

/// Engine configuration with all tuning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub authorization: AuthorizationConfig,
    pub logging: LoggingConfig,
    /// Upper bound on a single service operation
    pub operation_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            authorization: AuthorizationConfig::default(),
            logging: LoggingConfig::default(),
            operation_timeout_ms: 30_000,
        }
    }
}

/// Where and how the entity store persists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database path for persistence; `None` means in-memory
    pub path: Option<PathBuf>,
    /// Delete the database when the store is dropped
    pub temporary: bool,
    /// Background flush interval handed to sled
    pub flush_every_ms: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            temporary: true,
            flush_every_ms: Some(500),
        }
    }
}

/// Static role table and transition policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    pub roles: BTreeMap<String, Vec<Capability>>,
    pub transition_policy: TransitionPolicy,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        let mut roles = BTreeMap::new();
        roles.insert("admin".to_string(), vec![Capability::Admin]);
        roles.insert(
            "coordinator".to_string(),
            vec![Capability::Assign, Capability::AuthorTemplates],
        );
        roles.insert("member".to_string(), Vec::new());
        Self {
            roles,
            transition_policy: TransitionPolicy::ScopeOnly,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Max level: trace, debug, info, warn or error
    pub level: String,
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: false,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            EngineError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.operation_timeout_ms == 0 {
            return Err(EngineError::configuration("operation_timeout_ms cannot be zero"));
        }
        if !self.storage.temporary && self.storage.path.is_none() {
            return Err(EngineError::configuration(
                "storage.path is required when storage.temporary is false",
            ));
        }
        if self.storage.flush_every_ms == Some(0) {
            return Err(EngineError::configuration("storage.flush_every_ms cannot be zero"));
        }
        self.cache.validate()?;
        if self.authorization.roles.is_empty() {
            return Err(EngineError::configuration("authorization.roles cannot be empty"));
        }
        self.logging.level.parse::<tracing::Level>().map_err(|_| {
            EngineError::configuration(format!("unknown log level '{}'", self.logging.level))
        })?;
        Ok(())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}
