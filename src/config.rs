/// Pager configuration
///
/// Loaded from TOML or built in code. Every field has a default, so a config
/// file only needs to name what it changes:
///
/// ```toml
/// synchronous = true
///
/// [cache]
/// slot_count = 512
/// loader_threads = 2
/// ```

use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::constants::cache as defaults;
use crate::error::{PagerError, PagerResult};

/// Per-engine settings shared by every cache the registry creates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Fixed number of resident page slots
    pub slot_count: usize,

    /// Background loader threads per cache
    pub loader_threads: usize,

    /// Maximum tasks with the loaders at any one time
    pub max_in_flight: usize,

    /// Idle staging buffers kept for reuse
    pub staging_pool_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            slot_count: defaults::DEFAULT_SLOT_COUNT,
            loader_threads: num_cpus::get().clamp(1, defaults::MAX_DEFAULT_LOADERS),
            max_in_flight: defaults::DEFAULT_MAX_IN_FLIGHT,
            staging_pool_limit: defaults::DEFAULT_STAGING_POOL_LIMIT,
        }
    }
}

impl CacheConfig {
    /// Configuration with the given slot count and defaults elsewhere
    pub fn with_slots(slot_count: usize) -> Self {
        Self {
            slot_count,
            ..Self::default()
        }
    }

    pub fn with_loader_threads(mut self, loader_threads: usize) -> Self {
        self.loader_threads = loader_threads;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Reject settings that would leave the cache unable to make progress
    pub fn validate(&self) -> PagerResult<()> {
        if self.slot_count == 0 {
            return Err(PagerError::Config("slot_count must be at least 1".into()));
        }
        if self.loader_threads == 0 {
            return Err(PagerError::Config("loader_threads must be at least 1".into()));
        }
        if self.max_in_flight == 0 {
            return Err(PagerError::Config("max_in_flight must be at least 1".into()));
        }
        Ok(())
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagerConfig {
    pub cache: CacheConfig,

    /// Block each frame until dispatched pages are resident
    pub synchronous: bool,
}

impl PagerConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> PagerResult<Self> {
        let config: PagerConfig =
            toml::from_str(text).map_err(|e| PagerError::Config(e.to_string()))?;
        config.cache.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: &Path) -> PagerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        log::debug!("[PagerConfig] Loaded {}", path.display());
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> PagerResult<String> {
        toml::to_string(self).map_err(|e| PagerError::Config(e.to_string()))
    }
}
