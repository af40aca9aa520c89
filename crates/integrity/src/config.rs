// Integrity engine configuration.
//
// Global config: `~/.scriptum/integrity.toml`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::DecodeCacheConfig;
use crate::hash::DigestBackend;

/// Root directory for Scriptum global state: `~/.scriptum/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".scriptum"))
}

/// Path to the global integrity config: `~/.scriptum/integrity.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("integrity.toml"))
}

// ── Top level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct IntegrityConfig {
    pub compare: DevComparePolicy,
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub hash: HashConfig,
}

impl IntegrityConfig {
    /// Load from `~/.scriptum/integrity.toml`. Returns defaults if the file
    /// doesn't exist or the home directory is unknown.
    pub fn load() -> Result<Self, ConfigError> {
        match global_config_path() {
            Some(path) => Self::load_or_default(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from `path`, treating a missing file as "all defaults".
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load_from(path) {
            Err(ConfigError::Io(error)) if error.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Load and validate a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let config: Self = toml::from_str(&contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compare.dev_structural_ops_fullscan_every == 0 {
            return Err(ConfigError::Validation(
                "compare.dev_structural_ops_fullscan_every must be at least 1".into(),
            ));
        }
        if self.scheduler.tick_ms == 0 {
            return Err(ConfigError::Validation("scheduler.tick_ms must be at least 1".into()));
        }
        if self.cache.max_entries == 0 || self.cache.max_size_bytes == 0 {
            return Err(ConfigError::Validation(
                "cache.max_entries and cache.max_size_bytes must be non-zero".into(),
            ));
        }
        if self.hash.require_cryptographic && !self.hash.backend.is_cryptographic() {
            return Err(ConfigError::Validation(format!(
                "hash.backend `{}` is not cryptographic; \
                 set hash.require_cryptographic = false to allow it",
                self.hash.backend
            )));
        }
        Ok(())
    }
}

// ── Sections ───────────────────────────────────────────────────────

/// Thresholds deciding when a checkpoint runs a full scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DevComparePolicy {
    /// Documents with at most this many blocks are always full-scanned.
    pub dev_fullscan_max_blocks: usize,
    /// Structural operations since the last full scan that force another.
    pub dev_structural_ops_fullscan_every: u32,
    /// Idle time since the last full scan that forces another.
    pub dev_idle_fullscan_every_ms: u64,
}

impl Default for DevComparePolicy {
    fn default() -> Self {
        Self {
            dev_fullscan_max_blocks: 200,
            dev_structural_ops_fullscan_every: 50,
            dev_idle_fullscan_every_ms: 30_000,
        }
    }
}

impl DevComparePolicy {
    pub fn idle_fullscan_every(&self) -> Duration {
        Duration::from_millis(self.dev_idle_fullscan_every_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Quiet period after the last edit before the idle loop checkpoints.
    pub idle_checkpoint_after_ms: u64,
    /// Idle loop polling interval.
    pub tick_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { idle_checkpoint_after_ms: 1_500, tick_ms: 250 }
    }
}

impl SchedulerConfig {
    pub fn idle_checkpoint_after(&self) -> Duration {
        Duration::from_millis(self.idle_checkpoint_after_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub max_size_bytes: usize,
    /// Entry time-to-live. `0` disables expiry.
    pub ttl_ms: u64,
    /// Keys on each side of the center key that `prefetch_window` loads.
    pub prefetch_radius: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 2_048,
            max_size_bytes: 16 * 1024 * 1024,
            ttl_ms: 300_000,
            prefetch_radius: 8,
        }
    }
}

impl CacheConfig {
    pub fn to_cache_config(&self) -> DecodeCacheConfig {
        DecodeCacheConfig {
            max_entries: self.max_entries,
            max_size_bytes: self.max_size_bytes,
            ttl: (self.ttl_ms > 0).then(|| Duration::from_millis(self.ttl_ms)),
            prefetch_radius: self.prefetch_radius,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HashConfig {
    pub backend: DigestBackend,
    /// Production guard: refuse non-cryptographic backends.
    pub require_cryptographic: bool,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self { backend: DigestBackend::Sha256, require_cryptographic: true }
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
            Self::Validation(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Serialize(e) => Some(e),
            Self::Validation(_) => None,
        }
    }
}
