//! Bootstrap settings loaded with the `config` crate.

use crate::core::ProcessIdentity;
use crate::error::{ConfigError, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for settings overrides, e.g.
/// `CONFCENTER_STORE__BASE_PATH=/cfg`.
pub const ENV_PREFIX: &str = "CONFCENTER";

/// Default base path under which configuration documents live in the store.
pub const DEFAULT_BASE_PATH: &str = "/cms/config";

/// How documents obtain their content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeploymentMode {
    /// Documents are plain local files.
    Local,
    /// Documents are synchronized from the coordination store only.
    Remote,
    /// Documents are synchronized from the store with a local cache file fallback.
    CachedRemote,
}

/// Coordination store connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Connection string; absent means no store is configured
    pub servers: Option<String>,
    /// Base path for configuration documents
    pub base_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            servers: None,
            base_path: DEFAULT_BASE_PATH.to_string(),
        }
    }
}

/// Local cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Directory holding cache files (and local documents in local mode)
    pub dir: Option<PathBuf>,
    /// Delay before the first remote check when a cache file was found
    pub sync_delay_ms: u64,
    /// Upper bound of the random extra delay added to `sync_delay_ms`
    pub sync_jitter_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dir: None,
            sync_delay_ms: 20_000,
            sync_jitter_ms: 0,
        }
    }
}

impl CacheSettings {
    /// `sync_delay_ms` as a duration.
    pub fn sync_delay(&self) -> Duration {
        Duration::from_millis(self.sync_delay_ms)
    }

    /// `sync_jitter_ms` as a duration.
    pub fn sync_jitter(&self) -> Duration {
        Duration::from_millis(self.sync_jitter_ms)
    }
}

/// Local file watcher settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    /// How long a mask suppresses the next event for its path
    pub mask_window_ms: u64,
    /// How long raw events are coalesced before being processed
    pub settle_ms: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            mask_window_ms: 1_000,
            settle_ms: 200,
        }
    }
}

impl WatcherSettings {
    /// `mask_window_ms` as a duration.
    pub fn mask_window(&self) -> Duration {
        Duration::from_millis(self.mask_window_ms)
    }

    /// `settle_ms` as a duration.
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Everything a [`ConfigRegistry`](crate::core::ConfigRegistry) needs to know at startup.
///
/// Every field has a default, so an empty source yields usable settings.
///
/// # Examples
///
/// ```rust
/// use confcenter::core::Settings;
/// use config::FileFormat;
///
/// let settings = Settings::parse(
///     r#"
///     [process]
///     name = "orders"
///     profile = "production"
///
///     [cache]
///     sync_delay_ms = 500
///     "#,
///     FileFormat::Toml,
/// )
/// .unwrap();
/// assert_eq!(settings.store.base_path, "/cms/config");
/// assert_eq!(settings.process.candidates(), vec!["production", "orders"]);
/// assert_eq!(settings.cache.sync_delay_ms, 500);
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Coordination store
    pub store: StoreSettings,
    /// Process identity used for override priority
    pub process: ProcessIdentity,
    /// Local cache
    pub cache: CacheSettings,
    /// Local file watcher
    pub watcher: WatcherSettings,
}

impl Settings {
    /// Load settings from an optional file (format detected from its extension) overlaid
    /// by `CONFCENTER_*` environment variables, with `__` separating nested keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value has the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Self::deserialize_from(config)
    }

    /// Parse settings from in-memory text, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is malformed or a value has the wrong type.
    pub fn parse(text: &str, format: FileFormat) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(text, format))
            .build()?;
        Self::deserialize_from(config)
    }

    /// The deployment mode implied by these settings alone.
    pub fn deployment_hint(&self) -> DeploymentMode {
        let has_store = self
            .store
            .servers
            .as_deref()
            .is_some_and(|servers| !servers.trim().is_empty());
        match (has_store, self.cache.dir.is_some()) {
            (false, _) => DeploymentMode::Local,
            (true, false) => DeploymentMode::Remote,
            (true, true) => DeploymentMode::CachedRemote,
        }
    }

    fn deserialize_from(config: Config) -> Result<Self> {
        config.try_deserialize().map_err(|e| {
            ConfigError::DeserializationError(format!("Failed to deserialize settings: {}", e))
        })
    }
}
