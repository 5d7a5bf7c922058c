//! Daemon configuration module.
//!
//! Contains the runtime configuration for the vt-daemon: listener address,
//! cache location and format, external encoder, and the timing knobs of the
//! registry (janitor interval, grace window, wait intervals).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{DaemonError, Result};

/// File name searched for in the default configuration locations.
pub const CONFIG_FILE_NAME: &str = "vt-daemon.toml";

/// Directories searched, in order, when no configuration file is given.
const CONFIG_LOCATIONS: [&str; 3] = ["/usr/local/etc/vt-daemon", "/etc/vt-daemon", "."];

/// Runtime configuration for the daemon.
///
/// Loaded from defaults, then an optional TOML file, then `VT_*` environment
/// variables. Command-line flags are applied last by the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Address the listener binds to.
    pub host: String,

    /// Port the listener binds to.
    pub port: u16,

    /// Root of the artifact cache.
    /// If None, uses the platform-specific default cache location.
    pub cache_path: Option<PathBuf>,

    /// Extension of job artifacts when the request does not name a format.
    pub cache_format: String,

    /// External encoder used for formats the sound I/O layer cannot write.
    pub encoder: String,

    /// Log file. If None, logs go to stderr.
    pub log_file: Option<PathBuf>,

    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// Seconds between two janitor sweeps.
    pub janitor_interval_secs: u64,

    /// Registry entries younger than this are never touched by the janitor.
    pub janitor_grace_secs: u64,

    /// Maximum nesting of queries inside queries.
    pub max_depth: usize,

    /// Bounded wait on a module claim before re-checking it.
    pub module_wait_ms: u64,

    /// Interval at which sync callers re-poll a job owned by someone else.
    pub poll_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1996,
            cache_path: None,
            cache_format: "wav".to_string(),
            encoder: "ffmpeg".to_string(),
            log_file: None,
            log_level: "info".to_string(),
            janitor_interval_secs: 400,
            janitor_grace_secs: 60,
            max_depth: 8,
            module_wait_ms: 500,
            poll_interval_ms: 50,
        }
    }
}

impl DaemonConfig {
    /// Creates a new DaemonConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the configuration: file (explicit or discovered), then environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let file = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => find_configuration(),
        };

        let config = match file {
            Some(path) => {
                info!(path = %path.display(), "loading configuration file");
                Self::from_file(&path)?
            }
            None => Self::default(),
        };

        let config = config.with_env();
        if let Some(problem) = config.validate() {
            return Err(DaemonError::config(problem));
        }
        Ok(config)
    }

    /// Reads a TOML configuration file. Missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| DaemonError::io("read", path, e))?;
        toml::from_str(&text).map_err(|e| {
            DaemonError::config(format!("Invalid configuration file '{}': {}", path.display(), e))
        })
    }

    /// Creates a DaemonConfig from environment variables over the defaults.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Applies environment overrides.
    ///
    /// Reads the following environment variables:
    /// - `VT_HOST`, `VT_PORT` - Listener address
    /// - `VT_CACHE_PATH` - Cache root
    /// - `VT_CACHE_FORMAT` - Default artifact format
    /// - `VT_ENCODER` - External encoder program
    /// - `VT_LOG_FILE`, `VT_LOG_LEVEL` - Logging
    /// - `VT_JANITOR_INTERVAL`, `VT_JANITOR_GRACE` - Janitor timing in seconds
    /// - `VT_MAX_DEPTH` - Maximum query nesting
    /// - `VT_MODULE_WAIT_MS` - Module claim wait slice
    ///
    /// Unparseable values are ignored.
    pub fn with_env(mut self) -> Self {
        if let Ok(host) = std::env::var("VT_HOST") {
            self.host = host;
        }
        if let Some(port) = env_parse::<u16>("VT_PORT") {
            self.port = port;
        }
        if let Ok(path) = std::env::var("VT_CACHE_PATH") {
            self.cache_path = Some(PathBuf::from(path));
        }
        if let Ok(format) = std::env::var("VT_CACHE_FORMAT") {
            self.cache_format = format.trim_start_matches('.').to_lowercase();
        }
        if let Ok(encoder) = std::env::var("VT_ENCODER") {
            self.encoder = encoder;
        }
        if let Ok(path) = std::env::var("VT_LOG_FILE") {
            self.log_file = Some(PathBuf::from(path));
        }
        if let Ok(level) = std::env::var("VT_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(secs) = env_parse::<u64>("VT_JANITOR_INTERVAL") {
            self.janitor_interval_secs = secs;
        }
        if let Some(secs) = env_parse::<u64>("VT_JANITOR_GRACE") {
            self.janitor_grace_secs = secs;
        }
        if let Some(depth) = env_parse::<usize>("VT_MAX_DEPTH") {
            self.max_depth = depth;
        }
        if let Some(ms) = env_parse::<u64>("VT_MODULE_WAIT_MS") {
            self.module_wait_ms = ms;
        }
        self
    }

    /// Returns the effective cache path, using platform defaults if not specified.
    pub fn effective_cache_path(&self) -> PathBuf {
        if let Some(ref path) = self.cache_path {
            path.clone()
        } else {
            default_cache_path()
        }
    }

    /// Janitor sweep interval.
    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }

    /// Janitor grace window.
    pub fn janitor_grace(&self) -> Duration {
        Duration::from_secs(self.janitor_grace_secs)
    }

    /// Bounded wait slice on module claims.
    pub fn module_wait(&self) -> Duration {
        Duration::from_millis(self.module_wait_ms)
    }

    /// Poll interval for sync callers waiting on a foreign job.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validates the configuration.
    ///
    /// Returns an error message if validation fails, None otherwise.
    pub fn validate(&self) -> Option<String> {
        if self.port == 0 {
            return Some("port must be > 0".to_string());
        }
        if self.cache_format.is_empty() {
            return Some("cache_format cannot be empty".to_string());
        }
        if self.janitor_interval_secs == 0 {
            return Some("janitor_interval_secs must be > 0".to_string());
        }
        if self.max_depth == 0 {
            return Some("max_depth must be > 0".to_string());
        }
        if self.module_wait_ms == 0 || self.poll_interval_ms == 0 {
            return Some("wait intervals must be > 0".to_string());
        }
        None
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Looks for a configuration file in the known locations.
fn find_configuration() -> Option<PathBuf> {
    CONFIG_LOCATIONS
        .iter()
        .map(|dir| Path::new(dir).join(CONFIG_FILE_NAME))
        .find(|path| path.is_file())
}

/// Returns the platform-specific default cache storage path.
///
/// Uses the `directories` crate to find appropriate locations:
/// - macOS: ~/Library/Caches/vt-daemon/cache
/// - Linux: ~/.cache/vt-daemon/cache
/// - Windows: C:\Users\<user>\AppData\Local\vt-daemon\cache\cache
fn default_cache_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "vt-daemon") {
        proj_dirs.cache_dir().join("cache")
    } else {
        // Fallback to current directory
        PathBuf::from("./cache")
    }
}
