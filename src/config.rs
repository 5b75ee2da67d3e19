//! # Probe Configuration
//!
//! A [`ProbeConfig`] carries the time budget a session runs under, transport
//! limits and TLS trust settings, and logging output. It is plain data: one
//! config may be cloned into any number of independent sessions.
//!
//! ## Sources
//! - TOML files via [`ProbeConfig::from_file`]
//! - Environment variables via [`ProbeConfig::from_env`]
//! - Direct instantiation with defaults and [`ProbeConfig::default_with_overrides`]
//!
//! ## Budget Model
//! `total_timeout` bounds the whole probe. Each phase gets
//! `max(min(remaining, phase_cap), floor)`, so a slow early phase can never
//! hand a later read a zero or negative timeout.

use crate::error::{ProbeError, Result};
use crate::protocol::phase::Phase;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default size of each receive chunk requested from the transport
pub const DEFAULT_READ_CHUNK_SIZE: usize = 8 * 1024;

/// Max allowed single frame (e.g. 16 MB, the MySQL packet ceiling)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Top-level probe configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProbeConfig {
    /// Time budget for a session
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Transport limits and TLS trust
    #[serde(default)]
    pub transport: TransportConfig,

    /// Where diagnostics go
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProbeConfig {
    /// Read and parse a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ProbeError::ConfigError(format!(
                "Failed to open config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml(&contents)
    }

    /// Parse a TOML document; omitted sections take their defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProbeError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults, overridden by any `PROBE_*` variables that are set.
    ///
    /// A variable that is set but unparseable is an error, not ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(val) = env_parse::<u64>("PROBE_TOTAL_TIMEOUT_MS")? {
            config.budget.total_timeout = Duration::from_millis(val);
        }

        if let Some(val) = env_parse::<u64>("PROBE_FLOOR_MS")? {
            config.budget.floor = Duration::from_millis(val);
        }

        if let Some(val) = env_parse::<usize>("PROBE_READ_CHUNK_SIZE")? {
            config.transport.read_chunk_size = val;
        }

        if let Some(val) = env_parse::<usize>("PROBE_MAX_FRAME_SIZE")? {
            config.transport.max_frame_size = val;
        }

        if let Some(val) = env_parse::<bool>("PROBE_TLS_INSECURE")? {
            config.transport.tls_insecure = val;
        }

        Ok(config)
    }

    /// Defaults, adjusted by `mutator`
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// The defaults rendered as TOML, a starting point for a config file
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|e| format!("# default config could not be rendered: {e}\n"))
    }

    /// Write this config as TOML
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProbeError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProbeError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Every problem found, one message each. Empty means usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.budget.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Fail with a [`ProbeError::ConfigError`] listing every real problem.
    ///
    /// Entries prefixed `WARNING:` are logged and do not fail validation.
    pub fn validate_strict(&self) -> Result<()> {
        let (warnings, errors): (Vec<String>, Vec<String>) = self
            .validate()
            .into_iter()
            .partition(|e| e.starts_with("WARNING:"));
        for warning in &warnings {
            tracing::warn!("{warning}");
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProbeError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ProbeError::ConfigError(format!("Invalid value for {name}: '{raw}'"))),
        Err(_) => Ok(None),
    }
}

/// Time budget for one session
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BudgetConfig {
    /// Bound on the whole probe, connect through close
    #[serde(with = "duration_serde")]
    pub total_timeout: Duration,

    /// Minimum timeout handed to any phase while budget remains
    #[serde(with = "duration_serde")]
    pub floor: Duration,

    #[serde(with = "duration_serde")]
    pub connect_cap: Duration,

    #[serde(with = "duration_serde")]
    pub greeting_cap: Duration,

    #[serde(with = "duration_serde")]
    pub negotiate_cap: Duration,

    #[serde(with = "duration_serde")]
    pub upgrade_cap: Duration,

    #[serde(with = "duration_serde")]
    pub auth_cap: Duration,

    /// Cap for each request/response exchange once Ready
    #[serde(with = "duration_serde")]
    pub request_cap: Duration,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            total_timeout: timeout::DEFAULT_TOTAL_TIMEOUT,
            floor: timeout::DEFAULT_PHASE_FLOOR,
            connect_cap: timeout::DEFAULT_PHASE_CAP,
            greeting_cap: timeout::DEFAULT_PHASE_CAP,
            negotiate_cap: timeout::DEFAULT_PHASE_CAP,
            upgrade_cap: timeout::DEFAULT_PHASE_CAP,
            auth_cap: timeout::DEFAULT_PHASE_CAP,
            request_cap: timeout::DEFAULT_REQUEST_CAP,
        }
    }
}

impl BudgetConfig {
    /// The cap that applies while the session is in `phase`
    pub fn cap_for(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Connecting => self.connect_cap,
            Phase::Greeting => self.greeting_cap,
            Phase::Negotiating => self.negotiate_cap,
            Phase::Upgrading => self.upgrade_cap,
            Phase::Authenticating => self.auth_cap,
            Phase::Ready => self.request_cap,
            Phase::Closed | Phase::Failed => self.floor,
        }
    }

    /// Validate budget configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.total_timeout.is_zero() {
            errors.push("Total timeout must be greater than 0".to_string());
        } else if self.total_timeout.as_secs() > 600 {
            errors.push("Total timeout too long (maximum: 600s)".to_string());
        }

        if self.floor.is_zero() {
            errors.push("Phase floor must be greater than 0".to_string());
        } else if self.floor >= self.total_timeout {
            errors.push(format!(
                "Phase floor ({}ms) must be shorter than the total timeout ({}ms)",
                self.floor.as_millis(),
                self.total_timeout.as_millis()
            ));
        }

        let caps = [
            ("connect_cap", self.connect_cap),
            ("greeting_cap", self.greeting_cap),
            ("negotiate_cap", self.negotiate_cap),
            ("upgrade_cap", self.upgrade_cap),
            ("auth_cap", self.auth_cap),
            ("request_cap", self.request_cap),
        ];
        for (name, cap) in caps {
            if cap < self.floor {
                errors.push(format!(
                    "{name} ({}ms) is below the phase floor ({}ms)",
                    cap.as_millis(),
                    self.floor.as_millis()
                ));
            }
        }

        errors
    }
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Bytes reserved for each receive call
    pub read_chunk_size: usize,

    /// Largest single frame a reader will buffer
    pub max_frame_size: usize,

    /// Skip certificate verification on TLS upgrades
    pub tls_insecure: bool,

    /// Hex SHA-256 fingerprint of the expected peer certificate
    #[serde(default)]
    pub tls_pinned_sha256: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_frame_size: MAX_FRAME_SIZE,
            tls_insecure: false,
            tls_pinned_sha256: None,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.read_chunk_size < 64 {
            errors.push("Read chunk size too small (minimum: 64 bytes)".to_string());
        } else if self.read_chunk_size > 1024 * 1024 {
            errors.push(format!(
                "Read chunk size too large: {} bytes (maximum: 1 MB)",
                self.read_chunk_size
            ));
        }

        if self.max_frame_size < 1024 {
            errors.push("Max frame size too small (minimum: 1 KB)".to_string());
        } else if self.max_frame_size > 64 * 1024 * 1024 {
            errors.push(format!(
                "Max frame size too large: {} bytes (maximum: 64 MB)",
                self.max_frame_size
            ));
        }

        if let Some(ref pin) = self.tls_pinned_sha256 {
            if pin.len() != 64 || hex::decode(pin).is_err() {
                errors.push(format!(
                    "Pinned certificate hash must be 64 hex characters, got '{pin}'"
                ));
            }
        }

        if self.tls_insecure && self.tls_pinned_sha256.is_none() {
            errors.push(
                "WARNING: TLS verification is disabled without a pinned certificate".to_string(),
            );
        }

        errors
    }
}

/// Tracing output for the probe process
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Named in the line logged when logging starts
    pub app_name: String,

    /// Default level when `RUST_LOG` is unset
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    pub log_to_console: bool,

    pub log_to_file: bool,

    /// Required when `log_to_file` is set; the directory must exist
    pub log_file_path: Option<String>,

    /// One JSON object per event instead of human-readable lines
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("protocol-probe"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match self.app_name.len() {
            0 => errors.push("app_name cannot be empty".to_string()),
            n if n > 64 => errors.push(format!("app_name is {n} characters (maximum: 64)")),
            _ => {}
        }

        match (self.log_to_file, self.log_file_path.as_deref()) {
            (true, None) => errors
                .push("log_file_path must be specified when log_to_file is true".to_string()),
            (true, Some(path)) => {
                let dir = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty());
                if let Some(dir) = dir.filter(|d| !d.exists()) {
                    errors.push(format!("Log file directory does not exist: {}", dir.display()));
                }
            }
            (false, _) => {}
        }

        if !(self.log_to_console || self.log_to_file) {
            errors.push("At least one logging output must be enabled (console or file)".to_string());
        }

        errors
    }
}

/// Durations travel as whole milliseconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Levels travel as lowercase names (`"debug"`, `"info"`, ...).
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&level.as_str().to_ascii_lowercase())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<Level>()
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {raw}")))
    }
}
