//! Lumen configuration (`lumen.toml`) and process-wide tracing setup.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable consulted when `dap.secret` is not configured.
pub const SECRET_ENV_VAR: &str = "LUMEN_DEBUGGER_SECRET";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LumenConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub dap: DapConfig,

    #[serde(default)]
    pub inspection: InspectionConfig,

    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// A simple level (`info`, `debug`, ...) or a full `EnvFilter` directive.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    /// Write logs to stderr. stdout is never used since it may carry the DAP
    /// stream.
    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to this file as well. Ignored if it cannot be opened.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Capture backtraces in panic reports.
    #[serde(default)]
    pub include_backtrace: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// The effective filter: the configured level with `RUST_LOG` merged on top.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        match env_directives {
            Some(env_directives) => {
                let config_directives = Self::normalize_level_directives(&self.level);
                tracing_subscriber::EnvFilter::try_new(format!("{config_directives},{env_directives}"))
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
            include_backtrace: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DapConfig {
    /// Address used by `--listen` when only a port is given.
    #[serde(default = "DapConfig::default_host")]
    pub host: String,

    #[serde(default)]
    pub port: Option<u16>,

    /// Shared secret clients must present on attach.
    #[serde(default)]
    pub secret: Option<String>,
}

impl DapConfig {
    fn default_host() -> String {
        "127.0.0.1".to_owned()
    }

    /// The secret attach requests are checked against: `dap.secret`, else
    /// [`SECRET_ENV_VAR`]. `None` means every attach is rejected.
    pub fn expected_secret(&self) -> Option<String> {
        let from_config = self
            .secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned);
        from_config.or_else(|| {
            std::env::var(SECRET_ENV_VAR)
                .ok()
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty())
        })
    }
}

impl Default for DapConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: None,
            secret: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InspectionConfig {
    /// Maximum number of display-only values kept alive for later expansion.
    #[serde(default = "InspectionConfig::default_pin_cache_size")]
    pub pin_cache_size: usize,

    #[serde(default = "InspectionConfig::default_pin_ttl_secs")]
    pub pin_ttl_secs: u64,

    /// How often dropped values are swept out of the handle tables.
    #[serde(default = "InspectionConfig::default_reclaim_interval_ms")]
    pub reclaim_interval_ms: u64,
}

impl InspectionConfig {
    fn default_pin_cache_size() -> usize {
        50
    }

    fn default_pin_ttl_secs() -> u64 {
        10 * 60
    }

    fn default_reclaim_interval_ms() -> u64 {
        1_000
    }

    pub fn pin_ttl(&self) -> Duration {
        Duration::from_secs(self.pin_ttl_secs)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim_interval_ms.max(1))
    }
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            pin_cache_size: Self::default_pin_cache_size(),
            pin_ttl_secs: Self::default_pin_ttl_secs(),
            reclaim_interval_ms: Self::default_reclaim_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// Whether debuggee paths compare case-sensitively.
    #[serde(default = "PathsConfig::default_case_sensitive")]
    pub case_sensitive: bool,
}

impl PathsConfig {
    fn default_case_sensitive() -> bool {
        !cfg!(any(windows, target_os = "macos"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            case_sensitive: Self::default_case_sensitive(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // `Display` embeds a source snippet, which may contain the secret.
        ConfigError::Toml(err.message().to_owned())
    }
}

impl LumenConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

static TRACING_INIT: Once = Once::new();

/// Install the global `tracing` subscriber.
///
/// Safe to call multiple times; only the first call has an effect.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        let mut make_writer = BoxMakeWriter::new(std::io::sink);
        if config.stderr {
            make_writer = BoxMakeWriter::new(make_writer.and(std::io::stderr));
        }
        let file = config.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(Mutex::new(file)));
        }

        let registry = tracing_subscriber::registry().with(filter);
        let result = if config.json {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(make_writer)
                        .with_ansi(false),
                )
                .try_init()
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(make_writer)
                        .with_ansi(false),
                )
                .try_init()
        };
        // Another subscriber (e.g. a test harness) may already be installed.
        let _ = result;
    });
}

/// Like [`init_tracing`] but takes the whole config.
pub fn init_tracing_with_config(config: &LumenConfig) {
    init_tracing(&config.logging);
}
