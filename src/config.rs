//! Process-wide buffer configuration.
//!
//! Resolution order: built-in defaults, then the JSON file named by
//! `NDBUF_CONFIG`, then the `NDBUF_BACKEND`, `NDBUF_DTYPE` and
//! `NDBUF_TRANSFER` overrides.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::element::ElementKind;
use crate::error::{BufferError, BufferResult};

pub const ENV_CONFIG: &str = "NDBUF_CONFIG";
pub const ENV_BACKEND: &str = "NDBUF_BACKEND";
pub const ENV_DTYPE: &str = "NDBUF_DTYPE";
pub const ENV_TRANSFER: &str = "NDBUF_TRANSFER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendPreference {
    /// Device when a wgpu adapter is usable, host otherwise.
    #[default]
    Auto,
    Host,
    Device,
}

impl FromStr for BackendPreference {
    type Err = BufferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "host" | "cpu" => Ok(Self::Host),
            "device" | "gpu" | "wgpu" => Ok(Self::Device),
            other => Err(BufferError::InvalidArgument(format!("unknown backend '{other}'"))),
        }
    }
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Host => "host",
            Self::Device => "device",
        })
    }
}

/// Host-to-device copy mechanism requested for the device context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferPreference {
    /// Probe every path in order and keep the first that works.
    #[default]
    Auto,
    QueueWrite,
    Staging,
}

impl FromStr for TransferPreference {
    type Err = BufferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "queue-write" | "queue_write" => Ok(Self::QueueWrite),
            "staging" => Ok(Self::Staging),
            other => Err(BufferError::InvalidArgument(format!(
                "unknown transfer path '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub backend: BackendPreference,
    pub default_kind: ElementKind,
    pub transfer: TransferPreference,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            default_kind: ElementKind::Float,
            transfer: TransferPreference::Auto,
        }
    }
}

impl BufferConfig {
    /// Defaults, then `NDBUF_CONFIG`, then the per-field environment overrides.
    pub fn from_env() -> Self {
        let mut config = match std::env::var(ENV_CONFIG) {
            Ok(path) => match Self::load(&path) {
                Ok(config) => {
                    log::debug!("Loaded buffer config from {path}");
                    config
                }
                Err(e) => {
                    log::warn!("Ignoring {ENV_CONFIG}={path}: {e}");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    pub fn load(path: impl AsRef<Path>) -> BufferResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BufferError::InvalidArgument(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> BufferResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| BufferError::InvalidArgument(format!("invalid buffer config: {e}")))
    }

    pub fn to_json(&self) -> BufferResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| BufferError::InvalidArgument(format!("cannot serialize config: {e}")))
    }

    /// Apply overrides from `lookup` (the environment in [`from_env`](Self::from_env)).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        override_from(lookup(ENV_BACKEND), &mut self.backend, ENV_BACKEND);
        override_from(lookup(ENV_DTYPE), &mut self.default_kind, ENV_DTYPE);
        override_from(lookup(ENV_TRANSFER), &mut self.transfer, ENV_TRANSFER);
    }
}

fn override_from<T>(value: Option<String>, slot: &mut T, key: &str)
where
    T: FromStr,
    T::Err: fmt::Display,
{
    if let Some(raw) = value {
        match raw.parse() {
            Ok(parsed) => *slot = parsed,
            Err(e) => log::warn!("Ignoring {key}={raw}: {e}"),
        }
    }
}

static GLOBAL_CONFIG: OnceLock<BufferConfig> = OnceLock::new();

/// The process-wide configuration, read from the environment on first use.
pub fn global_config() -> &'static BufferConfig {
    GLOBAL_CONFIG.get_or_init(BufferConfig::from_env)
}

/// Install `config` as the process-wide configuration.
///
/// Only the first configuration (set here or loaded by [`global_config`])
/// takes effect; returns `false` if one was already in place.
pub fn set_global_config(config: BufferConfig) -> bool {
    match GLOBAL_CONFIG.set(config) {
        Ok(()) => true,
        Err(_) => {
            log::debug!("Buffer config already initialized, keeping existing");
            false
        }
    }
}
