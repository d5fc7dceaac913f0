//! The backend configuration file.

use std::path::Path;
use std::time::Duration;

use portjack_core::{BackendOptions, ClientNameRegistry, DEFAULT_CLIENT_NAME, LoopbackSettings};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::paths;

/// Backend configuration as stored on disk.
///
/// Every key is optional; missing keys take the [`Default`] values.
///
/// # TOML Format
///
/// ```toml
/// client_name = "portjack"
/// auto_connect = true
/// stop_timeout_ms = 2000
/// xrun_limit = 16
///
/// [loopback]
/// sample_rate = 48000
/// buffer_size = 256
/// physical_inputs = 2
/// physical_outputs = 2
/// playback_capacity = 65536
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    /// Client name requested from the server.
    pub client_name: String,

    /// Connect new streams to the physical ports.
    pub auto_connect: bool,

    /// How long stopping a stream waits for the server, in milliseconds.
    pub stop_timeout_ms: u64,

    /// Abort a stream after this many xruns in one run. Unlimited when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xrun_limit: Option<u64>,

    /// Shape of the in-process loopback server.
    pub loopback: LoopbackConfig,
}

/// The `[loopback]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoopbackConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Frames per cycle.
    pub buffer_size: usize,
    /// Number of capture ports.
    pub physical_inputs: usize,
    /// Number of playback ports.
    pub physical_outputs: usize,
    /// Frames each playback tap keeps.
    pub playback_capacity: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        let options = BackendOptions::default();
        Self {
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            auto_connect: options.auto_connect,
            stop_timeout_ms: options.stop_timeout.as_millis() as u64,
            xrun_limit: options.xrun_limit,
            loopback: LoopbackConfig::default(),
        }
    }
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        let settings = LoopbackSettings::default();
        Self {
            sample_rate: settings.sample_rate,
            buffer_size: settings.buffer_size,
            physical_inputs: settings.physical_inputs,
            physical_outputs: settings.physical_outputs,
            playback_capacity: settings.playback_capacity,
        }
    }
}

impl BackendConfig {
    /// Load and validate a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Load the file [`paths::find_config`] locates, or the defaults when
    /// there is none.
    ///
    /// An explicit path that does not exist is an error, not a fallback.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit
            && !path.is_file()
        {
            return Err(ConfigError::read_file(
                path,
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }
        match paths::find_config(explicit) {
            Some(path) => Self::load(path),
            None => {
                tracing::debug!("no configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse and validate a configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save to a TOML file, creating the parent directory when needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }

        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        tracing::debug!(path = %path.display(), "saved configuration");
        Ok(())
    }

    /// Check every value against the ranges the backend accepts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ClientNameRegistry::with_name(self.client_name.as_str())
            .map_err(|e| ConfigError::invalid_value("client_name", e.to_string()))?;

        if self.stop_timeout_ms == 0 {
            return Err(ConfigError::invalid_value(
                "stop_timeout_ms",
                "must be at least 1",
            ));
        }
        if self.xrun_limit == Some(0) {
            return Err(ConfigError::invalid_value(
                "xrun_limit",
                "must be at least 1; omit the key for no limit",
            ));
        }
        if self.loopback.sample_rate == 0 {
            return Err(ConfigError::invalid_value(
                "loopback.sample_rate",
                "must be positive",
            ));
        }
        if self.loopback.buffer_size == 0 {
            return Err(ConfigError::invalid_value(
                "loopback.buffer_size",
                "must be positive",
            ));
        }
        Ok(())
    }

    /// Options for [`portjack_core::Backend::initialize`].
    pub fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            auto_connect: self.auto_connect,
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            xrun_limit: self.xrun_limit,
        }
    }

    /// Settings for [`portjack_core::LoopbackServer::new`].
    pub fn loopback_settings(&self) -> LoopbackSettings {
        LoopbackSettings {
            sample_rate: self.loopback.sample_rate,
            buffer_size: self.loopback.buffer_size,
            physical_inputs: self.loopback.physical_inputs,
            physical_outputs: self.loopback.physical_outputs,
            playback_capacity: self.loopback.playback_capacity,
        }
    }

    /// A fresh name registry requesting the configured client name.
    pub fn registry(&self) -> Result<ClientNameRegistry, ConfigError> {
        ClientNameRegistry::with_name(self.client_name.as_str())
            .map_err(|e| ConfigError::invalid_value("client_name", e.to_string()))
    }
}
