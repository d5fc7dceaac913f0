//! Shared helpers for CLI commands.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use portjack_config::BackendConfig;
use portjack_core::{Backend, ClientNameRegistry, JackStreamInfo, LoopbackServer, PortFlags};

/// A loopback server with one backend connected to it.
pub struct Session {
    pub server: LoopbackServer,
    pub backend: Backend,
    pub registry: Arc<ClientNameRegistry>,
}

/// Load the configuration the global `--config` option points at, or the
/// first one found in the default locations.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<BackendConfig> {
    BackendConfig::load_or_default(path).context("failed to load configuration")
}

/// Start a loopback server shaped by `config` and connect a backend to it.
pub fn connect(config: &BackendConfig) -> anyhow::Result<Session> {
    let server = LoopbackServer::new(config.loopback_settings());
    let registry = Arc::new(config.registry()?);
    let backend = Backend::initialize(Arc::clone(&registry), &server, config.backend_options())
        .context("failed to connect to the audio server")?;
    tracing::debug!(client = %registry.requested_name(), "session ready");
    Ok(Session {
        server,
        backend,
        registry,
    })
}

pub fn port_flags(terminal: bool, physical: bool) -> PortFlags {
    let mut flags = PortFlags::empty();
    flags.set(PortFlags::IS_TERMINAL, terminal);
    flags.set(PortFlags::IS_PHYSICAL, physical);
    flags
}

/// The extension block for a custom port name and flags, or `None` when
/// neither is requested.
pub fn extension_block(name: Option<&str>, flags: PortFlags) -> Option<Vec<u8>> {
    if name.is_none() && flags.is_empty() {
        return None;
    }
    let mut info = JackStreamInfo::new().with_flags(flags);
    if let Some(name) = name {
        info = info.with_name(name);
    }
    Some(info.encode())
}

/// Lowercase names of the set flags, e.g. `["physical", "terminal"]`.
pub fn flag_names(flags: PortFlags) -> Vec<String> {
    flags
        .iter_names()
        .map(|(name, _)| name.trim_start_matches("IS_").to_lowercase())
        .collect()
}
