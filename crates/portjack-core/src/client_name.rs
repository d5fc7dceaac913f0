//! Client name requested from, and granted by, the audio server.
//!
//! The registry is created before the backend connects and handed to
//! [`Backend::initialize`](crate::Backend::initialize). Until then the requested
//! name can be changed freely. Once the backend connects the registry freezes:
//! further changes fail with [`Error::AlreadyInitialized`] and the name the
//! server actually granted (possibly suffixed to avoid a clash with another
//! client) becomes available through [`ClientNameRegistry::client_name`].
//!
//! ```rust
//! use std::sync::Arc;
//! use portjack_core::ClientNameRegistry;
//!
//! let registry = Arc::new(ClientNameRegistry::new());
//! registry.set_client_name("synth").unwrap();
//! assert!(registry.client_name().is_err()); // not connected yet
//! ```

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Name requested when the caller never sets one.
pub const DEFAULT_CLIENT_NAME: &str = "portjack";

/// Longest client name the server accepts, in bytes.
pub const MAX_CLIENT_NAME_LEN: usize = 63;

struct Requested {
    name: Arc<str>,
    frozen: bool,
}

/// Set-once-before-connect configuration of the backend's client name.
pub struct ClientNameRegistry {
    requested: Mutex<Requested>,
    granted: OnceLock<Arc<str>>,
}

impl ClientNameRegistry {
    /// Create a registry requesting [`DEFAULT_CLIENT_NAME`].
    pub fn new() -> Self {
        Self {
            requested: Mutex::new(Requested {
                name: Arc::from(DEFAULT_CLIENT_NAME),
                frozen: false,
            }),
            granted: OnceLock::new(),
        }
    }

    /// Create a registry requesting `name`.
    pub fn with_name(name: impl Into<Arc<str>>) -> Result<Self> {
        let registry = Self::new();
        registry.set_client_name(name)?;
        Ok(registry)
    }

    /// Set the name to request from the server.
    ///
    /// The shared string is kept as is, not copied. Fails with
    /// [`Error::AlreadyInitialized`] once the backend has connected.
    pub fn set_client_name(&self, name: impl Into<Arc<str>>) -> Result<()> {
        let name = name.into();
        validate_client_name(&name)?;

        let mut requested = self.requested.lock();
        if requested.frozen {
            return Err(Error::AlreadyInitialized);
        }
        requested.name = name;
        Ok(())
    }

    /// The name that will be (or was) requested.
    pub fn requested_name(&self) -> Arc<str> {
        Arc::clone(&self.requested.lock().name)
    }

    /// The name granted by the server, as an owned copy.
    pub fn client_name(&self) -> Result<String> {
        self.granted
            .get()
            .map(|name| name.to_string())
            .ok_or(Error::NotInitialized)
    }

    /// Whether a backend has connected with this registry.
    pub fn is_initialized(&self) -> bool {
        self.granted.get().is_some()
    }

    /// Freeze the requested name for a connection attempt.
    pub(crate) fn begin_connect(&self) -> Result<Arc<str>> {
        let mut requested = self.requested.lock();
        if requested.frozen {
            return Err(Error::AlreadyInitialized);
        }
        requested.frozen = true;
        Ok(Arc::clone(&requested.name))
    }

    /// Unfreeze after a failed connection attempt.
    pub(crate) fn abort_connect(&self) {
        self.requested.lock().frozen = false;
    }

    /// Record the granted name. Only the first call has an effect.
    pub(crate) fn mark_connected(&self, granted: &str) {
        let _ = self.granted.set(Arc::from(granted));
    }
}

impl Default for ClientNameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClientNameRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientNameRegistry")
            .field("requested", &self.requested_name())
            .field("granted", &self.granted.get())
            .finish()
    }
}

fn validate_client_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_CLIENT_NAME_LEN || name.contains(':') {
        return Err(Error::InvalidClientName(name.to_string()));
    }
    Ok(())
}
