//! Connection to the audio server and stream construction.

use std::sync::Arc;
use std::time::Duration;

use crate::client_name::ClientNameRegistry;
use crate::error::{Error, Result};
use crate::extension;
use crate::ports::{self, PortRequest};
use crate::server::{Connector, ServerClient, ServerError};
use crate::stream::{Stream, StreamCallback, StreamParameters};

/// Tunables of the backend.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// Connect new streams' ports to the server's physical ports.
    pub auto_connect: bool,
    /// Upper bound on waiting for the server to confirm deactivation.
    pub stop_timeout: Duration,
    /// Abort a running stream once this many xruns occurred in one run.
    pub xrun_limit: Option<u64>,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            auto_connect: true,
            stop_timeout: Duration::from_secs(2),
            xrun_limit: None,
        }
    }
}

/// A backend connected to one audio server as one client.
///
/// ```rust
/// use std::sync::Arc;
/// use portjack_core::{
///     Backend, BackendOptions, CallbackResult, ChannelParameters, ClientNameRegistry,
///     LoopbackServer, LoopbackSettings, StreamParameters,
/// };
///
/// let server = LoopbackServer::new(LoopbackSettings::default());
/// let registry = Arc::new(ClientNameRegistry::with_name("demo").unwrap());
/// let backend = Backend::initialize(registry, &server, BackendOptions::default()).unwrap();
///
/// let params = StreamParameters::new().with_output(ChannelParameters::interleaved(2));
/// let mut stream = backend
///     .open_stream(&params, Box::new(|_ctx| CallbackResult::Continue))
///     .unwrap();
/// stream.start().unwrap();
/// server.run_cycles(4);
/// stream.stop().unwrap();
/// stream.close().unwrap();
/// ```
pub struct Backend {
    client: Arc<dyn ServerClient>,
    registry: Arc<ClientNameRegistry>,
    options: BackendOptions,
}

impl Backend {
    /// Connect to the server under the registry's requested name.
    ///
    /// Freezes the registry; the granted name is readable through
    /// [`ClientNameRegistry::client_name`] afterwards. A failed connection
    /// leaves the registry unfrozen.
    pub fn initialize(
        registry: Arc<ClientNameRegistry>,
        connector: &dyn Connector,
        options: BackendOptions,
    ) -> Result<Self> {
        let requested = registry.begin_connect()?;
        let client = match connector.connect(&requested) {
            Ok(client) => client,
            Err(err) => {
                registry.abort_connect();
                tracing::warn!(client = %requested, error = %err, "connection to audio server failed");
                return Err(err.into());
            }
        };

        let granted = client.name();
        registry.mark_connected(&granted);
        tracing::info!(
            requested = %requested,
            granted = %granted,
            sample_rate = client.sample_rate(),
            buffer_size = client.buffer_size(),
            "connected to audio server"
        );

        Ok(Self {
            client,
            registry,
            options,
        })
    }

    /// Name the server granted.
    pub fn client_name(&self) -> Result<String> {
        self.registry.client_name()
    }

    /// The server's sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.client.sample_rate()
    }

    /// The server's current cycle length.
    pub fn buffer_size(&self) -> usize {
        self.client.buffer_size()
    }

    /// Options streams are opened with.
    pub fn options(&self) -> &BackendOptions {
        &self.options
    }

    /// Open a stream: create its ports and prepare its processor.
    ///
    /// The stream starts in [`StreamState::Open`](crate::StreamState::Open).
    pub fn open_stream(
        &self,
        params: &StreamParameters<'_>,
        callback: StreamCallback,
    ) -> Result<Stream> {
        if self.client.is_shut_down() {
            return Err(Error::Connection(ServerError::ShutDown));
        }

        for direction in [params.input, params.output].into_iter().flatten() {
            if direction.channels == 0 {
                return Err(Error::InvalidChannelCount(0));
            }
        }
        let inputs = params.input.map_or(0, |p| p.channels);
        let outputs = params.output.map_or(0, |p| p.channels);
        if inputs == 0 && outputs == 0 {
            return Err(Error::InvalidChannelCount(0));
        }

        let server_rate = self.client.sample_rate();
        match params.sample_rate {
            Some(requested) if requested != server_rate => {
                return Err(Error::InvalidSampleRate {
                    requested,
                    server: server_rate,
                });
            }
            _ => {}
        }

        let info = extension::decode(params.extension);
        let request = PortRequest {
            inputs,
            outputs,
            name_base: info.name.as_deref(),
            flags: info.flags,
        };
        let ports = ports::create_ports(self.client.as_ref(), &request)?;

        if self.options.auto_connect {
            let links = ports::connect_physical(self.client.as_ref(), &ports);
            tracing::debug!(links, "auto-connected to physical ports");
        }

        tracing::info!(inputs, outputs, name_base = ?info.name, flags = ?info.flags, "stream opened");
        Ok(Stream::new(
            Arc::clone(&self.client),
            ports,
            params,
            callback,
            &self.options,
        ))
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("client", &self.client.name())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
