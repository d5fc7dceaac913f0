//! Audio-server host backend for a portable audio stream API.
//!
//! This crate connects a portable stream layer to a real-time audio routing
//! server (JACK-style: the server owns the graph, the clock and the cycle
//! length; clients register named ports and a process callback). It provides:
//!
//! - **Client naming**: [`ClientNameRegistry`], set before connecting, read back
//!   after the server granted (and possibly suffixed) the name
//! - **Backend-specific stream parameters**: [`JackStreamInfo`] and the
//!   [`extension`] decoder for custom port names and [`PortFlags`]
//! - **Ports**: one server port per channel, created and destroyed together
//! - **Buffer bridge**: interleaved or per-channel callback buffers over the
//!   server's per-port buffers
//! - **Streams**: [`Stream`] with its start/stop/close state machine, xrun
//!   accounting and real-time-safe processing path
//! - **Loopback server**: [`LoopbackServer`], an in-process server for tests
//!   and tooling
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use portjack_core::{
//!     Backend, BackendOptions, CallbackResult, ChannelParameters, ClientNameRegistry,
//!     JackStreamInfo, LoopbackServer, LoopbackSettings, PortFlags, StreamParameters,
//! };
//!
//! let server = LoopbackServer::new(LoopbackSettings::default());
//! let registry = Arc::new(ClientNameRegistry::with_name("synth").unwrap());
//! let backend = Backend::initialize(Arc::clone(&registry), &server, BackendOptions::default())
//!     .unwrap();
//! assert_eq!(registry.client_name().unwrap(), "synth");
//!
//! let extension = JackStreamInfo::new()
//!     .with_name("voice")
//!     .with_flags(PortFlags::IS_TERMINAL)
//!     .encode();
//! let params = StreamParameters::new()
//!     .with_output(ChannelParameters::non_interleaved(2))
//!     .with_extension(&extension);
//!
//! let mut stream = backend
//!     .open_stream(
//!         &params,
//!         Box::new(|ctx| {
//!             if let Some(out) = ctx.output.as_mut() {
//!                 out.fill(0.25);
//!             }
//!             CallbackResult::Continue
//!         }),
//!     )
//!     .unwrap();
//!
//! stream.start().unwrap();
//! server.run_cycles(2);
//! assert_eq!(server.port_buffer("synth:voice_1").unwrap()[0], 0.25);
//! stream.stop().unwrap();
//! stream.close().unwrap();
//! ```

mod backend;
mod bridge;
mod client_name;
mod error;
pub mod extension;
mod loopback;
pub mod ports;
pub mod server;
mod stream;

pub use backend::{Backend, BackendOptions};
pub use bridge::{
    BufferBridge, ChannelParameters, InputBuffer, InputStage, OutputBuffer, OutputStage,
    SampleLayout,
};
pub use client_name::{ClientNameRegistry, DEFAULT_CLIENT_NAME, MAX_CLIENT_NAME_LEN};
pub use error::{AbortReason, Error, Result};
pub use extension::{HostApiTypeId, JackStreamInfo};
pub use loopback::{DEFAULT_PLAYBACK_CAPACITY, LoopbackClock, LoopbackServer, LoopbackSettings};
pub use ports::{Direction, Port, PortFlags, PortSet};
pub use server::{Planar, PlanarMut};
pub use stream::{
    CallbackContext, CallbackFlags, CallbackResult, Stream, StreamCallback, StreamInfo,
    StreamParameters, StreamProcessor, StreamState, StreamStatus,
};
