//! Error types for backend and stream operations.
//!
//! Synchronous calls (initialize, open, start, stop, close) report failures
//! directly through [`Error`]. Conditions raised on the real-time thread are
//! buffered by the stream and only turned into an [`Error`] at the next
//! control-thread call.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::server::ServerError;
use crate::stream::StreamState;

/// Why a stream ended up in [`StreamState::Aborted`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The user callback returned [`CallbackResult::Abort`](crate::CallbackResult::Abort).
    Callback,
    /// The audio server shut down or dropped this client.
    ServerShutdown(String),
    /// The server changed its sample rate under a running stream.
    SampleRateChanged {
        /// Rate the stream was opened with.
        from: u32,
        /// Rate the server switched to.
        to: u32,
    },
    /// The configured xrun limit was reached.
    XrunLimit(u64),
    /// The server did not confirm deactivation within the stop timeout.
    DeactivationTimeout,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callback => write!(f, "stream callback requested abort"),
            Self::ServerShutdown(reason) => write!(f, "audio server shut down: {}", reason),
            Self::SampleRateChanged { from, to } => {
                write!(f, "server sample rate changed from {} Hz to {} Hz", from, to)
            }
            Self::XrunLimit(count) => write!(f, "xrun limit reached after {} xruns", count),
            Self::DeactivationTimeout => write!(f, "server did not confirm deactivation"),
        }
    }
}

/// Errors surfaced by the backend.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The stream extension block could not be used.
    ///
    /// Stream opening never fails with this: an unusable block is treated as
    /// absent. It is only returned by [`try_decode`](crate::extension::try_decode).
    #[error("invalid stream extension block: {0}")]
    Configuration(String),

    /// The server refused to register the process callback.
    #[error("stream activation failed: {0}")]
    ActivationFailed(String),

    /// The server refused to register a port. All ports created by the same
    /// call have been removed again.
    #[error("failed to create port '{port}': {reason}")]
    PortCreationFailed {
        /// Short name of the port that could not be registered.
        port: String,
        /// Server-provided reason.
        reason: String,
    },

    /// Queried state that only exists once the backend has connected.
    #[error("backend is not connected to the audio server")]
    NotInitialized,

    /// Tried to change connection settings after the backend connected.
    #[error("backend is already connected to the audio server")]
    AlreadyInitialized,

    /// The server reported buffer overruns/underruns since the last check.
    #[error("{count} xrun(s) occurred")]
    RuntimeXrun {
        /// Number of xruns since the previous check.
        count: u64,
    },

    /// The stream was forcibly terminated and can only be closed.
    #[error("stream aborted: {0}")]
    Aborted(AbortReason),

    /// The operation is not valid in the stream's current state.
    #[error("cannot {operation} a stream that is {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the stream was in.
        state: StreamState,
    },

    /// The requested client name is empty or too long for the server.
    #[error("invalid client name '{0}'")]
    InvalidClientName(String),

    /// A stream direction was requested with zero channels, or none at all.
    #[error("invalid channel count: {0}")]
    InvalidChannelCount(usize),

    /// The server runs at a different sample rate than requested.
    #[error("sample rate {requested} Hz not available, server runs at {server} Hz")]
    InvalidSampleRate {
        /// Rate requested by the caller.
        requested: u32,
        /// Rate the server is running at.
        server: u32,
    },

    /// Talking to the audio server failed.
    #[error("audio server error: {0}")]
    Connection(#[from] ServerError),

    /// Deactivation was not confirmed within the configured bound.
    #[error("server did not confirm deactivation within {0:?}")]
    DeactivationTimeout(Duration),
}

/// Convenience result type for backend operations.
pub type Result<T> = std::result::Result<T, Error>;
