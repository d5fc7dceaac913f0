//! Stream lifecycle and the per-cycle processing path.
//!
//! ```text
//!            start()             stop() / callback Complete
//!   Open ───────────► Running ───────────────────────────► Stopped
//!    │                  │  ▲                                 │
//!    │                  │  └──────────── start() ────────────┘
//!    │                  │ callback Abort, server shutdown,
//!    │                  │ sample rate change, xrun limit
//!    │                  ▼
//!    │               Aborted ─────────┐
//!    │                                │ close()
//!    └───────────── close() ──────────┴──────────────────────► Closed
//! ```
//!
//! ## Threads
//!
//! [`Stream`] lives on the caller's (control) thread. Once started, its
//! [`StreamProcessor`] is owned by the server and runs on the server's
//! real-time thread. The two sides only share `SharedState`, a block of
//! atomics: the processor records completion, aborts and counters there and
//! never blocks, allocates or formats errors. The control side reads it back at
//! its next call (`state`, `status`, `is_active`, `start`, `stop`, `close`) and
//! only then deactivates the processor and changes state.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::backend::BackendOptions;
use crate::bridge::{BufferBridge, ChannelParameters, InputBuffer, OutputBuffer};
use crate::error::{AbortReason, Error, Result};
use crate::ports::{self, Port, PortSet};
use crate::server::{
    Activation, ActivationId, Control, ProcessCycle, ProcessHandler, Rejected, ServerClient,
    ServerError,
};

/// Lifecycle state of a [`Stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Ports exist; the callback is not registered with the server.
    Open,
    /// The callback runs once per server cycle.
    Running,
    /// Deactivated after `stop()` or a completed callback; can be restarted.
    Stopped,
    /// Forcibly terminated; can only be closed.
    Aborted,
    /// Ports released. Terminal.
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Aborted => "aborted",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What the stream callback wants after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    /// Keep running.
    Continue,
    /// Finish normally; the stream becomes [`StreamState::Stopped`].
    Complete,
    /// Finish abnormally; the stream becomes [`StreamState::Aborted`].
    Abort,
}

bitflags::bitflags! {
    /// Conditions reported to the callback for the current cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CallbackFlags: u32 {
        /// Input data was missing before this cycle.
        const INPUT_UNDERFLOW = 0x1;
        /// Input data was discarded before this cycle.
        const INPUT_OVERFLOW = 0x2;
        /// Output could not be delivered in time before this cycle.
        const OUTPUT_UNDERFLOW = 0x4;
        /// Output data was discarded before this cycle.
        const OUTPUT_OVERFLOW = 0x8;
    }
}

/// Everything the callback sees for one cycle.
#[derive(Debug)]
pub struct CallbackContext<'a> {
    /// Frames in this cycle.
    pub frames: usize,
    /// Input channel count (0 for output-only streams).
    pub input_channels: usize,
    /// Output channel count (0 for input-only streams).
    pub output_channels: usize,
    /// Captured samples, if the stream has inputs.
    pub input: Option<InputBuffer<'a>>,
    /// Zeroed buffers to fill, if the stream has outputs.
    pub output: Option<OutputBuffer<'a>>,
    /// Xrun conditions since the previous cycle.
    pub flags: CallbackFlags,
    /// Stream time of the first frame, in seconds since the stream first started.
    pub time: f64,
}

/// The user's per-cycle processing function.
///
/// Runs on the server's real-time thread: it must not allocate, lock or block.
pub type StreamCallback = Box<dyn FnMut(&mut CallbackContext<'_>) -> CallbackResult + Send>;

/// What to open.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamParameters<'a> {
    /// Input direction, if any.
    pub input: Option<ChannelParameters>,
    /// Output direction, if any.
    pub output: Option<ChannelParameters>,
    /// Required sample rate; `None` accepts the server's.
    pub sample_rate: Option<u32>,
    /// Opaque backend-specific block, see [`extension`](crate::extension).
    pub extension: Option<&'a [u8]>,
}

impl<'a> StreamParameters<'a> {
    /// Parameters with no direction set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an input direction.
    pub fn with_input(mut self, input: ChannelParameters) -> Self {
        self.input = Some(input);
        self
    }

    /// Add an output direction.
    pub fn with_output(mut self, output: ChannelParameters) -> Self {
        self.output = Some(output);
        self
    }

    /// Require a sample rate.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Attach a backend-specific block.
    pub fn with_extension(mut self, block: &'a [u8]) -> Self {
        self.extension = Some(block);
        self
    }
}

/// Snapshot returned by [`Stream::status`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamStatus {
    /// Current state.
    pub state: StreamState,
    /// Xruns since the previous `status` or `check_xruns` call.
    pub xruns: u64,
    /// Xruns since the stream was opened.
    pub total_xruns: u64,
    /// Frames processed since the stream was opened.
    pub frames_processed: u64,
    /// Fraction of the last cycle's time budget spent in the callback.
    pub cpu_load: f64,
    /// The server's current cycle length.
    pub buffer_size: usize,
    /// Cycles that outran the staging reservation.
    pub reallocations: u64,
}

/// Timing of an open stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Input latency in seconds (0 without inputs).
    pub input_latency: f64,
    /// Output latency in seconds (0 without outputs).
    pub output_latency: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Finish {
    None = 0,
    Complete = 1,
    CallbackAbort = 2,
    ServerShutdown = 3,
    SampleRateChanged = 4,
    XrunLimit = 5,
}

impl Finish {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Complete,
            2 => Self::CallbackAbort,
            3 => Self::ServerShutdown,
            4 => Self::SampleRateChanged,
            5 => Self::XrunLimit,
            _ => Self::None,
        }
    }
}

/// State shared between a [`Stream`] and its [`StreamProcessor`].
#[derive(Debug)]
pub(crate) struct SharedState {
    stop_requested: AtomicBool,
    finish: AtomicU8,
    xruns_pending: AtomicU64,
    xruns_total: AtomicU64,
    xruns_run: AtomicU64,
    xrun_flag: AtomicBool,
    frames_processed: AtomicU64,
    cpu_load: AtomicU64,
    buffer_size: AtomicUsize,
    reallocations: AtomicU64,
    server_sample_rate: AtomicU64,
    // Written by the non-real-time shutdown notification only.
    shutdown_reason: Mutex<Option<String>>,
}

impl SharedState {
    fn new(buffer_size: usize, sample_rate: u32) -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            finish: AtomicU8::new(Finish::None as u8),
            xruns_pending: AtomicU64::new(0),
            xruns_total: AtomicU64::new(0),
            xruns_run: AtomicU64::new(0),
            xrun_flag: AtomicBool::new(false),
            frames_processed: AtomicU64::new(0),
            cpu_load: AtomicU64::new(0.0_f64.to_bits()),
            buffer_size: AtomicUsize::new(buffer_size),
            reallocations: AtomicU64::new(0),
            server_sample_rate: AtomicU64::new(u64::from(sample_rate)),
            shutdown_reason: Mutex::new(None),
        }
    }

    /// Record why the run ended. The first reason wins.
    fn finish(&self, reason: Finish) -> bool {
        self.finish
            .compare_exchange(
                Finish::None as u8,
                reason as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn finished(&self) -> Finish {
        Finish::from_u8(self.finish.load(Ordering::Acquire))
    }

    fn reset_for_run(&self) {
        self.stop_requested.store(false, Ordering::Release);
        self.finish.store(Finish::None as u8, Ordering::Release);
        self.xruns_run.store(0, Ordering::Relaxed);
        self.xrun_flag.store(false, Ordering::Relaxed);
    }

    fn cpu_load(&self) -> f64 {
        f64::from_bits(self.cpu_load.load(Ordering::Relaxed))
    }
}

/// The stream's side of the process callback, owned by the server while the
/// stream runs.
pub struct StreamProcessor {
    callback: StreamCallback,
    bridge: BufferBridge,
    shared: Arc<SharedState>,
    sample_rate: u32,
    xrun_limit: Option<u64>,
    input_channels: usize,
    output_channels: usize,
}

impl StreamProcessor {
    fn prepare(&mut self, buffer_size: usize) {
        self.bridge.reserve(buffer_size);
        self.shared.buffer_size.store(buffer_size, Ordering::Relaxed);
    }

    fn xrun_flags(&self) -> CallbackFlags {
        if !self.shared.xrun_flag.swap(false, Ordering::AcqRel) {
            return CallbackFlags::empty();
        }
        let mut flags = CallbackFlags::empty();
        if self.input_channels > 0 {
            flags |= CallbackFlags::INPUT_OVERFLOW;
        }
        if self.output_channels > 0 {
            flags |= CallbackFlags::OUTPUT_UNDERFLOW;
        }
        flags
    }
}

impl ProcessHandler for StreamProcessor {
    fn process(&mut self, cycle: &mut ProcessCycle<'_>) -> Control {
        let started = Instant::now();
        let frames = cycle.frames();
        let (inputs, mut outputs) = cycle.split();

        if self.shared.finished() != Finish::None
            || self.shared.stop_requested.load(Ordering::Acquire)
        {
            outputs.fill_silence();
            return Control::Quit;
        }

        let flags = self.xrun_flags();
        let frames_before = self.shared.frames_processed.load(Ordering::Relaxed);
        let time = frames_before as f64 / f64::from(self.sample_rate);
        let reallocations_before = self.bridge.reallocations();

        let (input_stage, mut output_stage) = self.bridge.stages_mut();
        let mut context = CallbackContext {
            frames,
            input_channels: self.input_channels,
            output_channels: self.output_channels,
            input: input_stage.map(|stage| stage.stage_input(inputs)),
            output: output_stage
                .as_deref_mut()
                .map(|stage| stage.output_buffer(outputs.reborrow())),
            flags,
            time,
        };
        let result = (self.callback)(&mut context);
        drop(context);

        // Staged on every path, including the cycle that completes or aborts.
        if let Some(stage) = output_stage {
            stage.stage_output(outputs);
        }

        let grown = self.bridge.reallocations() - reallocations_before;
        if grown > 0 {
            self.shared.reallocations.fetch_add(grown, Ordering::Relaxed);
        }
        self.shared
            .frames_processed
            .fetch_add(frames as u64, Ordering::Relaxed);
        if frames > 0 {
            let budget = frames as f64 / f64::from(self.sample_rate);
            let load = started.elapsed().as_secs_f64() / budget;
            self.shared.cpu_load.store(load.to_bits(), Ordering::Relaxed);
        }

        match result {
            CallbackResult::Continue => Control::Continue,
            CallbackResult::Complete => {
                self.shared.finish(Finish::Complete);
                Control::Quit
            }
            CallbackResult::Abort => {
                self.shared.finish(Finish::CallbackAbort);
                Control::Quit
            }
        }
    }

    fn buffer_size_changed(&mut self, frames: usize) {
        self.prepare(frames);
    }

    fn sample_rate_changed(&mut self, sample_rate: u32) {
        self.shared
            .server_sample_rate
            .store(u64::from(sample_rate), Ordering::Relaxed);
        if sample_rate != self.sample_rate {
            self.shared.finish(Finish::SampleRateChanged);
        }
    }

    fn xrun(&mut self) {
        self.shared.xruns_pending.fetch_add(1, Ordering::AcqRel);
        self.shared.xruns_total.fetch_add(1, Ordering::Relaxed);
        self.shared.xrun_flag.store(true, Ordering::Release);
        let in_run = self.shared.xruns_run.fetch_add(1, Ordering::AcqRel) + 1;
        if self.xrun_limit.is_some_and(|limit| in_run >= limit) {
            self.shared.finish(Finish::XrunLimit);
        }
    }

    fn shutdown(&mut self, reason: &str) {
        *self.shared.shutdown_reason.lock() = Some(reason.to_string());
        self.shared.finish(Finish::ServerShutdown);
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// An open stream: its ports, its processor and its lifecycle state.
///
/// Dropping a running stream stops it and releases its ports, ignoring errors.
pub struct Stream {
    client: Arc<dyn ServerClient>,
    ports: PortSet,
    state: StreamState,
    shared: Arc<SharedState>,
    processor: Option<Box<StreamProcessor>>,
    activation: Option<ActivationId>,
    sample_rate: u32,
    has_input: bool,
    has_output: bool,
    stop_timeout: Duration,
    abort_reason: Option<AbortReason>,
}

impl Stream {
    pub(crate) fn new(
        client: Arc<dyn ServerClient>,
        ports: PortSet,
        params: &StreamParameters<'_>,
        callback: StreamCallback,
        options: &BackendOptions,
    ) -> Self {
        let sample_rate = client.sample_rate();
        let buffer_size = client.buffer_size();
        let shared = Arc::new(SharedState::new(buffer_size, sample_rate));
        let processor = StreamProcessor {
            callback,
            bridge: BufferBridge::new(params.input, params.output, buffer_size),
            shared: Arc::clone(&shared),
            sample_rate,
            xrun_limit: options.xrun_limit,
            input_channels: params.input.map_or(0, |p| p.channels),
            output_channels: params.output.map_or(0, |p| p.channels),
        };

        Self {
            client,
            ports,
            state: StreamState::Open,
            shared,
            processor: Some(Box::new(processor)),
            activation: None,
            sample_rate,
            has_input: params.input.is_some(),
            has_output: params.output.is_some(),
            stop_timeout: options.stop_timeout,
            abort_reason: None,
        }
    }

    /// Register the callback with the server and start processing.
    ///
    /// On [`Error::ActivationFailed`] the stream stays as it was and can be
    /// started again. If the server's sample rate moved away from the
    /// stream's while it was not running, the stream is aborted with
    /// [`AbortReason::SampleRateChanged`] instead of being activated.
    pub fn start(&mut self) -> Result<()> {
        self.sync();
        match self.state {
            StreamState::Open | StreamState::Stopped => {}
            StreamState::Aborted => return Err(self.aborted_error()),
            state => {
                return Err(Error::InvalidState {
                    operation: "start",
                    state,
                });
            }
        }

        let server_rate = self.client.sample_rate();
        if server_rate != self.sample_rate {
            self.shared
                .server_sample_rate
                .store(u64::from(server_rate), Ordering::Relaxed);
            self.abort(AbortReason::SampleRateChanged {
                from: self.sample_rate,
                to: server_rate,
            });
            return Err(self.aborted_error());
        }

        let Some(mut processor) = self.processor.take() else {
            return Err(Error::InvalidState {
                operation: "start",
                state: self.state,
            });
        };

        self.shared.reset_for_run();
        processor.prepare(self.client.buffer_size());

        let activation = Activation {
            inputs: self.ports.input_ids(),
            outputs: self.ports.output_ids(),
            handler: processor,
        };
        match self.client.activate(activation) {
            Ok(id) => {
                self.activation = Some(id);
                self.state = StreamState::Running;
                tracing::info!(ports = self.ports.len(), "stream started");
                Ok(())
            }
            Err(Rejected { error, handler }) => {
                self.processor = recover(handler);
                tracing::warn!(error = %error, "stream activation rejected");
                Err(Error::ActivationFailed(error.to_string()))
            }
        }
    }

    /// Deactivate the callback, waiting up to the configured stop timeout.
    ///
    /// A no-op on a stream that is not running. If the server does not confirm
    /// deactivation in time the stream is aborted and
    /// [`Error::DeactivationTimeout`] is returned.
    pub fn stop(&mut self) -> Result<()> {
        self.sync();
        match self.state {
            StreamState::Open | StreamState::Stopped => Ok(()),
            StreamState::Aborted => Err(self.aborted_error()),
            StreamState::Closed => Err(Error::InvalidState {
                operation: "stop",
                state: StreamState::Closed,
            }),
            StreamState::Running => {
                self.shared.stop_requested.store(true, Ordering::Release);
                match self.deactivate() {
                    Ok(()) => {
                        self.state = StreamState::Stopped;
                        tracing::info!("stream stopped");
                        Ok(())
                    }
                    Err(err) => {
                        let reason = match &err {
                            Error::DeactivationTimeout(_) => AbortReason::DeactivationTimeout,
                            other => AbortReason::ServerShutdown(other.to_string()),
                        };
                        self.abort(reason);
                        Err(err)
                    }
                }
            }
        }
    }

    /// Release the stream's ports. Terminal.
    ///
    /// Allowed from [`StreamState::Stopped`] and [`StreamState::Aborted`], and
    /// also from [`StreamState::Open`]: a stream that was never started can be
    /// closed directly. Fails with [`Error::InvalidState`] while the stream is
    /// running. Closing a closed stream is a no-op.
    pub fn close(&mut self) -> Result<()> {
        self.sync();
        match self.state {
            StreamState::Running => Err(Error::InvalidState {
                operation: "close",
                state: StreamState::Running,
            }),
            StreamState::Closed => Ok(()),
            StreamState::Open | StreamState::Stopped | StreamState::Aborted => {
                ports::destroy_ports(self.client.as_ref(), &mut self.ports);
                self.processor = None;
                self.state = StreamState::Closed;
                tracing::info!("stream closed");
                Ok(())
            }
        }
    }

    /// Current state, after applying any completion recorded by the callback.
    pub fn state(&mut self) -> StreamState {
        self.sync();
        self.state
    }

    /// Whether the callback is being called.
    pub fn is_active(&mut self) -> bool {
        self.state() == StreamState::Running
    }

    /// Counters and state. Resets the "xruns since last query" count.
    pub fn status(&mut self) -> StreamStatus {
        self.sync();
        StreamStatus {
            state: self.state,
            xruns: self.shared.xruns_pending.swap(0, Ordering::AcqRel),
            total_xruns: self.shared.xruns_total.load(Ordering::Relaxed),
            frames_processed: self.shared.frames_processed.load(Ordering::Relaxed),
            cpu_load: self.shared.cpu_load(),
            buffer_size: self.shared.buffer_size.load(Ordering::Relaxed),
            reallocations: self.shared.reallocations.load(Ordering::Relaxed),
        }
    }

    /// Report xruns recorded since the previous check as [`Error::RuntimeXrun`].
    ///
    /// Xruns do not stop the stream.
    pub fn check_xruns(&mut self) -> Result<()> {
        self.sync();
        match self.shared.xruns_pending.swap(0, Ordering::AcqRel) {
            0 => Ok(()),
            count => Err(Error::RuntimeXrun { count }),
        }
    }

    /// Sample rate and latencies. Latency is one server cycle per direction.
    pub fn info(&self) -> StreamInfo {
        let cycle = self.shared.buffer_size.load(Ordering::Relaxed) as f64
            / f64::from(self.sample_rate);
        StreamInfo {
            sample_rate: self.sample_rate,
            input_latency: if self.has_input { cycle } else { 0.0 },
            output_latency: if self.has_output { cycle } else { 0.0 },
        }
    }

    /// The stream's ports. Empty once closed.
    pub fn ports(&self) -> &PortSet {
        &self.ports
    }

    /// Full names of the ports `port` is connected to.
    pub fn connections(&self, port: &Port) -> Vec<String> {
        self.client.connections(port.full_name())
    }

    /// Why the stream was aborted, if it was.
    pub fn abort_reason(&self) -> Option<&AbortReason> {
        self.abort_reason.as_ref()
    }

    /// Apply a completion or abort recorded on the real-time side.
    fn sync(&mut self) {
        if self.state != StreamState::Running {
            return;
        }

        let finished = self.shared.finished();
        if finished == Finish::None && !self.client.is_shut_down() {
            return;
        }

        let reason = match finished {
            Finish::Complete => None,
            Finish::CallbackAbort => Some(AbortReason::Callback),
            Finish::SampleRateChanged => Some(AbortReason::SampleRateChanged {
                from: self.sample_rate,
                to: self.shared.server_sample_rate.load(Ordering::Relaxed) as u32,
            }),
            Finish::XrunLimit => Some(AbortReason::XrunLimit(
                self.shared.xruns_run.load(Ordering::Acquire),
            )),
            Finish::ServerShutdown | Finish::None => Some(AbortReason::ServerShutdown(
                self.shared
                    .shutdown_reason
                    .lock()
                    .clone()
                    .unwrap_or_else(|| "connection lost".to_string()),
            )),
        };

        match (self.deactivate(), reason) {
            (Err(err), _) => {
                tracing::warn!(error = %err, "deactivation after finish failed");
                self.abort(AbortReason::DeactivationTimeout);
            }
            (Ok(()), None) => {
                self.state = StreamState::Stopped;
                tracing::info!("stream completed");
            }
            (Ok(()), Some(reason)) => self.abort(reason),
        }
    }

    fn deactivate(&mut self) -> Result<()> {
        let Some(id) = self.activation.take() else {
            return Ok(());
        };
        if self.client.is_shut_down() {
            tracing::debug!("server already shut down, skipping deactivation");
            return Ok(());
        }
        match self.client.deactivate(id, self.stop_timeout) {
            Ok(handler) => {
                self.processor = recover(handler);
                Ok(())
            }
            Err(ServerError::ShutDown) => Ok(()),
            Err(ServerError::Timeout) => {
                tracing::warn!(timeout = ?self.stop_timeout, "server did not confirm deactivation");
                Err(Error::DeactivationTimeout(self.stop_timeout))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn abort(&mut self, reason: AbortReason) {
        tracing::warn!(%reason, "stream aborted");
        self.state = StreamState::Aborted;
        self.abort_reason = Some(reason);
    }

    fn aborted_error(&self) -> Error {
        Error::Aborted(
            self.abort_reason
                .clone()
                .unwrap_or(AbortReason::ServerShutdown("unknown".to_string())),
        )
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("state", &self.state)
            .field("ports", &self.ports)
            .field("sample_rate", &self.sample_rate)
            .field("abort_reason", &self.abort_reason)
            .finish_non_exhaustive()
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if self.state == StreamState::Running {
            self.shared.stop_requested.store(true, Ordering::Release);
            if let Err(err) = self.deactivate() {
                tracing::warn!(error = %err, "stream dropped while running");
            }
        }
        ports::destroy_ports(self.client.as_ref(), &mut self.ports);
    }
}

fn recover(handler: Box<dyn ProcessHandler>) -> Option<Box<StreamProcessor>> {
    match handler.into_any().downcast::<StreamProcessor>() {
        Ok(processor) => Some(processor),
        Err(_) => {
            tracing::error!("server returned a foreign process handler");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display_is_lowercase() {
        assert_eq!(StreamState::Running.to_string(), "running");
        assert_eq!(StreamState::Aborted.to_string(), "aborted");
    }

    #[test]
    fn first_finish_reason_wins() {
        let shared = SharedState::new(256, 48000);
        assert!(shared.finish(Finish::XrunLimit));
        assert!(!shared.finish(Finish::Complete));
        assert_eq!(shared.finished(), Finish::XrunLimit);
        shared.reset_for_run();
        assert_eq!(shared.finished(), Finish::None);
    }

    #[test]
    fn finish_codes_round_trip_through_u8() {
        for finish in [
            Finish::None,
            Finish::Complete,
            Finish::CallbackAbort,
            Finish::ServerShutdown,
            Finish::SampleRateChanged,
            Finish::XrunLimit,
        ] {
            assert_eq!(Finish::from_u8(finish as u8), finish);
        }
    }

    #[test]
    fn parameters_builder() {
        let block = [0u8; 4];
        let params = StreamParameters::new()
            .with_output(ChannelParameters::interleaved(2))
            .with_sample_rate(48000)
            .with_extension(&block);
        assert!(params.input.is_none());
        assert_eq!(params.output.map(|p| p.channels), Some(2));
        assert_eq!(params.sample_rate, Some(48000));
        assert_eq!(params.extension.map(<[u8]>::len), Some(4));
    }
}
