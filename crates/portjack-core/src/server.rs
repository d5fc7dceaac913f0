//! The audio server's client interface.
//!
//! This module defines the seam between the backend and the real-time audio
//! routing daemon that owns the graph, the clock and buffer-size negotiation.
//! The backend only talks to the server through these traits:
//!
//! - [`Connector`] opens a client connection under a requested name.
//! - [`ServerClient`] is that connection: port registration, graph edits and
//!   activation of the process handler.
//! - [`ProcessHandler`] is implemented by the backend and called by the server,
//!   once per cycle on its real-time thread plus non-real-time notifications.
//!
//! The in-process [`LoopbackServer`](crate::LoopbackServer) implements the seam
//! for tests and the CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │   Backend / Stream engine    │
//! └──────────────┬───────────────┘
//!                │ ServerClient (control thread)
//!                ▼
//! ┌──────────────────────────────┐
//! │         audio server         │
//! └──────────────┬───────────────┘
//!                │ ProcessHandler::process (real-time thread)
//!                ▼
//! ┌──────────────────────────────┐
//! │  StreamProcessor → callback  │
//! └──────────────────────────────┘
//! ```
//!
//! ## Buffers
//!
//! Each cycle the server hands the handler one contiguous, channel-major block
//! per direction: port `k` occupies `[k * frames .. (k + 1) * frames]`, ports
//! in the order they were listed in the [`Activation`]. The length of a cycle
//! is carried by the cycle itself and may change between cycles.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::ports::{Direction, PortFlags};

/// Server-assigned identity of a registered port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(u32);

impl PortId {
    /// Wrap a raw server port id.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw server port id.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Identity of an activated process handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActivationId(u64);

impl ActivationId {
    /// Wrap a raw activation id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw activation id.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Errors reported by the audio server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServerError {
    /// A client or port name is already taken and could not be resolved.
    #[error("name '{0}' is already in use")]
    NameInUse(String),

    /// The server refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The named port does not exist.
    #[error("no such port '{0}'")]
    NoSuchPort(String),

    /// The server has shut down or dropped this client.
    #[error("server has shut down")]
    ShutDown,

    /// The server did not answer within the allowed time.
    #[error("server did not respond in time")]
    Timeout,

    /// The referenced activation is not active.
    #[error("handler is not active")]
    NotActive,
}

/// What the process handler wants after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Keep calling the handler.
    Continue,
    /// Stop calling the handler; it stays registered until deactivated.
    Quit,
}

/// Read-only per-port view of one direction's cycle buffers.
#[derive(Debug, Clone, Copy)]
pub struct Planar<'a> {
    data: &'a [f32],
    frames: usize,
    channels: usize,
}

impl<'a> Planar<'a> {
    /// View `data` as `channels` consecutive runs of `frames` samples.
    ///
    /// # Panics
    ///
    /// Panics if `data` is shorter than `channels * frames`.
    pub fn new(data: &'a [f32], frames: usize, channels: usize) -> Self {
        Self {
            data: &data[..channels * frames],
            frames,
            channels,
        }
    }

    /// Number of ports (channels).
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Samples per channel in this cycle.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Samples of channel `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= channels()`.
    pub fn channel(&self, index: usize) -> &'a [f32] {
        &self.data[index * self.frames..(index + 1) * self.frames]
    }

    /// All channels in port order.
    pub fn iter(self) -> impl Iterator<Item = &'a [f32]> {
        let frames = self.frames;
        let data = self.data;
        (0..self.channels).map(move |index| &data[index * frames..(index + 1) * frames])
    }
}

/// Writable per-port view of one direction's cycle buffers.
#[derive(Debug)]
pub struct PlanarMut<'a> {
    data: &'a mut [f32],
    frames: usize,
    channels: usize,
}

impl<'a> PlanarMut<'a> {
    /// View `data` as `channels` consecutive runs of `frames` samples.
    ///
    /// # Panics
    ///
    /// Panics if `data` is shorter than `channels * frames`.
    pub fn new(data: &'a mut [f32], frames: usize, channels: usize) -> Self {
        Self {
            data: &mut data[..channels * frames],
            frames,
            channels,
        }
    }

    /// Number of ports (channels).
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Samples per channel in this cycle.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Samples of channel `index`.
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.data[index * self.frames..(index + 1) * self.frames]
    }

    /// Mutable samples of channel `index`.
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.data[index * self.frames..(index + 1) * self.frames]
    }

    /// All channels in port order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        self.data.chunks_exact_mut(self.frames.max(1))
    }

    /// Write zeros to every channel.
    pub fn fill_silence(&mut self) {
        self.data.fill(0.0);
    }

    /// A shorter-lived view of the same buffers.
    pub fn reborrow(&mut self) -> PlanarMut<'_> {
        PlanarMut {
            data: &mut *self.data,
            frames: self.frames,
            channels: self.channels,
        }
    }
}

/// One process cycle as seen by a [`ProcessHandler`].
#[derive(Debug)]
pub struct ProcessCycle<'a> {
    frames: usize,
    frame_time: u64,
    inputs: Planar<'a>,
    outputs: PlanarMut<'a>,
}

impl<'a> ProcessCycle<'a> {
    /// Assemble a cycle from the server's channel-major buffers.
    ///
    /// # Panics
    ///
    /// Panics if a buffer is shorter than its `channels * frames`.
    pub fn new(
        frames: usize,
        frame_time: u64,
        inputs: &'a [f32],
        input_channels: usize,
        outputs: &'a mut [f32],
        output_channels: usize,
    ) -> Self {
        Self {
            frames,
            frame_time,
            inputs: Planar::new(inputs, frames, input_channels),
            outputs: PlanarMut::new(outputs, frames, output_channels),
        }
    }

    /// Length of this cycle in frames.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Server frame counter at the start of this cycle.
    pub fn frame_time(&self) -> u64 {
        self.frame_time
    }

    /// Input port buffers.
    pub fn inputs(&self) -> Planar<'a> {
        self.inputs
    }

    /// Split into the input view and the writable output view.
    pub fn split(&mut self) -> (Planar<'a>, PlanarMut<'_>) {
        (self.inputs, self.outputs.reborrow())
    }
}

/// Callbacks the server invokes on an activated client.
///
/// `process` runs on the server's real-time thread and must not allocate,
/// lock or block. The notification methods run outside the real-time thread,
/// never concurrently with `process`.
pub trait ProcessHandler: Send + 'static {
    /// Produce one cycle of audio.
    fn process(&mut self, cycle: &mut ProcessCycle<'_>) -> Control;

    /// The server's cycle length will change to `frames` from the next cycle.
    fn buffer_size_changed(&mut self, _frames: usize) {}

    /// The server switched to a new sample rate.
    fn sample_rate_changed(&mut self, _sample_rate: u32) {}

    /// The server missed a deadline.
    fn xrun(&mut self) {}

    /// The server is going away; no further cycles will be delivered.
    fn shutdown(&mut self, _reason: &str) {}

    /// Recover the concrete handler after deactivation.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

/// A handler registration request.
pub struct Activation {
    /// Input ports, in the order their buffers appear in each cycle.
    pub inputs: Vec<PortId>,
    /// Output ports, in the order their buffers appear in each cycle.
    pub outputs: Vec<PortId>,
    /// The handler to call.
    pub handler: Box<dyn ProcessHandler>,
}

impl fmt::Debug for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activation")
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// A refused activation. The handler is handed back so it can be retried.
pub struct Rejected {
    /// Why the server refused.
    pub error: ServerError,
    /// The handler that was not installed.
    pub handler: Box<dyn ProcessHandler>,
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Opens client connections to an audio server.
pub trait Connector {
    /// Register a client, asking for `requested` as its name.
    ///
    /// The server may grant a different (suffixed) name; see
    /// [`ServerClient::name`].
    fn connect(&self, requested: &str) -> Result<Arc<dyn ServerClient>, ServerError>;
}

/// A connected client of the audio server.
pub trait ServerClient: Send + Sync {
    /// The name the server granted this client.
    fn name(&self) -> String;

    /// The server's current sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// The server's current cycle length in frames.
    fn buffer_size(&self) -> usize;

    /// Register a port named `client:short_name`.
    fn register_port(
        &self,
        short_name: &str,
        direction: Direction,
        flags: PortFlags,
    ) -> Result<PortId, ServerError>;

    /// Remove a port from the graph, dropping its connections.
    fn unregister_port(&self, port: PortId) -> Result<(), ServerError>;

    /// Full name of one of this client's ports.
    fn port_name(&self, port: PortId) -> Option<String>;

    /// Flags of any port in the graph, by full name.
    fn port_flags(&self, full_name: &str) -> Option<PortFlags>;

    /// Full names of the physical ports of `direction`, in hardware order.
    ///
    /// Physical capture ports are [`Direction::Output`] (they deliver audio
    /// into the graph); playback ports are [`Direction::Input`].
    fn physical_ports(&self, direction: Direction) -> Vec<String>;

    /// Connect an output port to an input port.
    fn connect(&self, source: &str, destination: &str) -> Result<(), ServerError>;

    /// Remove the connection between two ports.
    fn disconnect(&self, source: &str, destination: &str) -> Result<(), ServerError>;

    /// Remove every connection of one of this client's ports.
    fn disconnect_all(&self, port: PortId) -> Result<(), ServerError>;

    /// Full names of the ports connected to `full_name`.
    fn connections(&self, full_name: &str) -> Vec<String>;

    /// Start calling `activation.handler` once per cycle.
    fn activate(&self, activation: Activation) -> Result<ActivationId, Rejected>;

    /// Stop calling the handler and hand it back.
    ///
    /// Blocks until the real-time thread is no longer inside the handler, or
    /// fails with [`ServerError::Timeout`] after `timeout`.
    fn deactivate(
        &self,
        id: ActivationId,
        timeout: Duration,
    ) -> Result<Box<dyn ProcessHandler>, ServerError>;

    /// Whether the server has gone away.
    fn is_shut_down(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activation_ids_order_as_map_keys() {
        let mut active = std::collections::BTreeMap::new();
        active.insert(ActivationId::new(2), "second");
        active.insert(ActivationId::new(1), "first");
        assert!(ActivationId::new(1) < ActivationId::new(2));
        assert_eq!(active.values().copied().collect::<Vec<_>>(), ["first", "second"]);
        assert_eq!(active.remove(&ActivationId::new(2)), Some("second"));
    }

    #[test]
    fn planar_channels_are_contiguous_runs() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let planar = Planar::new(&data, 3, 2);
        assert_eq!(planar.channel(0), &[1.0, 2.0, 3.0]);
        assert_eq!(planar.channel(1), &[4.0, 5.0, 6.0]);
        assert_eq!(planar.iter().count(), 2);
    }

    #[test]
    fn planar_ignores_samples_past_the_cycle() {
        let data = [0.5; 16];
        let planar = Planar::new(&data, 4, 2);
        assert_eq!(planar.iter().map(<[f32]>::len).sum::<usize>(), 8);
    }

    #[test]
    fn planar_mut_writes_one_channel() {
        let mut data = [0.0; 4];
        let mut planar = PlanarMut::new(&mut data, 2, 2);
        planar.channel_mut(1).fill(0.25);
        assert_eq!(data, [0.0, 0.0, 0.25, 0.25]);
    }

    #[test]
    fn zero_length_cycle_has_empty_channels() {
        let mut outputs: [f32; 0] = [];
        let mut cycle = ProcessCycle::new(0, 0, &[], 0, &mut outputs, 2);
        let (_, mut out) = cycle.split();
        assert_eq!(out.channel_mut(1).len(), 0);
        assert_eq!(out.iter_mut().count(), 0);
    }

    #[test]
    fn server_error_display() {
        assert_eq!(
            ServerError::NameInUse("synth".into()).to_string(),
            "name 'synth' is already in use"
        );
        assert_eq!(ServerError::ShutDown.to_string(), "server has shut down");
    }
}
