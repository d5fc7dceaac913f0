//! In-process audio server.
//!
//! [`LoopbackServer`] implements the server seam without any audio hardware.
//! Cycles run when asked ([`LoopbackServer::run_cycle`]) or in real time on a
//! clock thread ([`LoopbackServer::start_clock`]), which makes stream behavior
//! deterministic in tests. The server also lets tests provoke the conditions a
//! real server produces: buffer-size and sample-rate changes, xruns, shutdown,
//! refused port registrations and refused activations.
//!
//! The graph has a fixed `system` client with physical ports:
//!
//! - `system:capture_N`: sources, fed from [`LoopbackServer::set_capture_signal`].
//! - `system:playback_N`: sinks, recorded into a tap read by [`LoopbackServer::playback`].
//!   Each tap keeps the most recent [`LoopbackSettings::playback_capacity`] frames.
//!
//! A cycle runs with the server lock held. [`ServerClient::deactivate`] takes
//! the same lock with a timeout, so it returns only once no cycle is inside
//! the handler.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::ports::{Direction, PortFlags};
use crate::server::{
    Activation, ActivationId, Connector, Control, PortId, ProcessCycle, ProcessHandler, Rejected,
    ServerClient, ServerError,
};

const SYSTEM_CLIENT: &str = "system";
const MAX_NAME_SUFFIX: u32 = 99;

/// Frames a playback tap keeps by default, a little over a second at 48 kHz.
pub const DEFAULT_PLAYBACK_CAPACITY: usize = 1 << 16;

/// Shape of a loopback server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackSettings {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Initial cycle length in frames.
    pub buffer_size: usize,
    /// Number of `system:capture_N` ports.
    pub physical_inputs: usize,
    /// Number of `system:playback_N` ports.
    pub physical_outputs: usize,
    /// Frames each playback tap keeps. Older frames are dropped.
    pub playback_capacity: usize,
}

impl Default for LoopbackSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            buffer_size: 256,
            physical_inputs: 2,
            physical_outputs: 2,
            playback_capacity: DEFAULT_PLAYBACK_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    System,
    Client(u64),
}

#[derive(Debug)]
struct PortEntry {
    owner: Owner,
    full_name: String,
    direction: Direction,
    flags: PortFlags,
    physical_index: usize,
    buffer: Vec<f32>,
}

struct ActiveEntry {
    client: u64,
    inputs: Vec<PortId>,
    outputs: Vec<PortId>,
    handler: Box<dyn ProcessHandler>,
    quit: bool,
    in_block: Vec<f32>,
    out_block: Vec<f32>,
}

#[derive(Debug, Default)]
struct CaptureSignal {
    samples: Vec<f32>,
    position: usize,
}

impl CaptureSignal {
    fn fill(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.samples.get(self.position).copied().unwrap_or(0.0);
            self.position += 1;
        }
    }
}

#[derive(Default)]
struct State {
    frame_time: u64,
    next_port: u32,
    next_client: u64,
    next_activation: u64,
    clients: BTreeMap<u64, String>,
    ports: BTreeMap<PortId, PortEntry>,
    // (source output port, destination input port)
    connections: BTreeSet<(PortId, PortId)>,
    activations: BTreeMap<ActivationId, ActiveEntry>,
    capture: Vec<CaptureSignal>,
    playback: Vec<VecDeque<f32>>,
    playback_capacity: usize,
    // system:playback_N ports, by physical index
    sinks: Vec<PortId>,
    mix: Vec<f32>,
    fail_registration_in: Option<usize>,
    reject_next_activation: bool,
}

impl State {
    fn port_by_name(&self, full_name: &str) -> Option<(PortId, &PortEntry)> {
        self.ports
            .iter()
            .find(|(_, port)| port.full_name == full_name)
            .map(|(id, port)| (*id, port))
    }

    fn add_port(
        &mut self,
        owner: Owner,
        full_name: String,
        direction: Direction,
        flags: PortFlags,
        physical_index: usize,
        frames: usize,
    ) -> PortId {
        self.next_port += 1;
        let id = PortId::new(self.next_port);
        self.ports.insert(
            id,
            PortEntry {
                owner,
                full_name,
                direction,
                flags,
                physical_index,
                buffer: vec![0.0; frames],
            },
        );
        id
    }

    fn remove_port(&mut self, id: PortId) -> bool {
        self.connections
            .retain(|&(source, destination)| source != id && destination != id);
        self.ports.remove(&id).is_some()
    }

    fn remove_client(&mut self, client: u64) {
        self.activations.retain(|_, active| active.client != client);
        let owned: Vec<PortId> = self
            .ports
            .iter()
            .filter(|(_, port)| port.owner == Owner::Client(client))
            .map(|(id, _)| *id)
            .collect();
        for id in owned {
            self.remove_port(id);
        }
        self.clients.remove(&client);
    }

    fn unique_client_name(&self, requested: &str) -> Result<String, ServerError> {
        let taken = |name: &str| {
            name == SYSTEM_CLIENT || self.clients.values().any(|existing| existing == name)
        };
        if !taken(requested) {
            return Ok(requested.to_string());
        }
        (1..=MAX_NAME_SUFFIX)
            .map(|suffix| format!("{}-{:02}", requested, suffix))
            .find(|candidate| !taken(candidate))
            .ok_or_else(|| ServerError::NameInUse(requested.to_string()))
    }

    fn run_cycle(&mut self, frames: usize) {
        let State {
            frame_time,
            ports,
            connections,
            activations,
            capture,
            playback,
            playback_capacity,
            sinks,
            mix,
            ..
        } = self;

        for port in ports.values_mut() {
            port.buffer.clear();
            port.buffer.resize(frames, 0.0);
            if port.owner == Owner::System
                && port.direction == Direction::Output
                && let Some(signal) = capture.get_mut(port.physical_index)
            {
                signal.fill(&mut port.buffer);
            }
        }

        for active in activations.values_mut().filter(|active| !active.quit) {
            let inputs = active.inputs.len();
            let outputs = active.outputs.len();

            active.in_block.clear();
            active.in_block.resize(inputs * frames, 0.0);
            for (k, id) in active.inputs.iter().enumerate() {
                mix_into(
                    &mut active.in_block[k * frames..(k + 1) * frames],
                    *id,
                    ports,
                    connections,
                );
            }
            active.out_block.resize(outputs * frames, 0.0);

            let mut cycle = ProcessCycle::new(
                frames,
                *frame_time,
                &active.in_block,
                inputs,
                &mut active.out_block,
                outputs,
            );
            if active.handler.process(&mut cycle) == Control::Quit {
                active.quit = true;
            }

            for (k, id) in active.inputs.iter().enumerate() {
                if let Some(port) = ports.get_mut(id) {
                    port.buffer
                        .copy_from_slice(&active.in_block[k * frames..(k + 1) * frames]);
                }
            }
            for (k, id) in active.outputs.iter().enumerate() {
                if let Some(port) = ports.get_mut(id) {
                    port.buffer
                        .copy_from_slice(&active.out_block[k * frames..(k + 1) * frames]);
                }
            }
        }

        for (index, id) in sinks.iter().enumerate() {
            mix.clear();
            mix.resize(frames, 0.0);
            mix_into(mix, *id, ports, connections);
            if let Some(tap) = playback.get_mut(index) {
                record(tap, mix, *playback_capacity);
            }
            if let Some(port) = ports.get_mut(id) {
                port.buffer.copy_from_slice(mix);
            }
        }

        *frame_time += frames as u64;
    }
}

// Appends `block`, dropping the oldest frames beyond `capacity`.
fn record(tap: &mut VecDeque<f32>, block: &[f32], capacity: usize) {
    let keep = block.len().min(capacity);
    let overflow = (tap.len() + keep).saturating_sub(capacity);
    tap.drain(..overflow);
    tap.extend(&block[block.len() - keep..]);
}

fn mix_into(
    destination: &mut [f32],
    port: PortId,
    ports: &BTreeMap<PortId, PortEntry>,
    connections: &BTreeSet<(PortId, PortId)>,
) {
    for (source, _) in connections.iter().filter(|(_, dst)| *dst == port) {
        if let Some(source) = ports.get(source) {
            for (out, sample) in destination.iter_mut().zip(&source.buffer) {
                *out += sample;
            }
        }
    }
}

struct Inner {
    state: Mutex<State>,
    shut_down: AtomicBool,
    sample_rate: AtomicU32,
    buffer_size: AtomicUsize,
}

impl Inner {
    fn check_running(&self) -> Result<(), ServerError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(ServerError::ShutDown);
        }
        Ok(())
    }
}

/// An audio server living inside the current process.
///
/// Cloning gives another handle to the same server.
#[derive(Clone)]
pub struct LoopbackServer {
    inner: Arc<Inner>,
}

impl LoopbackServer {
    /// Create a server with `settings.physical_inputs` capture ports and
    /// `settings.physical_outputs` playback ports.
    pub fn new(settings: LoopbackSettings) -> Self {
        let mut state = State {
            playback_capacity: settings.playback_capacity,
            mix: Vec::with_capacity(settings.buffer_size),
            ..State::default()
        };
        let physical = PortFlags::IS_PHYSICAL | PortFlags::IS_TERMINAL;
        for index in 0..settings.physical_inputs {
            state.add_port(
                Owner::System,
                format!("{}:capture_{}", SYSTEM_CLIENT, index + 1),
                Direction::Output,
                physical,
                index,
                settings.buffer_size,
            );
            state.capture.push(CaptureSignal::default());
        }
        for index in 0..settings.physical_outputs {
            let id = state.add_port(
                Owner::System,
                format!("{}:playback_{}", SYSTEM_CLIENT, index + 1),
                Direction::Input,
                physical,
                index,
                settings.buffer_size,
            );
            state.sinks.push(id);
            state
                .playback
                .push(VecDeque::with_capacity(settings.playback_capacity));
        }

        tracing::debug!(?settings, "loopback server created");
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                shut_down: AtomicBool::new(false),
                sample_rate: AtomicU32::new(settings.sample_rate),
                buffer_size: AtomicUsize::new(settings.buffer_size),
            }),
        }
    }

    /// Run one cycle of the current buffer size. Returns `false` once the
    /// server has shut down.
    pub fn run_cycle(&self) -> bool {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return false;
        }
        let frames = self.inner.buffer_size.load(Ordering::Acquire);
        self.inner.state.lock().run_cycle(frames);
        true
    }

    /// Run up to `count` cycles; returns how many ran.
    pub fn run_cycles(&self, count: usize) -> usize {
        (0..count).take_while(|_| self.run_cycle()).count()
    }

    /// Change the cycle length. Activated handlers are told before the next
    /// cycle.
    pub fn set_buffer_size(&self, frames: usize) {
        let mut state = self.inner.state.lock();
        self.inner.buffer_size.store(frames, Ordering::Release);
        for active in state.activations.values_mut() {
            active.handler.buffer_size_changed(frames);
        }
        tracing::debug!(frames, "loopback buffer size changed");
    }

    /// Change the sample rate and notify activated handlers.
    pub fn set_sample_rate(&self, sample_rate: u32) {
        let mut state = self.inner.state.lock();
        self.inner.sample_rate.store(sample_rate, Ordering::Release);
        for active in state.activations.values_mut() {
            active.handler.sample_rate_changed(sample_rate);
        }
        tracing::debug!(sample_rate, "loopback sample rate changed");
    }

    /// Report an xrun to every activated handler.
    pub fn inject_xrun(&self) {
        let mut state = self.inner.state.lock();
        for active in state.activations.values_mut() {
            active.handler.xrun();
        }
    }

    /// Shut the server down. Handlers are notified and dropped; every client
    /// port disappears and further requests fail with [`ServerError::ShutDown`].
    pub fn shutdown(&self, reason: &str) {
        let mut state = self.inner.state.lock();
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for active in state.activations.values_mut() {
            active.handler.shutdown(reason);
        }
        state.activations.clear();
        let clients: Vec<u64> = state.clients.keys().copied().collect();
        for client in clients {
            state.remove_client(client);
        }
        tracing::info!(%reason, "loopback server shut down");
    }

    /// Make the `nth` port registration from now on fail (1 = the next one).
    pub fn fail_port_registration_at(&self, nth: usize) {
        self.inner.state.lock().fail_registration_in = Some(nth.max(1));
    }

    /// Refuse the next activation request.
    pub fn reject_next_activation(&self) {
        self.inner.state.lock().reject_next_activation = true;
    }

    /// Samples `system:capture_{channel + 1}` delivers, one per frame from the
    /// next cycle on; silence afterwards.
    pub fn set_capture_signal(&self, channel: usize, samples: impl Into<Vec<f32>>) {
        let mut state = self.inner.state.lock();
        if let Some(signal) = state.capture.get_mut(channel) {
            *signal = CaptureSignal {
                samples: samples.into(),
                position: 0,
            };
        }
    }

    /// The samples a port carried in the last cycle.
    pub fn port_buffer(&self, full_name: &str) -> Option<Vec<f32>> {
        let state = self.inner.state.lock();
        state
            .port_by_name(full_name)
            .map(|(_, port)| port.buffer.clone())
    }

    /// What reached `system:playback_{channel + 1}`, up to the last
    /// [`LoopbackSettings::playback_capacity`] frames.
    pub fn playback(&self, channel: usize) -> Vec<f32> {
        let state = self.inner.state.lock();
        state
            .playback
            .get(channel)
            .map(|tap| tap.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Forget what the playback taps recorded.
    pub fn clear_playback(&self) {
        let mut state = self.inner.state.lock();
        state.playback.iter_mut().for_each(VecDeque::clear);
    }

    /// Full names of every port in the graph, physical ones included.
    pub fn port_names(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        state
            .ports
            .values()
            .map(|port| port.full_name.clone())
            .collect()
    }

    /// Number of ports registered by clients.
    pub fn registered_port_count(&self) -> usize {
        let state = self.inner.state.lock();
        state
            .ports
            .values()
            .filter(|port| port.owner != Owner::System)
            .count()
    }

    /// Names of the connected clients.
    pub fn client_names(&self) -> Vec<String> {
        self.inner.state.lock().clients.values().cloned().collect()
    }

    /// Drive cycles in real time on a background thread.
    pub fn start_clock(&self) -> LoopbackClock {
        let (stop, stopped) = crossbeam_channel::bounded::<()>(1);
        let server = self.clone();
        let thread = std::thread::spawn(move || {
            let mut cycles = 0u64;
            loop {
                let frames = server.inner.buffer_size.load(Ordering::Acquire) as f64;
                let rate = f64::from(server.inner.sample_rate.load(Ordering::Acquire).max(1));
                let period = Duration::from_secs_f64(frames / rate);
                match stopped.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        if !server.run_cycle() {
                            break;
                        }
                        cycles += 1;
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            cycles
        });
        tracing::debug!("loopback clock started");
        LoopbackClock {
            stop: Some(stop),
            thread: Some(thread),
        }
    }
}

impl std::fmt::Debug for LoopbackServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackServer")
            .field("sample_rate", &self.inner.sample_rate.load(Ordering::Relaxed))
            .field("buffer_size", &self.inner.buffer_size.load(Ordering::Relaxed))
            .field("shut_down", &self.inner.shut_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Connector for LoopbackServer {
    fn connect(&self, requested: &str) -> Result<Arc<dyn ServerClient>, ServerError> {
        self.inner.check_running()?;
        let mut state = self.inner.state.lock();
        let name = state.unique_client_name(requested)?;
        state.next_client += 1;
        let id = state.next_client;
        state.clients.insert(id, name.clone());
        tracing::debug!(%requested, granted = %name, "loopback client connected");

        Ok(Arc::new(LoopbackClient {
            inner: Arc::clone(&self.inner),
            id,
            name,
        }))
    }
}

/// Stops the clock thread started by [`LoopbackServer::start_clock`] when
/// dropped.
#[derive(Debug)]
pub struct LoopbackClock {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<u64>>,
}

impl LoopbackClock {
    /// Stop the clock and return the number of cycles it ran.
    pub fn stop(mut self) -> u64 {
        self.halt()
    }

    fn halt(&mut self) -> u64 {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.thread
            .take()
            .and_then(|thread| thread.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for LoopbackClock {
    fn drop(&mut self) {
        self.halt();
    }
}

struct LoopbackClient {
    inner: Arc<Inner>,
    id: u64,
    name: String,
}

impl ServerClient for LoopbackClient {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate.load(Ordering::Acquire)
    }

    fn buffer_size(&self) -> usize {
        self.inner.buffer_size.load(Ordering::Acquire)
    }

    fn register_port(
        &self,
        short_name: &str,
        direction: Direction,
        flags: PortFlags,
    ) -> Result<PortId, ServerError> {
        self.inner.check_running()?;
        let mut state = self.inner.state.lock();

        match state.fail_registration_in.take() {
            Some(remaining) if remaining <= 1 => {
                return Err(ServerError::Rejected("port registration refused".into()));
            }
            Some(remaining) => state.fail_registration_in = Some(remaining - 1),
            None => {}
        }

        let full_name = format!("{}:{}", self.name, short_name);
        if state.port_by_name(&full_name).is_some() {
            return Err(ServerError::NameInUse(full_name));
        }
        let frames = self.inner.buffer_size.load(Ordering::Acquire);
        Ok(state.add_port(
            Owner::Client(self.id),
            full_name,
            direction,
            flags,
            0,
            frames,
        ))
    }

    fn unregister_port(&self, port: PortId) -> Result<(), ServerError> {
        self.inner.check_running()?;
        let mut state = self.inner.state.lock();
        let owned = state
            .ports
            .get(&port)
            .is_some_and(|entry| entry.owner == Owner::Client(self.id));
        if !owned {
            return Err(ServerError::NoSuchPort(format!("#{}", port.raw())));
        }
        state.remove_port(port);
        Ok(())
    }

    fn port_name(&self, port: PortId) -> Option<String> {
        let state = self.inner.state.lock();
        state.ports.get(&port).map(|entry| entry.full_name.clone())
    }

    fn port_flags(&self, full_name: &str) -> Option<PortFlags> {
        let state = self.inner.state.lock();
        state.port_by_name(full_name).map(|(_, port)| port.flags)
    }

    fn physical_ports(&self, direction: Direction) -> Vec<String> {
        let state = self.inner.state.lock();
        state
            .ports
            .values()
            .filter(|port| port.owner == Owner::System && port.direction == direction)
            .map(|port| port.full_name.clone())
            .collect()
    }

    fn connect(&self, source: &str, destination: &str) -> Result<(), ServerError> {
        self.inner.check_running()?;
        let mut state = self.inner.state.lock();
        let (src, src_port) = state
            .port_by_name(source)
            .ok_or_else(|| ServerError::NoSuchPort(source.to_string()))?;
        if src_port.direction != Direction::Output {
            return Err(ServerError::Rejected(format!("{} is not a source", source)));
        }
        let (dst, dst_port) = state
            .port_by_name(destination)
            .ok_or_else(|| ServerError::NoSuchPort(destination.to_string()))?;
        if dst_port.direction != Direction::Input {
            return Err(ServerError::Rejected(format!(
                "{} is not a destination",
                destination
            )));
        }
        if !state.connections.insert((src, dst)) {
            return Err(ServerError::Rejected(format!(
                "{} is already connected to {}",
                source, destination
            )));
        }
        Ok(())
    }

    fn disconnect(&self, source: &str, destination: &str) -> Result<(), ServerError> {
        self.inner.check_running()?;
        let mut state = self.inner.state.lock();
        let (src, _) = state
            .port_by_name(source)
            .ok_or_else(|| ServerError::NoSuchPort(source.to_string()))?;
        let (dst, _) = state
            .port_by_name(destination)
            .ok_or_else(|| ServerError::NoSuchPort(destination.to_string()))?;
        if !state.connections.remove(&(src, dst)) {
            return Err(ServerError::Rejected(format!(
                "{} is not connected to {}",
                source, destination
            )));
        }
        Ok(())
    }

    fn disconnect_all(&self, port: PortId) -> Result<(), ServerError> {
        self.inner.check_running()?;
        let mut state = self.inner.state.lock();
        if !state.ports.contains_key(&port) {
            return Err(ServerError::NoSuchPort(format!("#{}", port.raw())));
        }
        state
            .connections
            .retain(|&(source, destination)| source != port && destination != port);
        Ok(())
    }

    fn connections(&self, full_name: &str) -> Vec<String> {
        let state = self.inner.state.lock();
        let Some((id, _)) = state.port_by_name(full_name) else {
            return Vec::new();
        };
        state
            .connections
            .iter()
            .filter_map(|&(source, destination)| {
                if source == id {
                    Some(destination)
                } else if destination == id {
                    Some(source)
                } else {
                    None
                }
            })
            .filter_map(|peer| state.ports.get(&peer).map(|port| port.full_name.clone()))
            .collect()
    }

    fn activate(&self, activation: Activation) -> Result<ActivationId, Rejected> {
        let Activation {
            inputs,
            outputs,
            handler,
        } = activation;
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(Rejected {
                error: ServerError::ShutDown,
                handler,
            });
        }

        let mut state = self.inner.state.lock();
        if std::mem::take(&mut state.reject_next_activation) {
            return Err(Rejected {
                error: ServerError::Rejected("activation refused".into()),
                handler,
            });
        }
        let foreign = inputs.iter().chain(&outputs).find(|id| {
            state
                .ports
                .get(*id)
                .is_none_or(|port| port.owner != Owner::Client(self.id))
        });
        if let Some(id) = foreign {
            return Err(Rejected {
                error: ServerError::NoSuchPort(format!("#{}", id.raw())),
                handler,
            });
        }

        state.next_activation += 1;
        let id = ActivationId::new(state.next_activation);
        state.activations.insert(
            id,
            ActiveEntry {
                client: self.id,
                inputs,
                outputs,
                handler,
                quit: false,
                in_block: Vec::new(),
                out_block: Vec::new(),
            },
        );
        tracing::debug!(client = %self.name, activation = id.raw(), "handler activated");
        Ok(id)
    }

    fn deactivate(
        &self,
        id: ActivationId,
        timeout: Duration,
    ) -> Result<Box<dyn ProcessHandler>, ServerError> {
        self.inner.check_running()?;
        let Some(mut state) = self.inner.state.try_lock_for(timeout) else {
            return Err(ServerError::Timeout);
        };
        match state.activations.get(&id) {
            Some(active) if active.client == self.id => {}
            _ => return Err(ServerError::NotActive),
        }
        state
            .activations
            .remove(&id)
            .map(|active| active.handler)
            .ok_or(ServerError::NotActive)
    }

    fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }
}

impl Drop for LoopbackClient {
    fn drop(&mut self) {
        self.inner.state.lock().remove_client(self.id);
        tracing::debug!(client = %self.name, "loopback client closed");
    }
}
