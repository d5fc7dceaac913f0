//! Port creation, labelling and teardown for a stream.
//!
//! Every channel of a stream maps to one port registered with the audio server.
//! Ports are created together when a stream opens and destroyed together when
//! it closes; a failure while creating them removes every port the same call
//! already registered, so callers never observe a partially built set.
//!
//! ## Naming
//!
//! | stream         | base given       | no base            |
//! |----------------|------------------|--------------------|
//! | input only     | `synth_1`, …     | `in_1`, …          |
//! | output only    | `synth_1`, …     | `out_1`, …         |
//! | duplex         | `synth_in_1`, `synth_out_1`, … | `in_1`, `out_1`, … |
//!
//! The server prefixes each short name with the client name (`client:synth_1`).

use std::fmt;

use crate::error::{Error, Result};
use crate::server::{PortId, ServerClient};

bitflags::bitflags! {
    /// Capability flags attached to a port when it is created.
    ///
    /// The bit values match the audio server's own port flags. They are
    /// informational metadata for graph introspection; this backend does not
    /// enforce them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PortFlags: u64 {
        /// The port corresponds to a physical I/O connector.
        const IS_PHYSICAL = 0x4;
        /// The port is a source or sink endpoint: data received is not passed
        /// on, data produced does not originate from another port.
        const IS_TERMINAL = 0x10;
    }
}

/// Direction of a port, seen from the client that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The port receives audio from the graph.
    Input,
    /// The port delivers audio into the graph.
    Output,
}

impl Direction {
    /// Short prefix used in generated port names.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Input => "in",
            Self::Output => "out",
        }
    }

    /// The direction of the ports this one connects to.
    pub fn opposite(self) -> Self {
        match self {
            Self::Input => Self::Output,
            Self::Output => Self::Input,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// A port registered by a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    id: PortId,
    short_name: String,
    full_name: String,
    direction: Direction,
    flags: PortFlags,
}

impl Port {
    /// Server-assigned identity.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Name without the client prefix, e.g. `synth_1`.
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    /// Graph-wide name, e.g. `portjack:synth_1`.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Whether the port receives or delivers audio.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Capability flags fixed at creation.
    pub fn flags(&self) -> PortFlags {
        self.flags
    }
}

/// The ports owned by one stream, in channel order.
#[derive(Debug, Default)]
pub struct PortSet {
    inputs: Vec<Port>,
    outputs: Vec<Port>,
}

impl PortSet {
    /// Input ports, one per input channel.
    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    /// Output ports, one per output channel.
    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    /// All ports, inputs first.
    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.inputs.iter().chain(self.outputs.iter())
    }

    /// Total number of ports.
    pub fn len(&self) -> usize {
        self.inputs.len() + self.outputs.len()
    }

    /// Whether the set holds no ports.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    pub(crate) fn input_ids(&self) -> Vec<PortId> {
        self.inputs.iter().map(Port::id).collect()
    }

    pub(crate) fn output_ids(&self) -> Vec<PortId> {
        self.outputs.iter().map(Port::id).collect()
    }

    fn push(&mut self, port: Port) {
        match port.direction {
            Direction::Input => self.inputs.push(port),
            Direction::Output => self.outputs.push(port),
        }
    }

    fn drain(&mut self) -> impl Iterator<Item = Port> + '_ {
        self.inputs.drain(..).chain(self.outputs.drain(..))
    }
}

/// What [`create_ports`] should register.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortRequest<'a> {
    /// Number of input channels.
    pub inputs: usize,
    /// Number of output channels.
    pub outputs: usize,
    /// Custom port name base; `None` generates `in_N`/`out_N`.
    pub name_base: Option<&'a str>,
    /// Flags attached to every port.
    pub flags: PortFlags,
}

/// Deterministic short names for `count` ports of one direction.
pub fn port_names(
    base: Option<&str>,
    direction: Direction,
    count: usize,
    duplex: bool,
) -> Vec<String> {
    (1..=count)
        .map(|index| match base {
            Some(base) if duplex => format!("{}_{}_{}", base, direction.prefix(), index),
            Some(base) => format!("{}_{}", base, index),
            None => format!("{}_{}", direction.prefix(), index),
        })
        .collect()
}

/// Register one port per requested channel.
///
/// All or nothing: if the server rejects any port, every port registered by
/// this call is torn down again before [`Error::PortCreationFailed`] is returned.
pub fn create_ports(client: &dyn ServerClient, request: &PortRequest<'_>) -> Result<PortSet> {
    let duplex = request.inputs > 0 && request.outputs > 0;
    let mut created = PortSet::default();

    for (direction, count) in [
        (Direction::Input, request.inputs),
        (Direction::Output, request.outputs),
    ] {
        for short_name in port_names(request.name_base, direction, count, duplex) {
            match client.register_port(&short_name, direction, request.flags) {
                Ok(id) => {
                    let full_name = client
                        .port_name(id)
                        .unwrap_or_else(|| format!("{}:{}", client.name(), short_name));
                    tracing::debug!(port = %full_name, %direction, flags = ?request.flags, "port registered");
                    created.push(Port {
                        id,
                        short_name,
                        full_name,
                        direction,
                        flags: request.flags,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        port = %short_name,
                        error = %err,
                        rollback = created.len(),
                        "port registration failed, rolling back"
                    );
                    destroy_ports(client, &mut created);
                    return Err(Error::PortCreationFailed {
                        port: short_name,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    Ok(created)
}

/// Connect inputs to physical sources and outputs to physical sinks, in order.
///
/// Ports without a physical counterpart stay unconnected. Failures are logged
/// and skipped. Returns the number of links made.
pub fn connect_physical(client: &dyn ServerClient, ports: &PortSet) -> usize {
    let mut links = 0;

    let sources = client.physical_ports(Direction::Output);
    for (port, source) in ports.inputs().iter().zip(&sources) {
        links += usize::from(link(client, source, port.full_name()));
    }

    let sinks = client.physical_ports(Direction::Input);
    for (port, sink) in ports.outputs().iter().zip(&sinks) {
        links += usize::from(link(client, port.full_name(), sink));
    }

    links
}

fn link(client: &dyn ServerClient, source: &str, destination: &str) -> bool {
    match client.connect(source, destination) {
        Ok(()) => {
            tracing::debug!(%source, %destination, "ports connected");
            true
        }
        Err(err) => {
            tracing::warn!(%source, %destination, error = %err, "auto-connect failed");
            false
        }
    }
}

/// Disconnect and unregister every port in `ports`, leaving it empty.
///
/// Idempotent. Server errors (for example after the server went away) are
/// logged; the ports are forgotten either way.
pub fn destroy_ports(client: &dyn ServerClient, ports: &mut PortSet) {
    for port in ports.drain() {
        if let Err(err) = client.disconnect_all(port.id) {
            tracing::debug!(port = %port.full_name, error = %err, "disconnect failed");
        }
        match client.unregister_port(port.id) {
            Ok(()) => tracing::debug!(port = %port.full_name, "port unregistered"),
            Err(err) => {
                tracing::warn!(port = %port.full_name, error = %err, "port unregister failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_names() {
        assert_eq!(
            port_names(None, Direction::Output, 2, false),
            ["out_1", "out_2"]
        );
        assert_eq!(port_names(None, Direction::Input, 1, true), ["in_1"]);
    }

    #[test]
    fn custom_base_names() {
        assert_eq!(
            port_names(Some("synth"), Direction::Output, 2, false),
            ["synth_1", "synth_2"]
        );
        assert_eq!(
            port_names(Some("fx"), Direction::Input, 2, true),
            ["fx_in_1", "fx_in_2"]
        );
    }

    #[test]
    fn zero_ports_no_names() {
        assert!(port_names(Some("x"), Direction::Input, 0, false).is_empty());
    }

    #[test]
    fn direction_helpers() {
        assert_eq!(Direction::Input.opposite(), Direction::Output);
        assert_eq!(Direction::Output.prefix(), "out");
        assert_eq!(Direction::Input.to_string(), "input");
    }

    #[test]
    fn flags_match_server_bits() {
        assert_eq!(PortFlags::IS_PHYSICAL.bits(), 0x4);
        assert_eq!(PortFlags::IS_TERMINAL.bits(), 0x10);
        assert!(PortFlags::default().is_empty());
    }
}
