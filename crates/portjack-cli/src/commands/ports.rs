//! Open a stream and report the ports it registered.

use std::path::Path;

use anyhow::Context;
use clap::Args;
use portjack_core::{CallbackResult, ChannelParameters, Port, Stream, StreamParameters};
use serde::Serialize;

use super::common;

#[derive(Args)]
pub struct PortsArgs {
    /// Number of input channels
    #[arg(short, long, default_value_t = 0)]
    inputs: usize,

    /// Number of output channels
    #[arg(short, long, default_value_t = 2)]
    outputs: usize,

    /// Base name for the ports [default: in_N / out_N]
    #[arg(long)]
    port_name: Option<String>,

    /// Register the ports as terminal
    #[arg(long)]
    terminal: bool,

    /// Register the ports as physical
    #[arg(long)]
    physical: bool,

    /// Leave the ports unconnected regardless of the configuration
    #[arg(long)]
    no_connect: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct PortsReport {
    client: String,
    sample_rate: u32,
    buffer_size: usize,
    ports: Vec<PortEntry>,
}

#[derive(Serialize)]
struct PortEntry {
    name: String,
    direction: String,
    flags: Vec<String>,
    connections: Vec<String>,
}

impl PortEntry {
    fn new(stream: &Stream, port: &Port) -> Self {
        Self {
            name: port.full_name().to_string(),
            direction: port.direction().to_string(),
            flags: common::flag_names(port.flags()),
            connections: stream.connections(port),
        }
    }
}

pub fn run(args: PortsArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    anyhow::ensure!(
        args.inputs + args.outputs > 0,
        "at least one of --inputs and --outputs must be positive"
    );

    let mut config = common::load_config(config_path)?;
    if args.no_connect {
        config.auto_connect = false;
    }
    let session = common::connect(&config)?;

    let flags = common::port_flags(args.terminal, args.physical);
    let extension = common::extension_block(args.port_name.as_deref(), flags);
    let mut params = StreamParameters::new();
    if args.inputs > 0 {
        params = params.with_input(ChannelParameters::interleaved(args.inputs));
    }
    if args.outputs > 0 {
        params = params.with_output(ChannelParameters::interleaved(args.outputs));
    }
    if let Some(block) = &extension {
        params = params.with_extension(block);
    }

    let mut stream = session
        .backend
        .open_stream(&params, Box::new(|_| CallbackResult::Continue))
        .context("failed to open stream")?;

    let report = PortsReport {
        client: session.registry.client_name()?,
        sample_rate: session.backend.sample_rate(),
        buffer_size: session.backend.buffer_size(),
        ports: stream
            .ports()
            .iter()
            .map(|port| PortEntry::new(&stream, port))
            .collect(),
    };
    stream.close().context("failed to close stream")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Client: {}", report.client);
    println!(
        "Server: {} Hz, {} frames per cycle",
        report.sample_rate, report.buffer_size
    );
    println!();
    for port in &report.ports {
        let flags = if port.flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", port.flags.join(", "))
        };
        println!("{} ({}){}", port.name, port.direction, flags);
        if port.connections.is_empty() {
            println!("    (unconnected)");
        }
        for connection in &port.connections {
            println!("    <-> {connection}");
        }
    }
    println!();
    println!("Total: {} port(s)", report.ports.len());

    Ok(())
}
