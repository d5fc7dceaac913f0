//! Sine tone through an output stream on the loopback server.

use std::f32::consts::TAU;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use portjack_core::{
    CallbackResult, ChannelParameters, StreamCallback, StreamParameters, StreamState,
};

use super::common;

#[derive(Args)]
pub struct ToneArgs {
    /// Number of output channels
    #[arg(short, long, default_value_t = 2)]
    channels: usize,

    /// Tone frequency in Hz
    #[arg(short, long, default_value_t = 440.0)]
    frequency: f32,

    /// Peak amplitude (0.0 to 1.0)
    #[arg(short, long, default_value_t = 0.5)]
    amplitude: f32,

    /// Base name for the ports [default: out_N]
    #[arg(long)]
    port_name: Option<String>,

    /// Register the ports as terminal
    #[arg(long)]
    terminal: bool,

    /// Register the ports as physical
    #[arg(long)]
    physical: bool,

    /// Write interleaved frames instead of per-channel buffers
    #[arg(long)]
    interleaved: bool,

    /// Number of server cycles to run
    #[arg(long, default_value_t = 100, conflicts_with = "seconds")]
    cycles: usize,

    /// Run on a real-time clock for this long instead of a fixed cycle count
    #[arg(long)]
    seconds: Option<f64>,
}

pub fn run(args: ToneArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    anyhow::ensure!(args.channels > 0, "--channels must be at least 1");
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.amplitude),
        "--amplitude must be between 0.0 and 1.0"
    );
    if let Some(seconds) = args.seconds {
        anyhow::ensure!(
            seconds.is_finite() && seconds > 0.0,
            "--seconds must be positive"
        );
    }

    let config = common::load_config(config_path)?;
    let session = common::connect(&config)?;
    let sample_rate = session.backend.sample_rate() as f32;
    anyhow::ensure!(
        args.frequency > 0.0 && args.frequency < sample_rate / 2.0,
        "--frequency must be between 0 and {} Hz",
        sample_rate / 2.0
    );

    let flags = common::port_flags(args.terminal, args.physical);
    let extension = common::extension_block(args.port_name.as_deref(), flags);
    let layout = if args.interleaved {
        ChannelParameters::interleaved(args.channels)
    } else {
        ChannelParameters::non_interleaved(args.channels)
    };
    let mut params = StreamParameters::new().with_output(layout);
    if let Some(block) = &extension {
        params = params.with_extension(block);
    }

    let phase_inc = args.frequency / sample_rate;
    let amplitude = args.amplitude;
    let mut phase = 0.0f32;
    let callback: StreamCallback = Box::new(move |ctx| {
        if let Some(out) = ctx.output.as_mut() {
            let channels = out.channels();
            for frame in 0..ctx.frames {
                let value = (phase * TAU).sin() * amplitude;
                for channel in 0..channels {
                    out.set(channel, frame, value);
                }
                phase += phase_inc;
                if phase >= 1.0 {
                    phase -= 1.0;
                }
            }
        }
        CallbackResult::Continue
    });

    let mut stream = session
        .backend
        .open_stream(&params, callback)
        .context("failed to open stream")?;
    stream.start().context("failed to start stream")?;

    let cycles = match args.seconds {
        Some(seconds) => {
            let clock = session.server.start_clock();
            std::thread::sleep(Duration::from_secs_f64(seconds));
            clock.stop()
        }
        None => session.server.run_cycles(args.cycles) as u64,
    };

    let status = stream.status();
    if status.state == StreamState::Running {
        stream.stop().context("failed to stop stream")?;
    }

    println!("Client: {}", session.registry.client_name()?);
    println!("Ports:");
    for port in stream.ports().outputs() {
        let connections = stream.connections(port);
        let target = if connections.is_empty() {
            "(unconnected)".to_string()
        } else {
            connections.join(", ")
        };
        println!("  {} -> {}", port.full_name(), target);
    }
    println!("Cycles: {cycles}");
    println!("Frames processed: {}", status.frames_processed);
    println!("Xruns: {}", status.total_xruns);
    println!("Playback peaks:");
    for channel in 0..config.loopback.physical_outputs {
        let peak = session
            .server
            .playback(channel)
            .iter()
            .fold(0.0f32, |peak, sample| peak.max(sample.abs()));
        println!("  system:playback_{}: {:.3}", channel + 1, peak);
    }
    if let Some(reason) = stream.abort_reason() {
        println!("Aborted: {reason}");
    }

    stream.close().context("failed to close stream")?;
    Ok(())
}
