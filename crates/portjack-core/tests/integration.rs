//! Integration tests for portjack-core.
//!
//! Every test drives a real backend against an in-process loopback server:
//! stream lifecycle, port naming and rollback, sample flow through the graph,
//! and the asynchronous conditions (xruns, completion, shutdown) that surface
//! on the control thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use portjack_core::{
    AbortReason, Backend, BackendOptions, CallbackFlags, CallbackResult, ChannelParameters,
    ClientNameRegistry, Error, InputBuffer, JackStreamInfo, LoopbackServer, LoopbackSettings,
    OutputBuffer, Port, PortFlags, StreamCallback, StreamParameters, StreamState,
};

fn server(buffer_size: usize) -> LoopbackServer {
    LoopbackServer::new(LoopbackSettings {
        buffer_size,
        ..LoopbackSettings::default()
    })
}

fn backend(server: &LoopbackServer, name: &str, options: BackendOptions) -> Backend {
    let registry = Arc::new(ClientNameRegistry::with_name(name).unwrap());
    Backend::initialize(registry, server, options).unwrap()
}

fn constant(value: f32) -> StreamCallback {
    Box::new(move |ctx| {
        if let Some(out) = ctx.output.as_mut() {
            out.fill(value);
        }
        CallbackResult::Continue
    })
}

fn stereo_out() -> StreamParameters<'static> {
    StreamParameters::new().with_output(ChannelParameters::interleaved(2))
}

fn full_names(ports: &[Port]) -> Vec<String> {
    ports.iter().map(|p| p.full_name().to_string()).collect()
}

// ============================================================================
// 1. End-to-end output
// ============================================================================

#[test]
fn terminal_synth_ports_deliver_constant_output() {
    let server = server(256);
    let backend = backend(&server, "host", BackendOptions::default());

    let extension = JackStreamInfo::new()
        .with_name("synth")
        .with_flags(PortFlags::IS_TERMINAL)
        .encode();
    let params = stereo_out().with_extension(&extension);
    let mut stream = backend.open_stream(&params, constant(0.5)).unwrap();

    let short: Vec<&str> = stream
        .ports()
        .outputs()
        .iter()
        .map(Port::short_name)
        .collect();
    assert_eq!(short, ["synth_1", "synth_2"]);
    for port in stream.ports().iter() {
        assert!(port.flags().contains(PortFlags::IS_TERMINAL));
        assert!(!port.flags().contains(PortFlags::IS_PHYSICAL));
    }
    let outputs = full_names(stream.ports().outputs());

    stream.start().unwrap();
    for cycle in 0..3 {
        assert!(server.run_cycle());
        for name in &outputs {
            let buffer = server.port_buffer(name).unwrap();
            assert_eq!(buffer.len(), 256);
            assert!(
                buffer.iter().all(|&s| s == 0.5),
                "cycle {cycle}: {name} carried something other than 0.5"
            );
        }
    }

    stream.stop().unwrap();
    stream.close().unwrap();
    assert_eq!(server.registered_port_count(), 0);
}

#[test]
fn auto_connected_outputs_reach_playback() {
    let server = server(128);
    let backend = backend(&server, "host", BackendOptions::default());
    let mut stream = backend.open_stream(&stereo_out(), constant(0.25)).unwrap();

    let out_1 = stream.ports().outputs()[0].clone();
    assert_eq!(stream.connections(&out_1), ["system:playback_1"]);

    stream.start().unwrap();
    server.run_cycles(4);
    stream.stop().unwrap();

    for channel in 0..2 {
        let tap = server.playback(channel);
        assert_eq!(tap.len(), 4 * 128);
        assert!(tap.iter().all(|&s| s == 0.25));
    }
}

#[test]
fn capture_passes_through_interleaved_stream() {
    let server = server(256);
    let backend = backend(&server, "fx", BackendOptions::default());

    let left: Vec<f32> = (0..512).map(|i| i as f32 / 512.0).collect();
    let right: Vec<f32> = left.iter().map(|s| -s).collect();
    server.set_capture_signal(0, left.clone());
    server.set_capture_signal(1, right.clone());

    let params = StreamParameters::new()
        .with_input(ChannelParameters::interleaved(2))
        .with_output(ChannelParameters::interleaved(2));
    let mut stream = backend
        .open_stream(
            &params,
            Box::new(|ctx| {
                if let (
                    Some(InputBuffer::Interleaved { samples: input, .. }),
                    Some(OutputBuffer::Interleaved { samples: output, .. }),
                ) =
                    (ctx.input, ctx.output.as_mut())
                {
                    output.copy_from_slice(input);
                }
                CallbackResult::Continue
            }),
        )
        .unwrap();

    stream.start().unwrap();
    assert_eq!(server.run_cycles(2), 2);
    stream.stop().unwrap();

    assert_eq!(server.playback(0), left);
    assert_eq!(server.playback(1), right);
}

#[test]
fn non_interleaved_stream_sees_port_buffers() {
    let server = server(64);
    let backend = backend(&server, "fx", BackendOptions::default());
    server.set_capture_signal(1, vec![0.75; 64]);

    let params = StreamParameters::new()
        .with_input(ChannelParameters::non_interleaved(2))
        .with_output(ChannelParameters::non_interleaved(2));
    let mut stream = backend
        .open_stream(
            &params,
            Box::new(|ctx| {
                if let (Some(InputBuffer::NonInterleaved(input)), Some(OutputBuffer::NonInterleaved(output))) =
                    (ctx.input, ctx.output.as_mut())
                {
                    // Swap channels.
                    output.channel_mut(0).copy_from_slice(input.channel(1));
                    output.channel_mut(1).copy_from_slice(input.channel(0));
                }
                CallbackResult::Continue
            }),
        )
        .unwrap();

    stream.start().unwrap();
    server.run_cycle();
    stream.stop().unwrap();

    assert_eq!(server.playback(0), vec![0.75; 64]);
    assert_eq!(server.playback(1), vec![0.0; 64]);
}

// ============================================================================
// 2. Client names
// ============================================================================

#[test]
fn client_name_requires_connection() {
    let registry = ClientNameRegistry::new();
    registry.set_client_name("early").unwrap();
    assert!(matches!(registry.client_name(), Err(Error::NotInitialized)));
}

#[test]
fn granted_name_is_suffixed_on_clash() {
    let server = server(256);
    let _first = backend(&server, "dup", BackendOptions::default());

    let registry = Arc::new(ClientNameRegistry::with_name("dup").unwrap());
    let second = Backend::initialize(Arc::clone(&registry), &server, BackendOptions::default())
        .unwrap();

    let granted = registry.client_name().unwrap();
    assert!(granted.starts_with("dup"), "granted {granted}");
    assert_ne!(granted, "dup");
    assert_eq!(second.client_name().unwrap(), granted);

    assert!(matches!(
        registry.set_client_name("late"),
        Err(Error::AlreadyInitialized)
    ));
    assert!(matches!(
        Backend::initialize(registry, &server, BackendOptions::default()),
        Err(Error::AlreadyInitialized)
    ));
}

#[test]
fn failed_connection_leaves_name_configurable() {
    let server = server(256);
    server.shutdown("offline");

    let registry = Arc::new(ClientNameRegistry::with_name("retry").unwrap());
    let result = Backend::initialize(Arc::clone(&registry), &server, BackendOptions::default());
    assert!(matches!(result, Err(Error::Connection(_))));
    assert!(!registry.is_initialized());
    registry.set_client_name("other").unwrap();
}

// ============================================================================
// 3. Ports
// ============================================================================

#[test]
fn foreign_extension_block_behaves_like_none() {
    let server = server(256);
    let backend = backend(&server, "host", BackendOptions::default());

    let mut block = JackStreamInfo::new()
        .with_name("synth")
        .with_flags(PortFlags::IS_TERMINAL)
        .encode();
    block[4..8].copy_from_slice(&8u32.to_le_bytes());

    let stream = backend
        .open_stream(&stereo_out().with_extension(&block), constant(0.0))
        .unwrap();
    assert_eq!(
        full_names(stream.ports().outputs()),
        ["host:out_1", "host:out_2"]
    );
    assert!(stream.ports().iter().all(|p| p.flags().is_empty()));
}

#[test]
fn duplex_stream_names_each_direction() {
    let server = server(256);
    let backend = backend(&server, "host", BackendOptions::default());
    let extension = JackStreamInfo::new().with_name("fx").encode();
    let params = StreamParameters::new()
        .with_input(ChannelParameters::interleaved(1))
        .with_output(ChannelParameters::interleaved(2))
        .with_extension(&extension);

    let stream = backend.open_stream(&params, constant(0.0)).unwrap();
    assert_eq!(full_names(stream.ports().inputs()), ["host:fx_in_1"]);
    assert_eq!(
        full_names(stream.ports().outputs()),
        ["host:fx_out_1", "host:fx_out_2"]
    );
}

#[test]
fn failed_port_registration_rolls_back() {
    let server = server(256);
    let backend = backend(&server, "host", BackendOptions::default());
    let params = StreamParameters::new()
        .with_input(ChannelParameters::interleaved(2))
        .with_output(ChannelParameters::interleaved(2));

    server.fail_port_registration_at(3);
    let err = backend.open_stream(&params, constant(0.0)).unwrap_err();
    match err {
        Error::PortCreationFailed { port, .. } => assert_eq!(port, "out_1"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(server.registered_port_count(), 0);

    let stream = backend.open_stream(&params, constant(0.0)).unwrap();
    assert_eq!(stream.ports().len(), 4);
}

#[test]
fn auto_connect_can_be_disabled() {
    let server = server(256);
    let options = BackendOptions {
        auto_connect: false,
        ..BackendOptions::default()
    };
    let backend = backend(&server, "host", options);
    let stream = backend.open_stream(&stereo_out(), constant(0.0)).unwrap();
    for port in stream.ports().iter() {
        assert!(stream.connections(port).is_empty());
    }
}

#[test]
fn extra_outputs_stay_unconnected() {
    let server = server(256);
    let backend = backend(&server, "host", BackendOptions::default());
    let params = StreamParameters::new().with_output(ChannelParameters::interleaved(3));
    let stream = backend.open_stream(&params, constant(0.0)).unwrap();
    let outputs = stream.ports().outputs();
    assert_eq!(stream.connections(&outputs[1]), ["system:playback_2"]);
    assert!(stream.connections(&outputs[2]).is_empty());
}

#[test]
fn invalid_parameters_are_rejected_before_ports_exist() {
    let server = server(256);
    let backend = backend(&server, "host", BackendOptions::default());

    let wrong_rate = stereo_out().with_sample_rate(44100);
    assert!(matches!(
        backend.open_stream(&wrong_rate, constant(0.0)),
        Err(Error::InvalidSampleRate {
            requested: 44100,
            server: 48000
        })
    ));

    let zero = StreamParameters::new().with_output(ChannelParameters::interleaved(0));
    assert!(matches!(
        backend.open_stream(&zero, constant(0.0)),
        Err(Error::InvalidChannelCount(0))
    ));
    assert!(matches!(
        backend.open_stream(&StreamParameters::new(), constant(0.0)),
        Err(Error::InvalidChannelCount(0))
    ));
    assert_eq!(server.registered_port_count(), 0);

    let matching = stereo_out().with_sample_rate(48000);
    assert!(backend.open_stream(&matching, constant(0.0)).is_ok());
}

// ============================================================================
// 4. State machine
// ============================================================================

#[test]
fn lifecycle_transitions() {
    let server = server(256);
    let backend = backend(&server, "host", BackendOptions::default());
    let mut stream = backend.open_stream(&stereo_out(), constant(0.1)).unwrap();

    assert_eq!(stream.state(), StreamState::Open);
    stream.stop().unwrap();
    assert_eq!(stream.state(), StreamState::Open);

    stream.start().unwrap();
    assert!(stream.is_active());
    assert!(matches!(
        stream.start(),
        Err(Error::InvalidState {
            operation: "start",
            state: StreamState::Running
        })
    ));
    assert!(matches!(
        stream.close(),
        Err(Error::InvalidState {
            operation: "close",
            ..
        })
    ));

    stream.stop().unwrap();
    assert_eq!(stream.state(), StreamState::Stopped);
    stream.stop().unwrap();

    stream.start().unwrap();
    server.run_cycle();
    stream.stop().unwrap();

    stream.close().unwrap();
    assert_eq!(stream.state(), StreamState::Closed);
    assert!(stream.ports().is_empty());
    assert!(matches!(
        stream.start(),
        Err(Error::InvalidState {
            state: StreamState::Closed,
            ..
        })
    ));
}

#[test]
fn never_started_stream_can_close() {
    let server = server(256);
    let backend = backend(&server, "host", BackendOptions::default());
    let mut stream = backend.open_stream(&stereo_out(), constant(0.0)).unwrap();
    stream.close().unwrap();
    stream.close().unwrap();
    assert_eq!(server.registered_port_count(), 0);
}

#[test]
fn rejected_activation_can_be_retried() {
    let server = server(256);
    let backend = backend(&server, "host", BackendOptions::default());
    let mut stream = backend.open_stream(&stereo_out(), constant(0.3)).unwrap();

    server.reject_next_activation();
    assert!(matches!(stream.start(), Err(Error::ActivationFailed(_))));
    assert_eq!(stream.state(), StreamState::Open);

    stream.start().unwrap();
    server.run_cycle();
    let name = stream.ports().outputs()[0].full_name().to_string();
    assert!(server.port_buffer(&name).unwrap().iter().all(|&s| s == 0.3));
}

#[test]
fn completion_stops_after_staging_last_output() {
    let server = server(64);
    let backend = backend(&server, "host", BackendOptions::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let mut stream = backend
        .open_stream(
            &stereo_out(),
            Box::new(move |ctx| {
                if let Some(out) = ctx.output.as_mut() {
                    out.fill(0.25);
                }
                if seen.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                    CallbackResult::Complete
                } else {
                    CallbackResult::Continue
                }
            }),
        )
        .unwrap();
    let name = stream.ports().outputs()[0].full_name().to_string();

    stream.start().unwrap();
    server.run_cycles(3);
    assert!(server.port_buffer(&name).unwrap().iter().all(|&s| s == 0.25));

    server.run_cycle();
    assert!(server.port_buffer(&name).unwrap().iter().all(|&s| s == 0.0));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    assert_eq!(stream.state(), StreamState::Stopped);
    assert_eq!(stream.status().frames_processed, 3 * 64);
    assert!(stream.abort_reason().is_none());

    stream.start().unwrap();
    server.run_cycle();
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    stream.stop().unwrap();
}

#[test]
fn callback_abort_only_allows_close() {
    let server = server(64);
    let backend = backend(&server, "host", BackendOptions::default());
    let mut stream = backend
        .open_stream(&stereo_out(), Box::new(|_| CallbackResult::Abort))
        .unwrap();

    stream.start().unwrap();
    server.run_cycle();

    assert_eq!(stream.state(), StreamState::Aborted);
    assert_eq!(stream.abort_reason(), Some(&AbortReason::Callback));
    assert!(matches!(
        stream.start(),
        Err(Error::Aborted(AbortReason::Callback))
    ));
    assert!(matches!(stream.stop(), Err(Error::Aborted(_))));

    stream.close().unwrap();
    assert_eq!(stream.state(), StreamState::Closed);
    assert_eq!(server.registered_port_count(), 0);
}

#[test]
fn dropping_running_stream_releases_ports() {
    let server = server(64);
    let backend = backend(&server, "host", BackendOptions::default());
    let mut stream = backend.open_stream(&stereo_out(), constant(0.5)).unwrap();
    stream.start().unwrap();
    server.run_cycle();

    drop(stream);
    assert_eq!(server.registered_port_count(), 0);
    assert!(server.run_cycle());
}

// ============================================================================
// 5. Real-time conditions
// ============================================================================

#[test]
fn xruns_are_reported_without_stopping() {
    let server = server(64);
    let backend = backend(&server, "host", BackendOptions::default());
    let (flags_tx, flags_rx) = crossbeam_channel::unbounded();
    let mut stream = backend
        .open_stream(
            &stereo_out(),
            Box::new(move |ctx| {
                let _ = flags_tx.send(ctx.flags);
                CallbackResult::Continue
            }),
        )
        .unwrap();

    stream.start().unwrap();
    server.run_cycle();
    server.inject_xrun();
    server.run_cycle();
    server.run_cycle();

    let flags: Vec<CallbackFlags> = flags_rx.try_iter().collect();
    assert_eq!(
        flags,
        [
            CallbackFlags::empty(),
            CallbackFlags::OUTPUT_UNDERFLOW,
            CallbackFlags::empty()
        ]
    );

    assert!(matches!(
        stream.check_xruns(),
        Err(Error::RuntimeXrun { count: 1 })
    ));
    assert!(stream.check_xruns().is_ok());

    server.inject_xrun();
    let status = stream.status();
    assert_eq!(status.state, StreamState::Running);
    assert_eq!(status.xruns, 1);
    assert_eq!(status.total_xruns, 2);
    assert_eq!(stream.status().xruns, 0);
}

#[test]
fn xrun_limit_aborts_stream() {
    let server = server(64);
    let options = BackendOptions {
        xrun_limit: Some(2),
        ..BackendOptions::default()
    };
    let backend = backend(&server, "host", options);
    let mut stream = backend.open_stream(&stereo_out(), constant(0.5)).unwrap();

    stream.start().unwrap();
    server.inject_xrun();
    assert_eq!(stream.state(), StreamState::Running);
    server.inject_xrun();

    assert_eq!(stream.state(), StreamState::Aborted);
    assert_eq!(stream.abort_reason(), Some(&AbortReason::XrunLimit(2)));
}

#[test]
fn sample_rate_change_aborts_stream() {
    let server = server(64);
    let backend = backend(&server, "host", BackendOptions::default());
    let mut stream = backend.open_stream(&stereo_out(), constant(0.5)).unwrap();
    stream.start().unwrap();
    server.run_cycle();

    server.set_sample_rate(44100);
    assert_eq!(stream.state(), StreamState::Aborted);
    assert_eq!(
        stream.abort_reason(),
        Some(&AbortReason::SampleRateChanged {
            from: 48000,
            to: 44100
        })
    );
}

#[test]
fn sample_rate_change_while_stopped_aborts_restart() {
    let server = server(64);
    let backend = backend(&server, "host", BackendOptions::default());
    let mut stream = backend.open_stream(&stereo_out(), constant(0.5)).unwrap();
    stream.start().unwrap();
    server.run_cycle();
    stream.stop().unwrap();

    server.set_sample_rate(44100);
    let expected = AbortReason::SampleRateChanged {
        from: 48000,
        to: 44100,
    };
    assert!(matches!(stream.start(), Err(Error::Aborted(ref r)) if *r == expected));
    assert_eq!(stream.state(), StreamState::Aborted);
    assert_eq!(stream.abort_reason(), Some(&expected));
    assert_eq!(stream.info().sample_rate, 48000);
    assert!(matches!(stream.start(), Err(Error::Aborted(_))));

    stream.close().unwrap();
    assert_eq!(server.registered_port_count(), 0);
}

#[test]
fn sample_rate_change_before_first_start_aborts() {
    let server = server(64);
    let backend = backend(&server, "host", BackendOptions::default());
    let params = stereo_out().with_sample_rate(48000);
    let mut stream = backend.open_stream(&params, constant(0.5)).unwrap();

    server.set_sample_rate(44100);
    assert!(matches!(stream.start(), Err(Error::Aborted(_))));
    assert_eq!(stream.state(), StreamState::Aborted);
    server.run_cycle();
    assert_eq!(stream.status().frames_processed, 0);
}

#[test]
fn server_shutdown_aborts_without_blocking() {
    let server = server(64);
    let backend = backend(&server, "host", BackendOptions::default());
    let mut stream = backend.open_stream(&stereo_out(), constant(0.5)).unwrap();
    stream.start().unwrap();
    server.run_cycle();

    server.shutdown("daemon exited");
    assert!(matches!(stream.stop(), Err(Error::Aborted(_))));
    assert_eq!(
        stream.abort_reason(),
        Some(&AbortReason::ServerShutdown("daemon exited".to_string()))
    );
    stream.close().unwrap();
    assert_eq!(stream.state(), StreamState::Closed);
    assert_eq!(server.registered_port_count(), 0);
}

#[test]
fn buffer_size_change_is_followed_per_cycle() {
    let server = server(256);
    let backend = backend(&server, "host", BackendOptions::default());
    let (frames_tx, frames_rx) = crossbeam_channel::unbounded();
    let mut stream = backend
        .open_stream(
            &stereo_out(),
            Box::new(move |ctx| {
                let _ = frames_tx.send(ctx.frames);
                if let Some(out) = ctx.output.as_mut() {
                    out.fill(0.5);
                }
                CallbackResult::Continue
            }),
        )
        .unwrap();
    let name = stream.ports().outputs()[1].full_name().to_string();

    stream.start().unwrap();
    server.run_cycle();
    server.set_buffer_size(512);
    server.run_cycle();
    server.set_buffer_size(128);
    server.run_cycle();

    let frames: Vec<usize> = frames_rx.try_iter().collect();
    assert_eq!(frames, [256, 512, 128]);
    assert_eq!(server.port_buffer(&name).unwrap(), vec![0.5; 128]);

    let status = stream.status();
    assert_eq!(status.buffer_size, 128);
    assert_eq!(status.reallocations, 0);
    assert_eq!(status.frames_processed, 256 + 512 + 128);

    let info = stream.info();
    assert_eq!(info.input_latency, 0.0);
    assert!((info.output_latency - 128.0 / 48000.0).abs() < 1e-12);
}

#[test]
fn stop_gives_up_on_unresponsive_server() {
    let server = server(64);
    let options = BackendOptions {
        stop_timeout: Duration::from_millis(20),
        ..BackendOptions::default()
    };
    let backend = backend(&server, "host", options);
    let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
    let mut stream = backend
        .open_stream(
            &stereo_out(),
            Box::new(move |_| {
                let _ = entered_tx.try_send(());
                std::thread::sleep(Duration::from_millis(300));
                CallbackResult::Continue
            }),
        )
        .unwrap();
    stream.start().unwrap();

    let cycle = {
        let server = server.clone();
        std::thread::spawn(move || server.run_cycle())
    };
    entered_rx.recv().unwrap();

    assert!(matches!(stream.stop(), Err(Error::DeactivationTimeout(_))));
    assert_eq!(stream.state(), StreamState::Aborted);
    assert_eq!(
        stream.abort_reason(),
        Some(&AbortReason::DeactivationTimeout)
    );

    assert!(cycle.join().unwrap());
    stream.close().unwrap();
}

#[test]
fn clock_driven_stream_processes_frames() {
    let server = server(64);
    let backend = backend(&server, "host", BackendOptions::default());
    let mut stream = backend.open_stream(&stereo_out(), constant(0.1)).unwrap();

    stream.start().unwrap();
    let clock = server.start_clock();
    std::thread::sleep(Duration::from_millis(50));
    stream.stop().unwrap();
    let cycles = clock.stop();

    let status = stream.status();
    assert!(cycles > 0);
    assert!(status.frames_processed > 0);
    assert_eq!(status.frames_processed % 64, 0);
    assert!(status.cpu_load >= 0.0);
}
