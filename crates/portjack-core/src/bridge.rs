//! Conversion between the server's per-port buffers and the callback's layout.
//!
//! The server delivers one buffer per port (non-interleaved). A stream opened
//! with [`SampleLayout::NonInterleaved`] hands those buffers straight to the
//! callback; no samples are copied. A stream opened with
//! [`SampleLayout::Interleaved`] gets a staging buffer of `frames * channels`
//! samples, `[L0, R0, L1, R1, ...]` for stereo.
//!
//! Samples are exchanged as `f32` in `[-1, 1]` and copied bit for bit. Format
//! conversion is left to the layer above.
//!
//! ## Cycle length
//!
//! The number of frames is taken from each cycle, never cached. Staging is
//! sized ahead of time through [`InputStage::reserve`] /
//! [`OutputStage::reserve`], which the stream calls from the server's
//! buffer-size notification. Should a cycle still arrive longer than the
//! reservation, staging grows on the spot and the growth is counted in
//! `reallocations()`. Only the first `channels * frames` staging samples are
//! ever read or written.

use crate::server::{Planar, PlanarMut};

/// How a direction's samples are laid out for the stream callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleLayout {
    /// One buffer, channels interleaved frame by frame.
    #[default]
    Interleaved,
    /// One buffer per channel.
    NonInterleaved,
}

/// Channel count and layout of one stream direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelParameters {
    /// Number of channels (ports).
    pub channels: usize,
    /// Sample layout presented to the callback.
    pub layout: SampleLayout,
}

impl ChannelParameters {
    /// Interleaved channels.
    pub fn interleaved(channels: usize) -> Self {
        Self {
            channels,
            layout: SampleLayout::Interleaved,
        }
    }

    /// One buffer per channel.
    pub fn non_interleaved(channels: usize) -> Self {
        Self {
            channels,
            layout: SampleLayout::NonInterleaved,
        }
    }
}

/// Input samples as presented to the callback.
#[derive(Debug, Clone, Copy)]
pub enum InputBuffer<'a> {
    /// `frames * channels` interleaved samples.
    Interleaved {
        /// Samples, frame by frame.
        samples: &'a [f32],
        /// Samples per frame.
        channels: usize,
    },
    /// The server's port buffers.
    NonInterleaved(Planar<'a>),
}

impl InputBuffer<'_> {
    /// Number of channels.
    pub fn channels(&self) -> usize {
        match self {
            Self::Interleaved { channels, .. } => *channels,
            Self::NonInterleaved(planar) => planar.channels(),
        }
    }

    /// Sample of `channel` at `frame`.
    ///
    /// # Panics
    ///
    /// Panics if either index is out of range.
    pub fn sample(&self, channel: usize, frame: usize) -> f32 {
        match self {
            Self::Interleaved { samples, channels } => {
                assert!(channel < *channels, "channel {channel} out of range");
                samples[frame * channels + channel]
            }
            Self::NonInterleaved(planar) => planar.channel(channel)[frame],
        }
    }
}

/// Output buffers as presented to the callback. Zeroed at the start of every
/// cycle.
#[derive(Debug)]
pub enum OutputBuffer<'a> {
    /// `frames * channels` interleaved samples.
    Interleaved {
        /// Samples, frame by frame.
        samples: &'a mut [f32],
        /// Samples per frame.
        channels: usize,
    },
    /// The server's port buffers.
    NonInterleaved(PlanarMut<'a>),
}

impl OutputBuffer<'_> {
    /// Number of channels.
    pub fn channels(&self) -> usize {
        match self {
            Self::Interleaved { channels, .. } => *channels,
            Self::NonInterleaved(planar) => planar.channels(),
        }
    }

    /// Write `value` to every sample of every channel.
    pub fn fill(&mut self, value: f32) {
        match self {
            Self::Interleaved { samples, .. } => samples.fill(value),
            Self::NonInterleaved(planar) => planar.iter_mut().for_each(|c| c.fill(value)),
        }
    }

    /// Write one sample.
    ///
    /// # Panics
    ///
    /// Panics if either index is out of range.
    pub fn set(&mut self, channel: usize, frame: usize, value: f32) {
        match self {
            Self::Interleaved { samples, channels } => {
                assert!(channel < *channels, "channel {channel} out of range");
                samples[frame * *channels + channel] = value;
            }
            Self::NonInterleaved(planar) => planar.channel_mut(channel)[frame] = value,
        }
    }
}

/// Staging for the input direction of a stream.
#[derive(Debug)]
pub struct InputStage {
    params: ChannelParameters,
    staging: Vec<f32>,
    reallocations: u64,
}

impl InputStage {
    /// Create a stage with room for `frames` frames.
    pub fn new(params: ChannelParameters, frames: usize) -> Self {
        let mut stage = Self {
            params,
            staging: Vec::new(),
            reallocations: 0,
        };
        stage.reserve(frames);
        stage
    }

    /// Make room for cycles of up to `frames` frames. Not real-time safe.
    pub fn reserve(&mut self, frames: usize) {
        reserve_staging(&mut self.staging, self.params, frames);
    }

    /// Channel count and layout.
    pub fn params(&self) -> ChannelParameters {
        self.params
    }

    /// Times staging had to grow during a cycle.
    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }

    /// Present the server's input buffers to the callback.
    pub fn stage_input<'a>(&'a mut self, server: Planar<'a>) -> InputBuffer<'a> {
        match self.params.layout {
            SampleLayout::NonInterleaved => InputBuffer::NonInterleaved(server),
            SampleLayout::Interleaved => {
                let channels = self.params.channels;
                let needed = channels * server.frames();
                if grow_staging(&mut self.staging, needed) {
                    self.reallocations += 1;
                }
                let staging = &mut self.staging[..needed];
                for (channel, samples) in server.iter().enumerate().take(channels) {
                    for (frame, &sample) in samples.iter().enumerate() {
                        staging[frame * channels + channel] = sample;
                    }
                }
                InputBuffer::Interleaved {
                    samples: staging,
                    channels,
                }
            }
        }
    }
}

/// Staging for the output direction of a stream.
#[derive(Debug)]
pub struct OutputStage {
    params: ChannelParameters,
    staging: Vec<f32>,
    reallocations: u64,
}

impl OutputStage {
    /// Create a stage with room for `frames` frames.
    pub fn new(params: ChannelParameters, frames: usize) -> Self {
        let mut stage = Self {
            params,
            staging: Vec::new(),
            reallocations: 0,
        };
        stage.reserve(frames);
        stage
    }

    /// Make room for cycles of up to `frames` frames. Not real-time safe.
    pub fn reserve(&mut self, frames: usize) {
        reserve_staging(&mut self.staging, self.params, frames);
    }

    /// Channel count and layout.
    pub fn params(&self) -> ChannelParameters {
        self.params
    }

    /// Times staging had to grow during a cycle.
    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }

    /// The zeroed buffer the callback writes this cycle's output into.
    pub fn output_buffer<'a>(&'a mut self, mut server: PlanarMut<'a>) -> OutputBuffer<'a> {
        match self.params.layout {
            SampleLayout::NonInterleaved => {
                server.fill_silence();
                OutputBuffer::NonInterleaved(server)
            }
            SampleLayout::Interleaved => {
                let channels = self.params.channels;
                let needed = channels * server.frames();
                if grow_staging(&mut self.staging, needed) {
                    self.reallocations += 1;
                }
                let staging = &mut self.staging[..needed];
                staging.fill(0.0);
                OutputBuffer::Interleaved {
                    samples: staging,
                    channels,
                }
            }
        }
    }

    /// Move what the callback wrote into the server's output buffers.
    ///
    /// Must follow [`output_buffer`](Self::output_buffer) for the same cycle.
    pub fn stage_output(&mut self, mut server: PlanarMut<'_>) {
        if self.params.layout == SampleLayout::NonInterleaved {
            return;
        }

        let channels = self.params.channels;
        let needed = channels * server.frames();
        let Some(staging) = self.staging.get(..needed) else {
            server.fill_silence();
            return;
        };
        for (channel, samples) in server.iter_mut().enumerate().take(channels) {
            for (frame, sample) in samples.iter_mut().enumerate() {
                *sample = staging[frame * channels + channel];
            }
        }
    }

    /// Write silence to the server's output buffers.
    pub fn silence(&self, mut server: PlanarMut<'_>) {
        server.fill_silence();
    }
}

/// Input and output staging of one stream.
#[derive(Debug, Default)]
pub struct BufferBridge {
    input: Option<InputStage>,
    output: Option<OutputStage>,
}

impl BufferBridge {
    /// Create staging for the given directions, sized for `frames`.
    pub fn new(
        input: Option<ChannelParameters>,
        output: Option<ChannelParameters>,
        frames: usize,
    ) -> Self {
        Self {
            input: input.map(|params| InputStage::new(params, frames)),
            output: output.map(|params| OutputStage::new(params, frames)),
        }
    }

    /// Resize staging for a new cycle length. Not real-time safe.
    pub fn reserve(&mut self, frames: usize) {
        if let Some(input) = &mut self.input {
            input.reserve(frames);
        }
        if let Some(output) = &mut self.output {
            output.reserve(frames);
        }
    }

    /// Times staging had to grow during a cycle, both directions.
    pub fn reallocations(&self) -> u64 {
        self.input.as_ref().map_or(0, InputStage::reallocations)
            + self.output.as_ref().map_or(0, OutputStage::reallocations)
    }

    /// Both stages, borrowed independently.
    pub fn stages_mut(&mut self) -> (Option<&mut InputStage>, Option<&mut OutputStage>) {
        (self.input.as_mut(), self.output.as_mut())
    }
}

fn reserve_staging(staging: &mut Vec<f32>, params: ChannelParameters, frames: usize) {
    if params.layout == SampleLayout::Interleaved {
        let needed = params.channels * frames;
        if staging.len() < needed {
            staging.resize(needed, 0.0);
        }
    }
}

// Only reached when a cycle outruns the last reservation.
fn grow_staging(staging: &mut Vec<f32>, needed: usize) -> bool {
    if staging.len() >= needed {
        return false;
    }
    staging.resize(needed, 0.0);
    true
}
