//! Backend-specific stream parameters passed through the portable API.
//!
//! The portable stream layer carries host-API-specific parameters as an opaque,
//! self-describing block. This backend understands blocks tagged
//! [`HostApiTypeId::Jack`] with the following little-endian layout:
//!
//! ```text
//! offset  size  field
//! 0       4     size       total bytes covered by this block (>= 24)
//! 4       4     host_api   HostApiTypeId, must be Jack (12)
//! 8       4     version    STREAM_INFO_VERSION (1)
//! 12      8     flags      PortFlags bits applied to every port of the stream
//! 20      4     name_len   byte length of the port name base, 0 = none
//! 24      n     name       UTF-8 port name base
//! ```
//!
//! Header fields are checked before anything else is read. A block that is
//! truncated, has an unsupported version or belongs to another host API is
//! treated exactly as if no block had been given; this protects against a
//! caller handing us another backend's parameters by mistake. Bytes past the
//! version 1 fields (but within `size`) are ignored so that later versions with
//! appended fields stay readable.
//!
//! ```rust
//! use portjack_core::{JackStreamInfo, PortFlags, extension};
//!
//! let block = JackStreamInfo::new()
//!     .with_name("synth")
//!     .with_flags(PortFlags::IS_TERMINAL)
//!     .encode();
//!
//! let info = extension::decode(Some(&block));
//! assert_eq!(info.name.as_deref(), Some("synth"));
//! assert_eq!(info.flags, PortFlags::IS_TERMINAL);
//! ```

use crate::error::{Error, Result};
use crate::ports::PortFlags;

/// Current layout version of the stream info block.
pub const STREAM_INFO_VERSION: u32 = 1;

/// Size in bytes of the fixed part of a version 1 block.
pub const STREAM_INFO_MIN_SIZE: usize = 24;

const HEADER_SIZE: usize = 12;

/// Identifiers of the host APIs known to the portable layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum HostApiTypeId {
    InDevelopment = 0,
    DirectSound = 1,
    Mme = 2,
    Asio = 3,
    SoundManager = 4,
    CoreAudio = 5,
    Oss = 7,
    Alsa = 8,
    Al = 9,
    BeOs = 10,
    Wdmks = 11,
    Jack = 12,
    Wasapi = 13,
    AudioScienceHpi = 14,
    AudioIo = 15,
    PulseAudio = 16,
    Sndio = 17,
}

impl TryFrom<u32> for HostApiTypeId {
    type Error = u32;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::InDevelopment,
            1 => Self::DirectSound,
            2 => Self::Mme,
            3 => Self::Asio,
            4 => Self::SoundManager,
            5 => Self::CoreAudio,
            7 => Self::Oss,
            8 => Self::Alsa,
            9 => Self::Al,
            10 => Self::BeOs,
            11 => Self::Wdmks,
            12 => Self::Jack,
            13 => Self::Wasapi,
            14 => Self::AudioScienceHpi,
            15 => Self::AudioIo,
            16 => Self::PulseAudio,
            17 => Self::Sndio,
            other => return Err(other),
        })
    }
}

/// Decoded backend-specific stream parameters.
///
/// Unset fields fall back to backend defaults when the stream is opened: no
/// name means generated `in_N`/`out_N` port names, empty flags mean plain ports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JackStreamInfo {
    /// Base for the stream's port names.
    pub name: Option<String>,
    /// Capability flags attached to every port of the stream.
    pub flags: PortFlags,
}

impl JackStreamInfo {
    /// Parameters with every field unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `name` as the port name base.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Tag the stream's ports with `flags`.
    pub fn with_flags(mut self, flags: PortFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Serialize into the opaque block understood by [`decode`].
    pub fn encode(&self) -> Vec<u8> {
        let name = self.name.as_deref().unwrap_or("");
        let size = STREAM_INFO_MIN_SIZE + name.len();

        let mut block = Vec::with_capacity(size);
        block.extend_from_slice(&(size as u32).to_le_bytes());
        block.extend_from_slice(&(HostApiTypeId::Jack as u32).to_le_bytes());
        block.extend_from_slice(&STREAM_INFO_VERSION.to_le_bytes());
        block.extend_from_slice(&self.flags.bits().to_le_bytes());
        block.extend_from_slice(&(name.len() as u32).to_le_bytes());
        block.extend_from_slice(name.as_bytes());
        block
    }
}

/// Decode an optional extension block, falling back to defaults.
///
/// Never fails: unusable blocks are logged and ignored.
pub fn decode(block: Option<&[u8]>) -> JackStreamInfo {
    let Some(block) = block else {
        return JackStreamInfo::default();
    };

    match try_decode(block) {
        Ok(info) => {
            tracing::debug!(name = ?info.name, flags = ?info.flags, "stream extension decoded");
            info
        }
        Err(err) => {
            tracing::warn!(error = %err, "ignoring stream extension block");
            JackStreamInfo::default()
        }
    }
}

/// Decode an extension block, reporting why it is unusable.
pub fn try_decode(block: &[u8]) -> Result<JackStreamInfo> {
    if block.len() < HEADER_SIZE {
        return Err(invalid(format!(
            "{} bytes is too short for the block header",
            block.len()
        )));
    }

    let size = read_u32(block, 0).unwrap_or(0) as usize;
    let host_api = read_u32(block, 4).unwrap_or(0);
    let version = read_u32(block, 8).unwrap_or(0);

    if size < STREAM_INFO_MIN_SIZE {
        return Err(invalid(format!(
            "declared size {} is below the minimum of {}",
            size, STREAM_INFO_MIN_SIZE
        )));
    }
    if size > block.len() {
        return Err(invalid(format!(
            "declared size {} exceeds the {} bytes supplied",
            size,
            block.len()
        )));
    }
    if version != STREAM_INFO_VERSION {
        return Err(invalid(format!("unsupported version {}", version)));
    }
    match HostApiTypeId::try_from(host_api) {
        Ok(HostApiTypeId::Jack) => {}
        Ok(other) => return Err(invalid(format!("block belongs to host API {:?}", other))),
        Err(raw) => return Err(invalid(format!("unknown host API id {}", raw))),
    }

    // Only the declared extent is trusted from here on.
    let block = &block[..size];
    let flags = PortFlags::from_bits_truncate(read_u64(block, 12).unwrap_or(0));
    let name_len = read_u32(block, 20).unwrap_or(0) as usize;

    let name = if name_len == 0 {
        None
    } else {
        let bytes = STREAM_INFO_MIN_SIZE
            .checked_add(name_len)
            .and_then(|end| block.get(STREAM_INFO_MIN_SIZE..end))
            .ok_or_else(|| {
                invalid(format!(
                    "name of {} bytes overruns the declared size {}",
                    name_len, size
                ))
            })?;
        let name = std::str::from_utf8(bytes)
            .map_err(|e| invalid(format!("name is not valid UTF-8: {}", e)))?;
        Some(name.to_string())
    };

    Ok(JackStreamInfo { name, flags })
}

fn invalid(reason: String) -> Error {
    Error::Configuration(reason)
}

fn read_u32(block: &[u8], at: usize) -> Option<u32> {
    let bytes = block.get(at..at + 4)?;
    bytes.try_into().ok().map(u32::from_le_bytes)
}

fn read_u64(block: &[u8], at: usize) -> Option<u64> {
    let bytes = block.get(at..at + 8)?;
    bytes.try_into().ok().map(u64::from_le_bytes)
}
