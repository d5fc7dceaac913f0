//! CLI command implementations.

pub mod common;
pub mod config;
pub mod ports;
pub mod tone;
