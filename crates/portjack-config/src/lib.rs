//! Configuration for the portjack backend.
//!
//! A single TOML file describes how the backend connects (client name,
//! auto-connection, stop timeout, xrun limit) and the shape of the loopback
//! server used by the tooling. Core never reads files; this crate turns the
//! file into the plain option structs core takes.
//!
//! # Example
//!
//! ```rust
//! use portjack_config::BackendConfig;
//!
//! let config = BackendConfig::from_toml(
//!     r#"
//!     client_name = "synth"
//!     xrun_limit = 8
//!
//!     [loopback]
//!     buffer_size = 128
//!     "#,
//! )
//! .unwrap();
//!
//! let options = config.backend_options();
//! assert_eq!(options.xrun_limit, Some(8));
//! assert_eq!(config.loopback_settings().buffer_size, 128);
//! assert_eq!(config.registry().unwrap().requested_name().as_ref(), "synth");
//! ```

mod config;
mod error;

/// Platform-specific configuration paths.
pub mod paths;

pub use config::{BackendConfig, LoopbackConfig};
pub use error::ConfigError;
pub use paths::{default_config_path, ensure_user_config_dir, find_config, user_config_dir};
