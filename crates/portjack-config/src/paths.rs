//! Platform-specific paths for the configuration file.
//!
//! - **User config**: `~/.config/portjack/` (Linux),
//!   `~/Library/Application Support/portjack/` (macOS), `%APPDATA%\portjack\` (Windows)
//! - **Local override**: `portjack.toml` in the working directory

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Application name used for directory paths.
const APP_NAME: &str = "portjack";

/// File name of the configuration inside the user config directory.
const CONFIG_FILE: &str = "config.toml";

/// File name of a configuration placed in the working directory.
const LOCAL_CONFIG_FILE: &str = "portjack.toml";

/// Returns the user-specific configuration directory.
///
/// Returns a fallback path if the config directory cannot be determined.
pub fn user_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Returns the path `config init` writes to and `find_config` falls back on.
pub fn default_config_path() -> PathBuf {
    user_config_dir().join(CONFIG_FILE)
}

/// Ensures the user configuration directory exists.
///
/// Creates the directory and any parent directories if they don't exist.
pub fn ensure_user_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = user_config_dir();
    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::create_dir(&dir, e))?;
    Ok(dir)
}

/// Locate the configuration file to use.
///
/// Searches in order:
/// 1. `explicit`, when given (returned only if it is a file)
/// 2. `portjack.toml` in the working directory
/// 3. [`default_config_path`]
///
/// An explicit path that does not exist yields `None` rather than falling
/// through to the other locations.
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.is_file().then(|| path.to_path_buf());
    }

    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.is_file() {
        return Some(local);
    }

    let user = default_config_path();
    user.is_file().then_some(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_config_dir_ends_with_app_name() {
        assert!(user_config_dir().ends_with(APP_NAME));
    }

    #[test]
    fn default_config_path_is_inside_user_dir() {
        let path = default_config_path();
        assert_eq!(path.parent(), Some(user_config_dir().as_path()));
        assert!(path.ends_with(CONFIG_FILE));
    }

    #[test]
    fn missing_explicit_path_is_not_found() {
        assert!(find_config(Some(Path::new("/nonexistent/portjack.toml"))).is_none());
    }
}
