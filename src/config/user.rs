//! User configuration loading for stopmotion.
//!
//! User config location: $XDG_CONFIG_HOME/stopmotion/stopmotion.toml
//! Fallback: the platform config directory (e.g. ~/.config on Linux)

use std::path::PathBuf;

/// Returns the path to the user configuration file.
///
/// The path is determined by:
/// 1. If $XDG_CONFIG_HOME is set: $XDG_CONFIG_HOME/stopmotion/stopmotion.toml
/// 2. Otherwise: <platform config dir>/stopmotion/stopmotion.toml
///
/// Returns None if neither location can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    let base = match std::env::var("XDG_CONFIG_HOME") {
        Ok(xdg_config) if !xdg_config.is_empty() => PathBuf::from(xdg_config),
        _ => dirs::config_dir()?,
    };
    Some(base.join("stopmotion").join("stopmotion.toml"))
}
