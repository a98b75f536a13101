pub mod settings;
pub mod user;

pub use settings::{PATH_PLACEHOLDER, PreviewSettings, Settings, ShellSettings};

use std::path::Path;

use log::{debug, info};

use crate::error::{StopmotionError, StopmotionResult};

/// Values given on the command line; each one replaces the loaded setting.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub program: Option<String>,
    pub prompt_tag: Option<String>,
    pub interval_ms: Option<u64>,
    pub command_timeout_ms: Option<u64>,
}

/// Apply `overrides` on top of `settings`, preferring the overrides
pub fn merge_settings(mut settings: Settings, overrides: SettingsOverrides) -> Settings {
    if let Some(program) = overrides.program {
        settings.shell.program = program;
    }
    if let Some(prompt_tag) = overrides.prompt_tag {
        settings.shell.prompt_tag = prompt_tag;
    }
    if let Some(interval_ms) = overrides.interval_ms {
        settings.preview.interval_ms = interval_ms;
    }
    if let Some(timeout_ms) = overrides.command_timeout_ms {
        settings.shell.command_timeout_ms = Some(timeout_ms);
    }
    settings
}

/// Parse settings from TOML text.
pub fn parse_settings(text: &str) -> StopmotionResult<Settings> {
    Ok(toml::from_str(text)?)
}

/// Load settings from `explicit` if given, else from the user config file,
/// else fall back to defaults.
///
/// An explicit path that cannot be read is an error; a missing user config
/// file is not.
pub fn load_settings(explicit: Option<&Path>) -> StopmotionResult<Settings> {
    if let Some(path) = explicit {
        info!(target: "stopmotion::config", "Loading settings from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        return parse_settings(&text);
    }

    match user::user_config_path() {
        Some(path) if path.is_file() => {
            info!(target: "stopmotion::config", "Loading user settings from {}", path.display());
            let text = std::fs::read_to_string(&path)?;
            parse_settings(&text)
        }
        _ => {
            debug!(target: "stopmotion::config", "No user settings found, using defaults");
            Ok(Settings::default())
        }
    }
}

/// Reject settings that cannot produce a working session.
pub fn validate_settings(settings: &Settings) -> StopmotionResult<()> {
    if settings.shell.program.trim().is_empty() {
        return Err(StopmotionError::config("shell.program must not be empty"));
    }
    if settings.shell.prompt_tag.is_empty() {
        return Err(StopmotionError::config("shell.prompt_tag must not be empty"));
    }
    if settings.shell.bootstrap_timeout_ms == 0 {
        return Err(StopmotionError::config(
            "shell.bootstrap_timeout_ms must be greater than zero",
        ));
    }
    if settings.shell.command_timeout_ms == Some(0) {
        return Err(StopmotionError::config(
            "shell.command_timeout_ms must be greater than zero when set",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn overrides_replace_loaded_values() {
        let merged = merge_settings(
            Settings::default(),
            SettingsOverrides {
                program: Some("fake-gphoto2".to_string()),
                interval_ms: Some(100),
                ..SettingsOverrides::default()
            },
        );
        assert_eq!(merged.shell.program, "fake-gphoto2");
        assert_eq!(merged.preview.interval_ms, 100);
        assert_eq!(merged.shell.prompt_tag, "gphoto2");
    }

    #[test]
    fn empty_overrides_keep_settings() {
        let settings = Settings::default();
        assert_eq!(
            merge_settings(settings.clone(), SettingsOverrides::default()),
            settings
        );
    }

    #[test]
    fn explicit_config_file_is_loaded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[shell]\nprompt_tag = \"camctl\"\n").unwrap();

        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.shell.prompt_tag, "camctl");
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = load_settings(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(StopmotionError::Io(_))));
    }

    #[test]
    fn malformed_config_is_an_error() {
        assert!(matches!(
            parse_settings("[shell\nprogram = 1"),
            Err(StopmotionError::Toml(_))
        ));
    }

    #[test]
    #[serial(xdg_env)]
    fn user_config_is_loaded_from_xdg_config_home() {
        let original_xdg = env::var("XDG_CONFIG_HOME").ok();
        let config_home = TempDir::new().unwrap();
        let dir = config_home.path().join("stopmotion");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("stopmotion.toml"), "[preview]\ninterval_ms = 40\n").unwrap();

        // SAFETY: #[serial(xdg_env)] prevents concurrent modification of XDG_CONFIG_HOME
        unsafe {
            env::set_var("XDG_CONFIG_HOME", config_home.path());
        }

        let settings = load_settings(None);

        // SAFETY: #[serial(xdg_env)] prevents concurrent modification of XDG_CONFIG_HOME
        unsafe {
            match original_xdg {
                Some(val) => env::set_var("XDG_CONFIG_HOME", val),
                None => env::remove_var("XDG_CONFIG_HOME"),
            }
        }

        assert_eq!(settings.unwrap().preview.interval_ms, 40);
    }

    #[test]
    fn default_settings_are_valid() {
        assert!(validate_settings(&Settings::default()).is_ok());
    }

    #[rstest]
    #[case::empty_program(|s: &mut Settings| s.shell.program = " ".to_string())]
    #[case::empty_prompt_tag(|s: &mut Settings| s.shell.prompt_tag.clear())]
    #[case::zero_bootstrap(|s: &mut Settings| s.shell.bootstrap_timeout_ms = 0)]
    #[case::zero_command_timeout(|s: &mut Settings| s.shell.command_timeout_ms = Some(0))]
    fn invalid_settings_are_rejected(#[case] break_it: fn(&mut Settings)) {
        let mut settings = Settings::default();
        break_it(&mut settings);
        assert!(matches!(
            validate_settings(&settings),
            Err(StopmotionError::Config { .. })
        ));
    }
}
