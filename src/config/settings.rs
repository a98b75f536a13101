use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

/// Placeholder in `ShellSettings::args` replaced by the session key.
pub const PATH_PLACEHOLDER: &str = "{path}";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ShellSettings {
    /// Executable to start for every session
    pub program: String,
    /// Arguments; `{path}` is replaced by the session key
    pub args: Vec<String>,
    /// Tool name at the start of the idle prompt
    pub prompt_tag: String,
    /// Extra environment, e.g. a fixed locale for parseable output
    pub env: BTreeMap<String, String>,
    pub bootstrap_timeout_ms: u64,
    /// No value means commands wait for the prompt indefinitely
    pub command_timeout_ms: Option<u64>,
    pub shutdown_timeout_ms: u64,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            program: "gphoto2".to_string(),
            args: vec![
                "--shell".to_string(),
                "--force-overwrite".to_string(),
                "--filename".to_string(),
                PATH_PLACEHOLDER.to_string(),
            ],
            prompt_tag: "gphoto2".to_string(),
            env: BTreeMap::from([("LANG".to_string(), "C".to_string())]),
            bootstrap_timeout_ms: 3000,
            command_timeout_ms: None,
            shutdown_timeout_ms: 5000,
        }
    }
}

impl ShellSettings {
    /// Arguments for the session identified by `key`.
    pub fn args_for(&self, key: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(PATH_PLACEHOLDER, key))
            .collect()
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_millis(self.bootstrap_timeout_ms)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PreviewSettings {
    /// Command sent on every preview iteration
    pub preview_command: String,
    /// Command sent for a full capture
    pub capture_command: String,
    /// Minimum time between the starts of two preview iterations
    pub interval_ms: u64,
    /// Prefix the tool puts on preview files it writes
    pub thumbnail_prefix: String,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            preview_command: "capture-preview".to_string(),
            capture_command: "capture-image-and-download".to_string(),
            interval_ms: 250,
            thumbnail_prefix: "thumb_".to_string(),
        }
    }
}

impl PreviewSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub shell: ShellSettings,
    pub preview: PreviewSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_launch_gphoto2_shell() {
        let settings = ShellSettings::default();
        assert_eq!(settings.program, "gphoto2");
        assert_eq!(
            settings.args_for("/tmp/frame.jpg"),
            vec!["--shell", "--force-overwrite", "--filename", "/tmp/frame.jpg"]
        );
        assert_eq!(settings.env.get("LANG").map(String::as_str), Some("C"));
        assert_eq!(settings.bootstrap_timeout(), Duration::from_secs(3));
        assert_eq!(settings.command_timeout(), None);
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [shell]
            program = "/opt/gphoto2/bin/gphoto2"
            command_timeout_ms = 10000

            [preview]
            interval_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(settings.shell.program, "/opt/gphoto2/bin/gphoto2");
        assert_eq!(settings.shell.prompt_tag, "gphoto2");
        assert_eq!(
            settings.shell.command_timeout(),
            Some(Duration::from_secs(10))
        );
        assert_eq!(settings.preview.interval(), Duration::from_millis(500));
        assert_eq!(settings.preview.preview_command, "capture-preview");
    }

    #[test]
    fn placeholder_may_be_embedded_in_an_argument() {
        let settings = ShellSettings {
            args: vec!["--filename={path}".to_string()],
            ..ShellSettings::default()
        };
        assert_eq!(settings.args_for("out.jpg"), vec!["--filename=out.jpg"]);
    }
}
