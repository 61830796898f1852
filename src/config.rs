// config.rs

use crate::actions::Binding;
use config::{Environment, File, FileFormat};
use log::{debug, info};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "MIDI_MACRO";

/// `MIDI_MACRO_` prefix, `__` between nested keys
fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("HOME environment variable not set")]
    NoHome,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    /// Sleep between polls while the device is idle
    pub slow_poll_interval_ms: u64,
    /// Frames read per cycle at most
    pub read_batch: usize,
    pub handler_workers: usize,
    /// Pending handler invocations before new ones are dropped
    pub handler_queue: usize,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            slow_poll_interval_ms: 50,
            read_batch: 10,
            handler_workers: 4,
            handler_queue: 256,
        }
    }
}

impl RouterSettings {
    pub fn slow_poll_interval(&self) -> Duration {
        Duration::from_millis(self.slow_poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub interval_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self { interval_ms: 200 }
    }
}

impl ReconnectSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    /// Player controlled when none is playing
    pub preferred_player: String,
    /// Window in which repeated presses count as one gesture
    pub tap_timeout_ms: u64,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            preferred_player: "spotify".to_string(),
            tap_timeout_ms: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Substring of the controller name to open without prompting
    pub device: Option<String>,
    pub router: RouterSettings,
    pub reconnect: ReconnectSettings,
    pub media: MediaSettings,
    pub log: LogSettings,
    pub bindings: Vec<Binding>,
}

impl Settings {
    /// `$HOME/.config/midi-macro/config.toml`
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        let home = std::env::var("HOME").map_err(|_| SettingsError::NoHome)?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("midi-macro")
            .join("config.toml"))
    }

    /// Loads the optional TOML file at `path` (or the default path) and applies
    /// `MIDI_MACRO_*` environment overrides, e.g. `MIDI_MACRO_ROUTER__READ_BATCH=20`.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };
        debug!("Loading settings from {}", path.display());

        let settings = Self::build(&path, environment())?;

        info!(
            "Loaded settings: {} bindings, device {:?}",
            settings.bindings.len(),
            settings.device
        );
        Ok(settings)
    }

    fn build(path: &Path, environment: Environment) -> Result<Self, SettingsError> {
        Ok(config::Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(environment)
            .build()?
            .try_deserialize()?)
    }

    pub fn from_toml_str(source: &str) -> Result<Self, SettingsError> {
        Ok(config::Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Action;
    use crate::midi::MessageType;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.router.slow_poll_interval(), Duration::from_millis(50));
        assert_eq!(settings.router.read_batch, 10);
        assert_eq!(settings.reconnect.interval(), Duration::from_millis(200));
        assert_eq!(settings.media.tap_timeout_ms, 300);
        assert!(settings.bindings.is_empty());
    }

    #[test]
    fn test_parse_toml() {
        let settings = Settings::from_toml_str(
            r#"
            device = "MPK mini"

            [router]
            slow_poll_interval_ms = 20

            [[bindings]]
            channel = 1
            message = "control-change"
            data1 = 8
            action = { type = "volume", stream = "Spotify" }

            [[bindings]]
            channel = 1
            message = "note-on"
            data1 = 39
            action = { type = "media-taps" }
            "#,
        )
        .unwrap();

        assert_eq!(settings.device.as_deref(), Some("MPK mini"));
        assert_eq!(settings.router.slow_poll_interval_ms, 20);
        assert_eq!(settings.router.read_batch, 10);
        assert_eq!(settings.bindings.len(), 2);
        assert_eq!(settings.bindings[0].message, MessageType::ControlChange);
        assert_eq!(settings.bindings[0].data1, Some(8));
        assert_eq!(
            settings.bindings[0].action,
            Action::Volume {
                stream: "Spotify".to_string()
            }
        );
        assert_eq!(settings.bindings[1].action, Action::MediaTaps);
    }

    #[test]
    fn test_environment_overrides_nested_keys() {
        let vars: config::Map<String, String> = [
            ("MIDI_MACRO_ROUTER__READ_BATCH", "20"),
            ("MIDI_MACRO_DEVICE", "nanoKONTROL"),
            ("OTHER_ROUTER__READ_BATCH", "99"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let settings = Settings::build(
            Path::new("/nonexistent/midi-macro.toml"),
            environment().source(Some(vars)),
        )
        .unwrap();
        assert_eq!(settings.router.read_batch, 20);
        assert_eq!(settings.router.slow_poll_interval_ms, 50);
        assert_eq!(settings.device.as_deref(), Some("nanoKONTROL"));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let settings = Settings::load(Some(Path::new("/nonexistent/midi-macro.toml"))).unwrap();
        assert_eq!(settings.router, RouterSettings::default());
    }
}
