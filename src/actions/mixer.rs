// mixer.rs

use super::{run, ActionError};
use log::debug;
use serde::Deserialize;
use std::collections::HashMap;

/// A playback stream known to the sound server
#[derive(Debug, Clone, PartialEq)]
pub struct AudioStream {
    pub index: u32,
    pub name: String,
    pub binary: Option<String>,
}

impl AudioStream {
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            binary: None,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    /// Case-insensitive match on either the application name or its binary
    pub fn matches(&self, pattern: &str) -> bool {
        let pattern = pattern.to_lowercase();
        self.name.to_lowercase() == pattern
            || self
                .binary
                .as_deref()
                .map_or(false, |b| b.to_lowercase() == pattern)
    }
}

pub trait AudioMixer: Send + Sync {
    fn list_streams(&self) -> Result<Vec<AudioStream>, ActionError>;

    /// `level` is 0.0..=1.0
    fn set_volume(&self, stream: &AudioStream, level: f32) -> Result<(), ActionError>;

    /// `None` toggles
    fn mute_default_output(&self, mute: Option<bool>) -> Result<(), ActionError>;

    /// `None` toggles
    fn mute_default_input(&self, mute: Option<bool>) -> Result<(), ActionError>;

    fn find_stream(&self, pattern: &str) -> Result<Option<AudioStream>, ActionError> {
        Ok(self
            .list_streams()?
            .into_iter()
            .find(|stream| stream.matches(pattern)))
    }
}

/// Drives PulseAudio / PipeWire through `pactl`
#[derive(Debug, Default, Clone)]
pub struct PactlMixer;

const PACTL: &str = "pactl";

#[derive(Deserialize)]
struct SinkInput {
    index: u32,
    #[serde(default)]
    properties: HashMap<String, String>,
}

/// Parses the output of `pactl -f json list sink-inputs`.
pub(crate) fn parse_sink_inputs(json: &str) -> Result<Vec<AudioStream>, ActionError> {
    let inputs: Vec<SinkInput> =
        serde_json::from_str(json).map_err(|e| ActionError::Parse {
            program: PACTL.to_string(),
            reason: e.to_string(),
        })?;

    Ok(inputs
        .into_iter()
        .map(|input| {
            let name = input
                .properties
                .get("application.name")
                .or_else(|| input.properties.get("media.name"))
                .cloned()
                .unwrap_or_default();
            AudioStream {
                index: input.index,
                name,
                binary: input
                    .properties
                    .get("application.process.binary")
                    .cloned(),
            }
        })
        .collect())
}

fn mute_arg(mute: Option<bool>) -> &'static str {
    match mute {
        None => "toggle",
        Some(true) => "1",
        Some(false) => "0",
    }
}

impl AudioMixer for PactlMixer {
    fn list_streams(&self) -> Result<Vec<AudioStream>, ActionError> {
        let json = run(PACTL, &["-f", "json", "list", "sink-inputs"])?;
        parse_sink_inputs(&json)
    }

    fn set_volume(&self, stream: &AudioStream, level: f32) -> Result<(), ActionError> {
        let percent = (level.clamp(0.0, 1.0) * 100.0).round() as u32;
        debug!("Volume of '{}' -> {}%", stream.name, percent);
        run(
            PACTL,
            &[
                "set-sink-input-volume",
                &stream.index.to_string(),
                &format!("{percent}%"),
            ],
        )
        .map(|_| ())
    }

    fn mute_default_output(&self, mute: Option<bool>) -> Result<(), ActionError> {
        run(PACTL, &["set-sink-mute", "@DEFAULT_SINK@", mute_arg(mute)]).map(|_| ())
    }

    fn mute_default_input(&self, mute: Option<bool>) -> Result<(), ActionError> {
        run(PACTL, &["set-source-mute", "@DEFAULT_SOURCE@", mute_arg(mute)]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sink_inputs() {
        let json = r#"[
            {"index": 42, "sink": 1, "properties": {
                "application.name": "Spotify",
                "application.process.binary": "spotify",
                "media.name": "Spotify"}},
            {"index": 57, "properties": {"media.name": "Playback"}},
            {"index": 60}
        ]"#;
        let streams = parse_sink_inputs(json).unwrap();
        assert_eq!(
            streams,
            vec![
                AudioStream::new(42, "Spotify").with_binary("spotify"),
                AudioStream::new(57, "Playback"),
                AudioStream::new(60, ""),
            ]
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_sink_inputs("Sink Input #42"),
            Err(ActionError::Parse { .. })
        ));
    }

    #[test]
    fn test_stream_matching_is_case_insensitive() {
        let stream = AudioStream::new(3, "WEBRTC VoiceEngine").with_binary("Discord");
        assert!(stream.matches("discord"));
        assert!(stream.matches("webrtc voiceengine"));
        assert!(!stream.matches("spotify"));
    }

    #[test]
    fn test_mute_args() {
        assert_eq!(mute_arg(None), "toggle");
        assert_eq!(mute_arg(Some(true)), "1");
        assert_eq!(mute_arg(Some(false)), "0");
    }
}
