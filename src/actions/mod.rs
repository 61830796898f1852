//! Declarative bindings from controller events to desktop actions.
//!
//! A [`Binding`] names a (channel, message, data1?, data2?) key and the [`Action`]
//! to run. [`registrar`] turns a list of bindings into the callback a
//! [`Session`](crate::session::Session) uses to fill each fresh router.

mod mixer;
mod player;
mod tap;

pub use mixer::{AudioMixer, AudioStream, PactlMixer};
pub use player::{choose_player, MediaPlayer, PlayerctlPlayer};
pub use tap::TapDetector;

use crate::dispatch::{handler, HandlerResult};
use crate::midi::MessageType;
use crate::router::{OutputHandle, Router};
use crate::session::Registrar;
use log::{debug, info};
use serde::Deserialize;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("unexpected output from {program}: {reason}")]
    Parse { program: String, reason: String },
}

/// Runs `program` to completion and returns its stdout.
pub(crate) fn run(program: &str, args: &[&str]) -> Result<String, ActionError> {
    debug!("Running {} {:?}", program, args);
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| ActionError::Spawn {
            program: program.to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(ActionError::Failed {
            program: program.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Action {
    /// Set the volume of the stream matching `stream` to data2 / 127
    Volume { stream: String },
    /// Set the volume of the data1-th stream (1-based) among those not matching
    /// `exclude`; out-of-range positions do nothing
    VolumeByIndex {
        #[serde(default)]
        exclude: Vec<String>,
    },
    MuteOutput,
    MuteInput,
    PlayPause,
    Next,
    Previous,
    /// One press: play/pause, two: next, three: previous
    MediaTaps,
    /// Mirror the event to a pad LED: on while data2 > 0
    Led {
        #[serde(default)]
        note: Option<u8>,
    },
    /// Run a program; `{data1}` and `{data2}` in arguments are replaced
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Log,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Binding {
    pub channel: u8,
    pub message: MessageType,
    #[serde(default)]
    pub data1: Option<u8>,
    #[serde(default)]
    pub data2: Option<u8>,
    pub action: Action,
}

/// External services the actions drive
#[derive(Clone)]
pub struct Collaborators {
    pub mixer: Arc<dyn AudioMixer>,
    pub player: Arc<dyn MediaPlayer>,
    pub tap_timeout: Duration,
}

impl Collaborators {
    pub fn new(mixer: Arc<dyn AudioMixer>, player: Arc<dyn MediaPlayer>) -> Self {
        Self {
            mixer,
            player,
            tap_timeout: Duration::from_millis(300),
        }
    }

    pub fn with_tap_timeout(mut self, tap_timeout: Duration) -> Self {
        self.tap_timeout = tap_timeout;
        self
    }
}

/// Builds a registrar that binds every entry of `bindings` on each router it is given.
pub fn registrar(bindings: Vec<Binding>, collaborators: Collaborators) -> Registrar {
    Arc::new(move |router: &mut Router| -> crate::midi::Result<()> {
        for binding in &bindings {
            let output = router.output();
            let runner = ActionRunner::new(binding, &collaborators, output);
            router.register(
                binding.channel,
                binding.message,
                binding.data1,
                binding.data2,
                handler(move |data1, data2| runner.perform(data1, data2)),
            )?;
        }
        info!("Registered {} bindings", bindings.len());
        Ok(())
    })
}

struct ActionRunner {
    channel: u8,
    message: MessageType,
    action: Action,
    collaborators: Collaborators,
    output: OutputHandle,
    taps: Option<TapDetector>,
}

impl ActionRunner {
    fn new(binding: &Binding, collaborators: &Collaborators, output: OutputHandle) -> Self {
        let taps = match binding.action {
            Action::MediaTaps => Some(TapDetector::new(collaborators.tap_timeout, 3)),
            _ => None,
        };
        Self {
            channel: binding.channel,
            message: binding.message,
            action: binding.action.clone(),
            collaborators: collaborators.clone(),
            output,
            taps,
        }
    }

    fn perform(&self, data1: u8, data2: u8) -> HandlerResult {
        let mixer = &self.collaborators.mixer;
        let player = &self.collaborators.player;
        let level = f32::from(data2) / 127.0;

        match &self.action {
            Action::Volume { stream } => match mixer.find_stream(stream)? {
                Some(found) => mixer.set_volume(&found, level)?,
                None => debug!("No stream matching '{}'", stream),
            },
            Action::VolumeByIndex { exclude } => {
                let streams: Vec<AudioStream> = mixer
                    .list_streams()?
                    .into_iter()
                    .filter(|s| !exclude.iter().any(|name| s.matches(name)))
                    .collect();
                match usize::from(data1).checked_sub(1).and_then(|i| streams.get(i)) {
                    Some(stream) => mixer.set_volume(stream, level)?,
                    None => debug!("No stream at position {}", data1),
                }
            }
            Action::MuteOutput => mixer.mute_default_output(None)?,
            Action::MuteInput => mixer.mute_default_input(None)?,
            Action::PlayPause => player.play_pause()?,
            Action::Next => player.next()?,
            Action::Previous => player.previous()?,
            Action::MediaTaps => {
                let taps = self.taps.as_ref().and_then(TapDetector::press);
                match taps {
                    Some(1) => player.play_pause()?,
                    Some(2) => player.next()?,
                    Some(_) => player.previous()?,
                    None => {}
                }
            }
            Action::Led { note } => {
                self.output
                    .note_out(self.channel, note.unwrap_or(data1), data2 > 0)?;
            }
            Action::Command { program, args } => {
                let args: Vec<String> = args
                    .iter()
                    .map(|arg| {
                        arg.replace("{data1}", &data1.to_string())
                            .replace("{data2}", &data2.to_string())
                    })
                    .collect();
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                run(program, &args)?;
            }
            Action::Log => info!(
                "ch{} {} {} {}",
                self.channel, self.message, data1, data2
            ),
        }
        Ok(())
    }
}
