use crate::config::Settings;
use crate::midi::{DeviceInfo, MidiError, Result};
use crate::session::DevicePrompt;
use clap::Parser;
use dialoguer::Select;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// List available MIDI devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Open the controller at this device index instead of prompting
    #[arg(long, value_name = "INDEX")]
    pub device: Option<usize>,

    /// Settings file (defaults to ~/.config/midi-macro/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print every received event
    #[arg(long)]
    pub monitor: bool,

    /// Poll interval while the controller is idle
    #[arg(long, value_name = "MS")]
    pub slow_poll_ms: Option<u64>,
}

impl Args {
    /// Command line values take precedence over the settings file.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(ms) = self.slow_poll_ms {
            settings.router.slow_poll_interval_ms = ms;
        }
    }
}

/// One line per device: `3: ALSA MPK mini, output, not in use`
pub fn format_device_list(devices: &[DeviceInfo]) -> Vec<String> {
    devices.iter().map(ToString::to_string).collect()
}

pub fn validate_device(index: usize, devices: &[DeviceInfo]) -> std::result::Result<(), String> {
    if !devices.iter().any(|d| d.index == index) {
        let mut error_msg = format!("Error: No MIDI device with index {}. Available devices:\n", index);
        for line in format_device_list(devices) {
            error_msg.push_str(&format!("  {}\n", line));
        }
        return Err(error_msg);
    }
    Ok(())
}

/// Interactive device selection on the terminal
pub struct DialoguerPrompt;

impl DevicePrompt for DialoguerPrompt {
    fn select(&self, devices: &[DeviceInfo]) -> Result<usize> {
        if devices.is_empty() {
            return Err(MidiError::DeviceNotFound("no MIDI devices available".to_string()));
        }
        let items = format_device_list(devices);
        let selection = Select::new()
            .with_prompt("Select a MIDI device")
            .items(&items)
            .default(0)
            .interact()
            .map_err(|e| MidiError::Subsystem(format!("device prompt failed: {e}")))?;
        Ok(devices[selection].index)
    }
}
