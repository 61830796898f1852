//! Terminal output for the midi-macro binary
//!
//! This module provides:
//! - An event monitor printing every received message with a timestamp
//! - Session status reporting, with a spinner while the controller is reconnecting
//!
//! Spinners are drawn with the indicatif library.

mod monitor;
mod progress;

pub use monitor::{format_event, format_status, run_monitor, run_status_display};
pub use progress::create_reconnect_spinner;
