//! MIDI device layer for midi-macro
//!
//! This module provides:
//! - The device subsystem seam ([`MidiBackend`], [`InputPort`], [`OutputPort`]) and its error type
//! - Device enumeration and duplex pair resolution
//! - Decoding of raw channel messages into [`MidiEvent`]s
//!
//! The concrete backends are:
//! - [`MidirBackend`] for real devices via midir
//! - [`MockBackend`] for tests
//!
pub mod device;
mod engine;
mod event;
pub mod midir_engine;
pub mod mock_engine;

// Re-export the subsystem seam
pub use engine::{
    InputPort, MidiBackend, MidiError, OutputPort, RawFrame, Result, ACTIVE_SENSING,
};

// Re-export device enumeration
pub use device::{
    device_index_by_identity, find_by_name, list_devices, resolve_pair, DeviceIdentity,
    DeviceInfo, PortPair,
};

// Re-export decoding
pub use event::{decode, DecodeError, MessageType, MidiEvent, STATUS_MAX, STATUS_MIN};

// Re-export concrete implementations
pub use midir_engine::MidirBackend;
pub use mock_engine::MockBackend;

// Set default backend type
pub type DefaultMidiBackend = MidirBackend;
