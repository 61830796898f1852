use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::engine::RawFrame;

/// Lowest status byte the router decodes (note-off, channel 1)
pub const STATUS_MIN: u8 = 0x80;
/// Highest status byte the router decodes
pub const STATUS_MAX: u8 = 0xEE;

/// Channel voice message kinds, in status-nibble order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    NoteOff,
    NoteOn,
    NoteAftertouch,
    ControlChange,
    ProgramChange,
    ChannelAftertouch,
    PitchWheel,
}

impl MessageType {
    pub const ALL: [MessageType; 7] = [
        MessageType::NoteOff,
        MessageType::NoteOn,
        MessageType::NoteAftertouch,
        MessageType::ControlChange,
        MessageType::ProgramChange,
        MessageType::ChannelAftertouch,
        MessageType::PitchWheel,
    ];

    /// Position of this kind in [`MessageType::ALL`]; equals the status high nibble minus 8.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::NoteOff => "note-off",
            MessageType::NoteOn => "note-on",
            MessageType::NoteAftertouch => "note-aftertouch",
            MessageType::ControlChange => "control-change",
            MessageType::ProgramChange => "program-change",
            MessageType::ChannelAftertouch => "channel-aftertouch",
            MessageType::PitchWheel => "pitch-wheel",
        };
        f.write_str(name)
    }
}

/// A decoded channel message. `channel` is 1..=16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub channel: u8,
    pub kind: MessageType,
    pub data1: u8,
    pub data2: u8,
}

impl fmt::Display for MidiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ch{:<2} {:<18} {:>3} {:>3}",
            self.channel, self.kind, self.data1, self.data2
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("status byte {0:#04x} outside the decodable range")]
    InvalidStatus(u8),
}

/// Decodes a raw frame. Frames whose status byte is outside
/// [`STATUS_MIN`]..=[`STATUS_MAX`] are rejected so the caller can skip them.
pub fn decode(frame: &RawFrame) -> Result<MidiEvent, DecodeError> {
    let status = frame.status;
    if !(STATUS_MIN..=STATUS_MAX).contains(&status) {
        return Err(DecodeError::InvalidStatus(status));
    }

    let kind = MessageType::from_index(usize::from((status >> 4) - 8))
        .ok_or(DecodeError::InvalidStatus(status))?;

    Ok(MidiEvent {
        channel: (status & 0x0F) + 1,
        kind,
        data1: frame.data1 & 0x7F,
        data2: frame.data2 & 0x7F,
    })
}
