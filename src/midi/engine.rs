use thiserror::Error;

use super::device::DeviceInfo;

/// MIDI "active sensing", written to the output as a liveness probe
pub const ACTIVE_SENSING: u8 = 0xFE;

/// Error type for MIDI device operations
#[derive(Debug, Error)]
pub enum MidiError {
    /// A device could not be found or resolved
    #[error("MIDI device not found: {0}")]
    DeviceNotFound(String),
    /// Writing to the device failed at the hardware/communication level
    #[error("MIDI communication fault: {0}")]
    CommunicationFault(String),
    /// Opening a port failed
    #[error("MIDI connection error: {0}")]
    Connection(String),
    /// The MIDI subsystem could not be initialised
    #[error("MIDI init error: {0}")]
    Init(String),
    /// The port was already released
    #[error("MIDI port is closed")]
    PortClosed,
    /// A handler registration with out-of-range fields
    #[error("invalid binding: {0}")]
    InvalidBinding(String),
    /// Misuse of the subsystem or another unrecoverable backend failure
    #[error("MIDI subsystem error: {0}")]
    Subsystem(String),
    /// Registration attempted after the router started polling
    #[error("router is already running")]
    AlreadyRunning,
    /// A blocking wait was cancelled by its owner
    #[error("operation cancelled")]
    Cancelled,
}

/// Result type for MIDI operations
pub type Result<T> = std::result::Result<T, MidiError>;

/// One raw message as read from an input port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
    pub timestamp: u64,
}

impl RawFrame {
    pub fn new(status: u8, data1: u8, data2: u8) -> Self {
        Self {
            status,
            data1,
            data2,
            timestamp: 0,
        }
    }

    /// Builds a frame from a variable length message, padding missing data bytes with zero.
    pub fn from_bytes(timestamp: u64, bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;
        Some(Self {
            status,
            data1: bytes.get(1).copied().unwrap_or(0),
            data2: bytes.get(2).copied().unwrap_or(0),
            timestamp,
        })
    }
}

/// The process-wide device subsystem
pub trait MidiBackend: Send + Sync {
    /// Enumerates every input and output endpoint. Indices are only stable within
    /// one enumeration.
    fn list_devices(&self) -> Result<Vec<DeviceInfo>>;

    fn open_input(&self, id: usize) -> Result<Box<dyn InputPort>>;

    fn open_output(&self, id: usize) -> Result<Box<dyn OutputPort>>;

    /// Tears the subsystem down and initialises it again so that it picks up
    /// devices plugged in since the last enumeration.
    fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

/// A readable device endpoint
pub trait InputPort: Send {
    /// Returns true when at least one frame is waiting to be read
    fn poll(&mut self) -> Result<bool>;

    /// Reads at most `max_frames` pending frames without blocking
    fn read(&mut self, max_frames: usize) -> Result<Vec<RawFrame>>;
}

/// A writable device endpoint
pub trait OutputPort: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Writes a single status byte
    fn write_short(&mut self, status: u8) -> Result<()> {
        self.send(&[status])
    }

    /// `channel` is 1..=16 as used by the dispatch table
    fn note_on(&mut self, note: u8, velocity: u8, channel: u8) -> Result<()> {
        let nibble = channel_nibble(channel)?;
        self.send(&[0x90 | nibble, note & 0x7F, velocity & 0x7F])
    }

    fn note_off(&mut self, note: u8, velocity: u8, channel: u8) -> Result<()> {
        let nibble = channel_nibble(channel)?;
        self.send(&[0x80 | nibble, note & 0x7F, velocity & 0x7F])
    }
}

fn channel_nibble(channel: u8) -> Result<u8> {
    match channel {
        1..=16 => Ok(channel - 1),
        _ => Err(MidiError::InvalidBinding(format!(
            "channel {channel} is outside 1..=16"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Vec<Vec<u8>>);

    impl OutputPort for Recorder {
        fn send(&mut self, bytes: &[u8]) -> Result<()> {
            self.0.push(bytes.to_vec());
            Ok(())
        }
    }

    #[test]
    fn test_note_messages_use_one_based_channels() {
        let mut out = Recorder(Vec::new());
        out.note_on(39, 127, 1).unwrap();
        out.note_off(39, 0, 16).unwrap();
        out.write_short(ACTIVE_SENSING).unwrap();
        assert_eq!(out.0, vec![vec![0x90, 39, 127], vec![0x8F, 39, 0], vec![0xFE]]);
    }

    #[test]
    fn test_note_messages_reject_out_of_range_channels() {
        let mut out = Recorder(Vec::new());
        assert!(matches!(
            out.note_on(39, 127, 0),
            Err(MidiError::InvalidBinding(_))
        ));
        assert!(matches!(
            out.note_off(39, 0, 17),
            Err(MidiError::InvalidBinding(_))
        ));
        assert!(out.0.is_empty());
    }

    #[test]
    fn test_raw_frame_pads_short_messages() {
        let frame = RawFrame::from_bytes(7, &[0xC0, 5]).unwrap();
        assert_eq!(frame.status, 0xC0);
        assert_eq!(frame.data1, 5);
        assert_eq!(frame.data2, 0);
        assert_eq!(frame.timestamp, 7);
        assert!(RawFrame::from_bytes(0, &[]).is_none());
    }

    #[test]
    fn test_midi_error_display() {
        assert_eq!(
            MidiError::DeviceNotFound("nanoKONTROL".to_string()).to_string(),
            "MIDI device not found: nanoKONTROL"
        );
        assert_eq!(
            MidiError::CommunicationFault("broken pipe".to_string()).to_string(),
            "MIDI communication fault: broken pipe"
        );
    }
}
