//! Device enumeration and input/output pair resolution

use std::fmt;

use super::engine::{MidiBackend, MidiError, Result};

/// One endpoint reported by the device subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Position in the enumeration that produced this descriptor
    pub index: usize,
    /// Host API the endpoint belongs to (e.g. "ALSA")
    pub interface: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub busy: bool,
}

impl DeviceInfo {
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            interface: self.interface.clone(),
            name: self.name.clone(),
            is_input: self.is_input,
            is_output: self.is_output,
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match (self.is_input, self.is_output) {
            (true, true) => "input/output",
            (true, false) => "input",
            (false, true) => "output",
            (false, false) => "",
        };
        write!(
            f,
            "{}: {} {}, {}, {}",
            self.index,
            self.interface,
            self.name,
            direction,
            if self.busy { "in use" } else { "not in use" }
        )
    }
}

/// Everything that identifies an endpoint across enumerations. The busy flag is
/// deliberately absent: a device can report busy while it is being torn down.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub interface: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
}

/// Input and output endpoint ids of one duplex controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPair {
    pub input: usize,
    pub output: usize,
}

/// Lists all devices. The backend releases its resources before returning.
pub fn list_devices(backend: &dyn MidiBackend) -> Result<Vec<DeviceInfo>> {
    backend.list_devices()
}

/// Given either half of a duplex controller, finds the input and output ids that share its name.
pub fn resolve_pair(backend: &dyn MidiBackend, selected: usize) -> Result<PortPair> {
    let devices = backend.list_devices()?;
    pair_in(&devices, selected)
}

pub(crate) fn pair_in(devices: &[DeviceInfo], selected: usize) -> Result<PortPair> {
    let chosen = devices
        .iter()
        .find(|d| d.index == selected)
        .ok_or_else(|| MidiError::DeviceNotFound(format!("no device with index {selected}")))?;

    let sibling = |want_input: bool| {
        devices
            .iter()
            .find(|d| d.name == chosen.name && if want_input { d.is_input } else { d.is_output })
            .map(|d| d.index)
            .ok_or_else(|| {
                MidiError::DeviceNotFound(format!(
                    "'{}' has no {} endpoint",
                    chosen.name,
                    if want_input { "input" } else { "output" }
                ))
            })
    };

    Ok(PortPair {
        input: sibling(true)?,
        output: sibling(false)?,
    })
}

/// Re-resolves a device after a fresh enumeration, ignoring its busy flag.
pub fn device_index_by_identity(
    backend: &dyn MidiBackend,
    identity: &DeviceIdentity,
) -> Result<usize> {
    let devices = backend.list_devices()?;
    index_in(&devices, identity)
}

pub(crate) fn index_in(devices: &[DeviceInfo], identity: &DeviceIdentity) -> Result<usize> {
    devices
        .iter()
        .find(|d| &d.identity() == identity)
        .map(|d| d.index)
        .ok_or_else(|| MidiError::DeviceNotFound(identity.name.clone()))
}

/// Finds the first device whose name contains `pattern`
pub fn find_by_name(devices: &[DeviceInfo], pattern: &str) -> Result<usize> {
    devices
        .iter()
        .find(|d| d.name.contains(pattern))
        .map(|d| d.index)
        .ok_or_else(|| MidiError::DeviceNotFound(pattern.to_string()))
}
