//! In-memory backend for tests: scripted devices, frames, and failures.

use crate::midi::{DeviceInfo, InputPort, MidiBackend, MidiError, OutputPort, RawFrame, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct MockState {
    devices: Mutex<Vec<DeviceInfo>>,
    pending: Mutex<VecDeque<RawFrame>>,
    written: Mutex<Vec<Vec<u8>>>,
    polls: AtomicUsize,
    refreshes: AtomicUsize,
    opened_inputs: AtomicUsize,
    opened_outputs: AtomicUsize,
    output_broken: AtomicBool,
    input_broken: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cloning shares the simulated subsystem, so a test keeps one handle while the
/// router owns another.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<MockState>,
}

impl MockBackend {
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        let backend = Self::default();
        backend.set_devices(devices);
        backend
    }

    /// A backend exposing one duplex controller named `name` at ids 0 (input) and 1 (output)
    pub fn with_controller(name: &str) -> Self {
        Self::new(vec![
            Self::device(0, name, true, false),
            Self::device(1, name, false, false),
        ])
    }

    pub fn device(index: usize, name: &str, is_input: bool, busy: bool) -> DeviceInfo {
        DeviceInfo {
            index,
            interface: "Mock".to_string(),
            name: name.to_string(),
            is_input,
            is_output: !is_input,
            busy,
        }
    }

    pub fn set_devices(&self, devices: Vec<DeviceInfo>) {
        *lock(&self.state.devices) = devices;
    }

    /// Simulates pulling the cable: the device disappears and writes start failing.
    pub fn unplug(&self) {
        self.state.output_broken.store(true, Ordering::SeqCst);
        lock(&self.state.devices).clear();
    }

    /// Brings devices back; ports opened afterwards work again.
    pub fn replug(&self, devices: Vec<DeviceInfo>) {
        self.state.output_broken.store(false, Ordering::SeqCst);
        self.set_devices(devices);
    }

    pub fn break_output(&self) {
        self.state.output_broken.store(true, Ordering::SeqCst);
    }

    /// Makes every input call fail as if the handle had been disposed.
    pub fn break_input(&self) {
        self.state.input_broken.store(true, Ordering::SeqCst);
    }

    pub fn push_frames(&self, frames: &[RawFrame]) {
        lock(&self.state.pending).extend(frames.iter().copied());
    }

    pub fn pending_frames(&self) -> usize {
        lock(&self.state.pending).len()
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.state.written).clone()
    }

    /// Everything written except the liveness probes
    pub fn written_messages(&self) -> Vec<Vec<u8>> {
        self.written()
            .into_iter()
            .filter(|bytes| bytes.as_slice() != [crate::midi::ACTIVE_SENSING])
            .collect()
    }

    pub fn polls(&self) -> usize {
        self.state.polls.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.state.refreshes.load(Ordering::SeqCst)
    }

    pub fn opened_inputs(&self) -> usize {
        self.state.opened_inputs.load(Ordering::SeqCst)
    }

    pub fn opened_outputs(&self) -> usize {
        self.state.opened_outputs.load(Ordering::SeqCst)
    }

    fn endpoint(&self, id: usize, want_input: bool) -> Result<()> {
        let devices = lock(&self.state.devices);
        devices
            .iter()
            .find(|d| d.index == id && if want_input { d.is_input } else { d.is_output })
            .map(|_| ())
            .ok_or_else(|| MidiError::DeviceNotFound(format!("mock endpoint {id}")))
    }
}

impl MidiBackend for MockBackend {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(lock(&self.state.devices).clone())
    }

    fn open_input(&self, id: usize) -> Result<Box<dyn InputPort>> {
        self.endpoint(id, true)?;
        self.state.opened_inputs.fetch_add(1, Ordering::SeqCst);
        self.state.input_broken.store(false, Ordering::SeqCst);
        Ok(Box::new(MockInput {
            state: Arc::clone(&self.state),
        }))
    }

    fn open_output(&self, id: usize) -> Result<Box<dyn OutputPort>> {
        self.endpoint(id, false)?;
        self.state.opened_outputs.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockOutput {
            state: Arc::clone(&self.state),
        }))
    }

    fn refresh(&self) -> Result<()> {
        self.state.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockInput {
    state: Arc<MockState>,
}

impl InputPort for MockInput {
    fn poll(&mut self) -> Result<bool> {
        if self.state.input_broken.load(Ordering::SeqCst) {
            return Err(MidiError::PortClosed);
        }
        self.state.polls.fetch_add(1, Ordering::SeqCst);
        Ok(!lock(&self.state.pending).is_empty())
    }

    fn read(&mut self, max_frames: usize) -> Result<Vec<RawFrame>> {
        if self.state.input_broken.load(Ordering::SeqCst) {
            return Err(MidiError::PortClosed);
        }
        let mut pending = lock(&self.state.pending);
        let take = max_frames.min(pending.len());
        Ok(pending.drain(..take).collect())
    }
}

struct MockOutput {
    state: Arc<MockState>,
}

impl OutputPort for MockOutput {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.state.output_broken.load(Ordering::SeqCst) {
            return Err(MidiError::CommunicationFault(
                "mock device unplugged".to_string(),
            ));
        }
        lock(&self.state.written).push(bytes.to_vec());
        Ok(())
    }
}
