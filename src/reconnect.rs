// reconnect.rs

use crate::midi::device::{index_in, pair_in};
use crate::midi::{DeviceIdentity, MidiBackend, MidiError, PortPair, Result};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Waits for a disconnected controller to show up again.
pub struct ReconnectSupervisor {
    backend: Arc<dyn MidiBackend>,
    interval: Duration,
    cancel: Option<Arc<AtomicBool>>,
}

impl ReconnectSupervisor {
    pub fn new(backend: Arc<dyn MidiBackend>, interval: Duration) -> Self {
        Self {
            backend,
            interval,
            cancel: None,
        }
    }

    /// Makes [`await_reconnect`](Self::await_reconnect) give up with
    /// [`MidiError::Cancelled`] once `cancel` is set.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::SeqCst))
    }

    /// Blocks until a device with the same identity is enumerated again, then
    /// returns its fresh port ids. The busy flag is not considered. Without a
    /// cancel flag this waits forever.
    pub fn await_reconnect(&self, identity: &DeviceIdentity) -> Result<PortPair> {
        info!("Waiting for '{}' to reconnect", identity.name);
        let mut attempts: u64 = 0;
        loop {
            if self.cancelled() {
                return Err(MidiError::Cancelled);
            }
            thread::sleep(self.interval);
            attempts += 1;

            if let Err(e) = self.backend.refresh() {
                debug!("Refresh attempt {} failed: {}", attempts, e);
                continue;
            }
            let devices = match self.backend.list_devices() {
                Ok(devices) => devices,
                Err(e) => {
                    debug!("Enumeration attempt {} failed: {}", attempts, e);
                    continue;
                }
            };

            let Ok(index) = index_in(&devices, identity) else {
                continue;
            };
            match pair_in(&devices, index) {
                Ok(ports) => {
                    info!(
                        "'{}' is back after {} attempts (input {}, output {})",
                        identity.name, attempts, ports.input, ports.output
                    );
                    return Ok(ports);
                }
                // the output half may not be enumerated yet
                Err(e) => debug!("'{}' only partially back: {}", identity.name, e),
            }
        }
    }
}
