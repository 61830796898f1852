//! Owns one opened device and the background event loop reading it.

use crate::config::RouterSettings;
use crate::dispatch::{DispatchTable, Handler};
use crate::event_loop::{Cadence, EventLoop, LoopExit};
use crate::midi::{
    device, DeviceIdentity, InputPort, MessageType, MidiBackend, MidiError, MidiEvent, OutputPort,
    PortPair, Result, ACTIVE_SENSING,
};
use crate::scheduler::HandlerPool;
use crossbeam::channel::{bounded, Receiver, Sender};
use log::{error, info};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

/// Shared access to the output endpoint. Clones stay valid until the router
/// closes; after that every write fails with [`MidiError::PortClosed`].
#[derive(Clone)]
pub struct OutputHandle {
    port: Arc<Mutex<Option<Box<dyn OutputPort>>>>,
}

impl OutputHandle {
    pub fn new(port: Box<dyn OutputPort>) -> Self {
        Self {
            port: Arc::new(Mutex::new(Some(port))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn OutputPort>>> {
        self.port.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_port<T>(&self, f: impl FnOnce(&mut dyn OutputPort) -> Result<T>) -> Result<T> {
        match self.lock().as_mut() {
            Some(port) => f(port.as_mut()),
            None => Err(MidiError::PortClosed),
        }
    }

    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        self.with_port(|port| port.send(bytes))
    }

    /// Lights (`on`) or clears a pad: note-on at full velocity or note-off at zero.
    pub fn note_out(&self, channel: u8, note: u8, on: bool) -> Result<()> {
        self.with_port(|port| {
            if on {
                port.note_on(note, 127, channel)
            } else {
                port.note_off(note, 0, channel)
            }
        })
    }

    pub(crate) fn probe(&self) -> Result<()> {
        self.with_port(|port| port.write_short(ACTIVE_SENSING))
    }

    fn release(&self) {
        self.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Stopped,
    Running,
    Disconnected,
}

impl RouterState {
    fn as_u8(self) -> u8 {
        match self {
            RouterState::Stopped => 0,
            RouterState::Running => 1,
            RouterState::Disconnected => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => RouterState::Running,
            2 => RouterState::Disconnected,
            _ => RouterState::Stopped,
        }
    }
}

/// A device opened for routing.
///
/// Handlers are registered between [`Router::open`] and [`Router::launch`];
/// the table is read-only while the event loop runs. A router is not reused
/// after [`Router::close`].
pub struct Router {
    ports: PortPair,
    identity: DeviceIdentity,
    input: Option<Box<dyn InputPort>>,
    output: OutputHandle,
    table: DispatchTable,
    notifications: Option<Sender<MidiEvent>>,
    settings: RouterSettings,
    running: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    fast: Arc<AtomicBool>,
    exit_tx: Sender<LoopExit>,
    exit_rx: Receiver<LoopExit>,
    thread: Option<JoinHandle<()>>,
}

impl Router {
    /// Opens both endpoints of `ports`. Every decoded event is published to
    /// `notifications` when given.
    pub fn open(
        backend: &dyn MidiBackend,
        ports: PortPair,
        settings: &RouterSettings,
        notifications: Option<Sender<MidiEvent>>,
    ) -> Result<Self> {
        let devices = backend.list_devices()?;
        let input_info = devices
            .iter()
            .find(|d| d.index == ports.input && d.is_input)
            .ok_or_else(|| MidiError::DeviceNotFound(format!("no input with id {}", ports.input)))?;
        let identity = input_info.identity();

        let input = backend.open_input(ports.input)?;
        let output = backend.open_output(ports.output)?;
        info!(
            "Opened '{}' (input {}, output {})",
            identity.name, ports.input, ports.output
        );

        let (exit_tx, exit_rx) = bounded(1);
        Ok(Self {
            ports,
            identity,
            input: Some(input),
            output: OutputHandle::new(output),
            table: DispatchTable::new(),
            notifications,
            settings: settings.clone(),
            running: Arc::new(AtomicBool::new(false)),
            state: Arc::new(AtomicU8::new(RouterState::Stopped.as_u8())),
            fast: Arc::new(AtomicBool::new(true)),
            exit_tx,
            exit_rx,
            thread: None,
        })
    }

    /// Opens the device selected by `selected`, resolving its duplex sibling first.
    pub fn open_selected(
        backend: &dyn MidiBackend,
        selected: usize,
        settings: &RouterSettings,
        notifications: Option<Sender<MidiEvent>>,
    ) -> Result<Self> {
        let ports = device::resolve_pair(backend, selected)?;
        Self::open(backend, ports, settings, notifications)
    }

    pub fn register(
        &mut self,
        channel: u8,
        kind: MessageType,
        data1: Option<u8>,
        data2: Option<u8>,
        handler: Handler,
    ) -> Result<()> {
        if self.thread.is_some() {
            return Err(MidiError::AlreadyRunning);
        }
        self.table.register(channel, kind, data1, data2, handler)
    }

    pub fn unregister(
        &mut self,
        channel: u8,
        kind: MessageType,
        data1: Option<u8>,
        data2: Option<u8>,
    ) -> Result<Option<Handler>> {
        if self.thread.is_some() {
            return Err(MidiError::AlreadyRunning);
        }
        Ok(self.table.unregister(channel, kind, data1, data2))
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    /// Starts the background event loop.
    pub fn launch(&mut self) -> Result<()> {
        let input = self.input.take().ok_or(MidiError::AlreadyRunning)?;

        let event_loop = EventLoop::new(
            input,
            self.output.clone(),
            Arc::new(self.table.clone()),
            self.notifications.clone(),
            HandlerPool::new(self.settings.handler_workers, self.settings.handler_queue),
            Arc::clone(&self.running),
            Arc::clone(&self.fast),
            self.settings.slow_poll_interval(),
            self.settings.read_batch,
        );

        self.running.store(true, Ordering::SeqCst);
        self.state
            .store(RouterState::Running.as_u8(), Ordering::SeqCst);

        let state = Arc::clone(&self.state);
        let exit_tx = self.exit_tx.clone();
        let spawned = thread::Builder::new()
            .name("midi-router".to_string())
            .spawn(move || {
                let exit = event_loop.run();
                let final_state = match exit {
                    LoopExit::Disconnected => RouterState::Disconnected,
                    LoopExit::Stopped => RouterState::Stopped,
                };
                state.store(final_state.as_u8(), Ordering::SeqCst);
                let _ = exit_tx.send(exit);
            });

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.state
                    .store(RouterState::Stopped.as_u8(), Ordering::SeqCst);
                Err(MidiError::Subsystem(e.to_string()))
            }
        }
    }

    /// Fires once with the reason the event loop ended.
    pub fn exit_signal(&self) -> Receiver<LoopExit> {
        self.exit_rx.clone()
    }

    /// Stops the event loop, waits for it to exit and releases both endpoints.
    /// Handler invocations already queued still run.
    pub fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Router thread panicked");
            }
        }
        self.input.take();
        if !self.output.is_closed() {
            self.output.release();
            info!("Closed '{}'", self.identity.name);
        }
        self.state
            .store(RouterState::Stopped.as_u8(), Ordering::SeqCst);
    }

    pub fn state(&self) -> RouterState {
        RouterState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn cadence(&self) -> Cadence {
        if self.fast.load(Ordering::SeqCst) {
            Cadence::Fast
        } else {
            Cadence::Slow
        }
    }

    pub fn ports(&self) -> PortPair {
        self.ports
    }

    /// Name-based identity of the input endpoint, used to find it again after a reconnect
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn output(&self) -> OutputHandle {
        self.output.clone()
    }

    pub fn notifications(&self) -> Option<&Sender<MidiEvent>> {
        self.notifications.as_ref()
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::handler;
    use crate::midi::{MockBackend, RawFrame};
    use crossbeam::channel::unbounded;
    use std::time::Duration;

    fn settings() -> RouterSettings {
        RouterSettings {
            slow_poll_interval_ms: 1,
            ..RouterSettings::default()
        }
    }

    fn open(backend: &MockBackend) -> Router {
        Router::open(
            backend,
            PortPair {
                input: 0,
                output: 1,
            },
            &settings(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_open_missing_device_fails() {
        let backend = MockBackend::with_controller("Pad");
        let result = Router::open(
            &backend,
            PortPair {
                input: 5,
                output: 1,
            },
            &settings(),
            None,
        );
        assert!(matches!(result, Err(MidiError::DeviceNotFound(_))));
    }

    #[test]
    fn test_lifecycle_states() {
        let backend = MockBackend::with_controller("Pad");
        let mut router = open(&backend);
        assert_eq!(router.state(), RouterState::Stopped);

        router.launch().unwrap();
        assert_eq!(router.state(), RouterState::Running);
        assert!(matches!(router.launch(), Err(MidiError::AlreadyRunning)));

        router.close();
        assert_eq!(router.state(), RouterState::Stopped);
        assert_eq!(
            router.exit_signal().recv_timeout(Duration::from_secs(1)),
            Ok(LoopExit::Stopped)
        );
        assert!(matches!(
            router.output().note_out(1, 36, true),
            Err(MidiError::PortClosed)
        ));
    }

    #[test]
    fn test_registration_after_launch_is_rejected() {
        let backend = MockBackend::with_controller("Pad");
        let mut router = open(&backend);
        router.launch().unwrap();
        let result = router.register(1, MessageType::NoteOn, None, None, handler(|_, _| Ok(())));
        assert!(matches!(result, Err(MidiError::AlreadyRunning)));
    }

    #[test]
    fn test_disconnect_is_reported() {
        let backend = MockBackend::with_controller("Pad");
        let mut router = open(&backend);
        router.launch().unwrap();

        backend.unplug();
        assert_eq!(
            router.exit_signal().recv_timeout(Duration::from_secs(1)),
            Ok(LoopExit::Disconnected)
        );
        assert_eq!(router.state(), RouterState::Disconnected);
        router.close();
        assert_eq!(router.state(), RouterState::Stopped);
    }

    #[test]
    fn test_note_out_rejects_out_of_range_channel() {
        let backend = MockBackend::with_controller("Pad");
        let router = open(&backend);
        assert!(matches!(
            router.output().note_out(0, 36, true),
            Err(MidiError::InvalidBinding(_))
        ));
        assert!(matches!(
            router.output().note_out(17, 36, false),
            Err(MidiError::InvalidBinding(_))
        ));
        assert!(backend.written_messages().is_empty());
    }

    #[test]
    fn test_handler_can_light_pad() {
        let backend = MockBackend::with_controller("Pad");
        let mut router = open(&backend);
        let output = router.output();
        let (tx, rx) = unbounded();
        router
            .register(
                1,
                MessageType::NoteOn,
                Some(36),
                None,
                handler(move |note, velocity| {
                    output.note_out(1, note, velocity > 0)?;
                    tx.send(()).unwrap();
                    Ok(())
                }),
            )
            .unwrap();
        router.launch().unwrap();

        backend.push_frames(&[RawFrame::new(0x90, 36, 100)]);
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        router.close();

        assert_eq!(backend.written_messages(), vec![vec![0x90, 36, 127]]);
    }
}
