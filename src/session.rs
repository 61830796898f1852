//! Keeps one router alive across disconnects and handler reloads.
//!
//! A [`Session`] opens the controller, lets a [`Registrar`] fill the fresh
//! router's dispatch table and launches it. A supervisor thread watches each
//! router; when the device drops out it waits for the same device to come back
//! and relaunches with the same registrar. Observers read decoded events from
//! [`Session::notifications`] and lifecycle changes from [`Session::status`];
//! both queues outlive individual routers.

use crate::config::{RouterSettings, Settings};
use crate::event_loop::LoopExit;
use crate::midi::device::{find_by_name, pair_in};
use crate::midi::{DeviceInfo, MidiBackend, MidiError, MidiEvent, PortPair, Result};
use crate::reconnect::ReconnectSupervisor;
use crate::router::{Router, RouterState};
use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Registers the caller's handlers on a freshly opened router
pub type Registrar = Arc<dyn Fn(&mut Router) -> Result<()> + Send + Sync>;

/// Lifecycle notifications for observers such as a UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connected(PortPair),
    /// The device dropped out; a reconnect is in progress
    Disconnected,
    Reconnected(PortPair),
    Reloaded,
    Stopped,
}

/// Asks the user which device to open
pub trait DevicePrompt: Send + Sync {
    fn select(&self, devices: &[DeviceInfo]) -> Result<usize>;
}

impl<F> DevicePrompt for F
where
    F: Fn(&[DeviceInfo]) -> Result<usize> + Send + Sync,
{
    fn select(&self, devices: &[DeviceInfo]) -> Result<usize> {
        self(devices)
    }
}

#[derive(Default)]
struct Active {
    ports: Option<PortPair>,
    registrar: Option<Registrar>,
    router: Option<Router>,
    /// A supervisor is waiting for the device and will relaunch with the current registrar
    reconnecting: bool,
}

struct Inner {
    backend: Arc<dyn MidiBackend>,
    settings: RouterSettings,
    reconnect_interval: Duration,
    device: Option<String>,
    prompt: Mutex<Option<Box<dyn DevicePrompt>>>,
    active: Mutex<Active>,
    /// Bumped on every launch, reload and close; a supervisor only acts while it still matches
    generation: AtomicU64,
    closed: Arc<AtomicBool>,
    notify: Mutex<Option<(Sender<MidiEvent>, Receiver<MidiEvent>)>>,
    status_tx: Sender<SessionStatus>,
    status_rx: Receiver<SessionStatus>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(backend: Arc<dyn MidiBackend>, settings: &Settings) -> Self {
        let (status_tx, status_rx) = unbounded();
        Self {
            inner: Arc::new(Inner {
                backend,
                settings: settings.router.clone(),
                reconnect_interval: settings.reconnect.interval(),
                device: settings.device.clone(),
                prompt: Mutex::new(None),
                active: Mutex::new(Active::default()),
                generation: AtomicU64::new(0),
                closed: Arc::new(AtomicBool::new(false)),
                notify: Mutex::new(None),
                status_tx,
                status_rx,
            }),
        }
    }

    /// Opens these ports instead of selecting a device
    pub fn with_ports(self, ports: PortPair) -> Self {
        lock(&self.inner.active).ports = Some(ports);
        self
    }

    /// Opens the duplex pair containing device `index`
    pub fn with_device_index(self, index: usize) -> Result<Self> {
        let devices = self.inner.backend.list_devices()?;
        let ports = pair_in(&devices, index)?;
        Ok(self.with_ports(ports))
    }

    pub fn with_prompt(self, prompt: impl DevicePrompt + 'static) -> Self {
        *lock(&self.inner.prompt) = Some(Box::new(prompt));
        self
    }

    /// Every decoded event from every router this session runs. Routers launched
    /// before the first call do not publish.
    pub fn notifications(&self) -> Receiver<MidiEvent> {
        let mut notify = lock(&self.inner.notify);
        notify.get_or_insert_with(unbounded).1.clone()
    }

    pub fn status(&self) -> Receiver<SessionStatus> {
        self.inner.status_rx.clone()
    }

    pub fn ports(&self) -> Option<PortPair> {
        lock(&self.inner.active).ports
    }

    pub fn router_state(&self) -> Option<RouterState> {
        lock(&self.inner.active).router.as_ref().map(Router::state)
    }

    /// Opens the device, registers the handlers and launches the router.
    pub fn start(&self, registrar: Registrar) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(MidiError::Cancelled);
        }
        let mut active = lock(&self.inner.active);
        if active.router.is_some() {
            return Err(MidiError::AlreadyRunning);
        }
        let ports = match active.ports {
            Some(ports) => ports,
            None => self.select_ports()?,
        };
        active.registrar = Some(registrar);
        launch(&self.inner, &mut active, ports)?;
        self.inner.emit(SessionStatus::Connected(ports));
        Ok(())
    }

    /// Replaces the handler set: closes the running router and starts a new one
    /// on the same device with `registrar`. While the device is away the new
    /// registrar is kept for the pending reconnect.
    pub fn reload(&self, registrar: Registrar) -> Result<()> {
        let mut active = lock(&self.inner.active);
        if active.reconnecting {
            active.registrar = Some(registrar);
            info!("Reloaded handlers, applied on reconnect");
            self.inner.emit(SessionStatus::Reloaded);
            return Ok(());
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(mut router) = active.router.take() {
            router.close();
        }
        active.registrar = Some(registrar);
        let ports = active
            .ports
            .ok_or_else(|| MidiError::DeviceNotFound("no device opened yet".to_string()))?;
        launch(&self.inner, &mut active, ports)?;
        info!("Reloaded handlers");
        self.inner.emit(SessionStatus::Reloaded);
        Ok(())
    }

    /// Stops the router and any reconnect in progress. The session cannot be started again.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let mut active = lock(&self.inner.active);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(mut router) = active.router.take() {
            router.close();
            self.inner.emit(SessionStatus::Stopped);
        }
    }

    fn select_ports(&self) -> Result<PortPair> {
        let devices = self.inner.backend.list_devices()?;
        let index = match (&self.inner.device, lock(&self.inner.prompt).as_ref()) {
            (Some(pattern), _) => find_by_name(&devices, pattern)?,
            (None, Some(prompt)) => prompt.select(&devices)?,
            (None, None) => {
                return Err(MidiError::DeviceNotFound(
                    "no device configured and no prompt available".to_string(),
                ))
            }
        };
        pair_in(&devices, index)
    }
}

impl Inner {
    fn emit(&self, status: SessionStatus) {
        let _ = self.status_tx.send(status);
    }

    fn current(&self, generation: u64) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self.generation.load(Ordering::SeqCst) == generation
    }
}

/// Opens a router on `ports`, runs the registrar on it, launches it and starts
/// its supervisor. Called with the active lock held.
fn launch(inner: &Arc<Inner>, active: &mut Active, ports: PortPair) -> Result<()> {
    let registrar = active
        .registrar
        .clone()
        .ok_or_else(|| MidiError::Subsystem("no handler registrar".to_string()))?;
    let notifications = lock(&inner.notify).as_ref().map(|(tx, _)| tx.clone());

    let mut router = Router::open(inner.backend.as_ref(), ports, &inner.settings, notifications)?;
    registrar(&mut router)?;
    router.launch()?;

    let exit = router.exit_signal();
    let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
    active.ports = Some(ports);
    active.router = Some(router);
    active.reconnecting = false;

    let inner = Arc::clone(inner);
    thread::Builder::new()
        .name("midi-session".to_string())
        .spawn(move || supervise(inner, exit, generation))
        .map_err(|e| MidiError::Subsystem(e.to_string()))?;
    Ok(())
}

fn supervise(inner: Arc<Inner>, exit: Receiver<LoopExit>, generation: u64) {
    let Ok(reason) = exit.recv() else {
        return;
    };

    let identity = {
        let mut active = lock(&inner.active);
        if !inner.current(generation) {
            return;
        }
        if reason == LoopExit::Stopped {
            info!("Router stopped");
            if let Some(mut router) = active.router.take() {
                router.close();
            }
            inner.emit(SessionStatus::Stopped);
            return;
        }
        match active.router.take() {
            Some(mut router) => {
                let identity = router.identity().clone();
                router.close();
                active.reconnecting = true;
                identity
            }
            None => return,
        }
    };

    warn!("'{}' disconnected, trying to reconnect", identity.name);
    inner.emit(SessionStatus::Disconnected);

    let supervisor = ReconnectSupervisor::new(Arc::clone(&inner.backend), inner.reconnect_interval)
        .with_cancel(Arc::clone(&inner.closed));
    loop {
        let ports = match supervisor.await_reconnect(&identity) {
            Ok(ports) => ports,
            Err(e) => {
                info!("Reconnect abandoned: {}", e);
                lock(&inner.active).reconnecting = false;
                return;
            }
        };

        let mut active = lock(&inner.active);
        if !inner.current(generation) {
            return;
        }
        match launch(&inner, &mut active, ports) {
            Ok(()) => {
                info!("Reconnected '{}'", identity.name);
                inner.emit(SessionStatus::Reconnected(ports));
                return;
            }
            Err(e) => error!("Relaunch after reconnect failed, retrying: {}", e),
        }
    }
}
