use crate::midi::{DeviceInfo, InputPort, MidiBackend, MidiError, OutputPort, RawFrame, Result};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, info};
use midir::{Ignore, MidiInput, MidiInputPort, MidiOutput, MidiOutputPort};
use std::thread;

#[cfg(target_os = "linux")]
const INTERFACE: &str = "ALSA";
#[cfg(target_os = "macos")]
const INTERFACE: &str = "CoreMIDI";
#[cfg(target_os = "windows")]
const INTERFACE: &str = "WinMM";
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const INTERFACE: &str = "MIDI";

/// Real devices through midir.
///
/// Inputs are listed first, then outputs. Every call creates fresh midir clients
/// and drops them before returning, so nothing stays initialised between calls.
/// Each open connection lives on its own owner thread and is driven through
/// channels, which keeps the ports `Send` regardless of the platform API.
pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }
}

fn input_client(client_name: &str) -> Result<MidiInput> {
    let mut midi_in =
        MidiInput::new(&format!("{client_name}-in")).map_err(|e| MidiError::Init(e.to_string()))?;
    midi_in.ignore(Ignore::None);
    Ok(midi_in)
}

fn output_client(client_name: &str) -> Result<MidiOutput> {
    MidiOutput::new(&format!("{client_name}-out")).map_err(|e| MidiError::Init(e.to_string()))
}

fn input_port(midi_in: &MidiInput, id: usize) -> Result<MidiInputPort> {
    midi_in
        .ports()
        .get(id)
        .cloned()
        .ok_or_else(|| MidiError::DeviceNotFound(format!("no input with id {id}")))
}

// Output ids continue after the inputs in the combined listing.
fn output_port(client_name: &str, midi_out: &MidiOutput, id: usize) -> Result<MidiOutputPort> {
    let inputs = input_client(client_name)?.ports().len();
    id.checked_sub(inputs)
        .and_then(|local| midi_out.ports().get(local).cloned())
        .ok_or_else(|| MidiError::DeviceNotFound(format!("no output with id {id}")))
}

impl MidiBackend for MidirBackend {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let midi_in = input_client(&self.client_name)?;
        let midi_out = output_client(&self.client_name)?;

        let inputs = midi_in
            .ports()
            .iter()
            .map(|p| midi_in.port_name(p).unwrap_or_default())
            .map(|name| (name, true))
            .collect::<Vec<_>>();
        let outputs = midi_out
            .ports()
            .iter()
            .map(|p| midi_out.port_name(p).unwrap_or_default())
            .map(|name| (name, false))
            .collect::<Vec<_>>();

        let devices = inputs
            .into_iter()
            .chain(outputs)
            .enumerate()
            .map(|(index, (name, is_input))| DeviceInfo {
                index,
                interface: INTERFACE.to_string(),
                name,
                is_input,
                is_output: !is_input,
                busy: false,
            })
            .collect();
        Ok(devices)
    }

    fn open_input(&self, id: usize) -> Result<Box<dyn InputPort>> {
        Ok(Box::new(MidirInput::spawn(self.client_name.clone(), id)?))
    }

    fn open_output(&self, id: usize) -> Result<Box<dyn OutputPort>> {
        Ok(Box::new(MidirOutput::spawn(self.client_name.clone(), id)?))
    }
}

/// Input connection whose callback feeds a channel that `poll`/`read` drain.
pub struct MidirInput {
    frames: Receiver<RawFrame>,
    // Dropping this ends the owner thread, which closes the connection.
    _shutdown: Sender<()>,
}

impl MidirInput {
    fn spawn(client_name: String, id: usize) -> Result<Self> {
        let (frame_tx, frames) = unbounded();
        let (shutdown, shutdown_rx) = bounded::<()>(0);
        let (ready_tx, ready_rx) = bounded(1);

        thread::Builder::new()
            .name("midi-input-owner".to_string())
            .spawn(move || {
                let opened = input_client(&client_name).and_then(|midi_in| {
                    let port = input_port(&midi_in, id)?;
                    Ok((midi_in, port))
                });
                let (midi_in, port) = match opened {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let name = midi_in.port_name(&port).unwrap_or_default();
                let connection = midi_in.connect(
                    &port,
                    &format!("{client_name}-input"),
                    move |stamp, message, _| {
                        if let Some(frame) = RawFrame::from_bytes(stamp, message) {
                            let _ = frame_tx.send(frame);
                        }
                    },
                    (),
                );
                match connection {
                    Ok(conn) => {
                        info!("Opened MIDI input: {}", name);
                        let _ = ready_tx.send(Ok(()));
                        // Blocks until the port handle is dropped.
                        let _ = shutdown_rx.recv();
                        conn.close();
                        debug!("Closed MIDI input: {}", name);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(MidiError::Connection(e.to_string())));
                    }
                }
            })
            .map_err(|e| MidiError::Subsystem(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| MidiError::Connection("input owner thread exited".to_string()))??;

        Ok(Self {
            frames,
            _shutdown: shutdown,
        })
    }
}

impl InputPort for MidirInput {
    fn poll(&mut self) -> Result<bool> {
        Ok(!self.frames.is_empty())
    }

    fn read(&mut self, max_frames: usize) -> Result<Vec<RawFrame>> {
        Ok(self.frames.try_iter().take(max_frames).collect())
    }
}

type Reply = Sender<Result<()>>;

/// Output connection owned by a thread that performs each send synchronously.
pub struct MidirOutput {
    commands: Sender<(Vec<u8>, Reply)>,
}

impl MidirOutput {
    fn spawn(client_name: String, id: usize) -> Result<Self> {
        let (commands, command_rx) = unbounded::<(Vec<u8>, Reply)>();
        let (ready_tx, ready_rx) = bounded(1);

        thread::Builder::new()
            .name("midi-output-owner".to_string())
            .spawn(move || {
                let opened = output_client(&client_name).and_then(|midi_out| {
                    let port = output_port(&client_name, &midi_out, id)?;
                    Ok((midi_out, port))
                });
                let (midi_out, port) = match opened {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let name = midi_out.port_name(&port).unwrap_or_default();
                match midi_out.connect(&port, &format!("{client_name}-output")) {
                    Ok(mut conn) => {
                        info!("Opened MIDI output: {}", name);
                        let _ = ready_tx.send(Ok(()));
                        while let Ok((bytes, reply)) = command_rx.recv() {
                            let result = conn
                                .send(&bytes)
                                .map_err(|e| MidiError::CommunicationFault(e.to_string()));
                            let _ = reply.send(result);
                        }
                        conn.close();
                        debug!("Closed MIDI output: {}", name);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(MidiError::Connection(e.to_string())));
                    }
                }
            })
            .map_err(|e| MidiError::Subsystem(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| MidiError::Connection("output owner thread exited".to_string()))??;

        Ok(Self { commands })
    }
}

impl OutputPort for MidirOutput {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send((bytes.to_vec(), reply_tx))
            .map_err(|_| MidiError::CommunicationFault("output owner thread is gone".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| MidiError::CommunicationFault("output owner thread is gone".to_string()))?
    }
}
