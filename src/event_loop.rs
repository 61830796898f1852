// event_loop.rs

use crate::dispatch::DispatchTable;
use crate::midi::{decode, InputPort, MidiError, MidiEvent};
use crate::router::OutputHandle;
use crate::scheduler::{HandlerPool, Scheduler};
use crossbeam::channel::Sender;
use log::{debug, error, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Polling speed of the event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Poll again immediately
    Fast,
    /// Sleep for the slow interval before polling
    Slow,
}

/// Switches to slow polling as soon as a poll comes back empty and back to fast
/// polling as soon as one finds data, so bursts drain quickly while idle
/// periods do not spin.
#[derive(Debug)]
pub struct CadenceControl {
    mode: Cadence,
    slow_interval: Duration,
}

impl CadenceControl {
    pub fn new(slow_interval: Duration) -> Self {
        Self {
            mode: Cadence::Fast,
            slow_interval,
        }
    }

    pub fn mode(&self) -> Cadence {
        self.mode
    }

    /// How long to wait before the next poll
    pub fn delay(&self) -> Option<Duration> {
        match self.mode {
            Cadence::Fast => None,
            Cadence::Slow => Some(self.slow_interval),
        }
    }

    pub fn observe(&mut self, has_data: bool) {
        let next = if has_data { Cadence::Fast } else { Cadence::Slow };
        if next != self.mode {
            trace!("Poll cadence {:?} -> {:?}", self.mode, next);
            self.mode = next;
        }
    }
}

/// Why the event loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Closed on request, or a fatal error on the input side
    Stopped,
    /// The liveness probe hit a communication fault
    Disconnected,
}

pub struct EventLoop {
    input: Box<dyn InputPort>,
    output: OutputHandle,
    table: Arc<DispatchTable>,
    notifications: Option<Sender<MidiEvent>>,
    pool: HandlerPool,
    running: Arc<AtomicBool>,
    fast: Arc<AtomicBool>,
    cadence: CadenceControl,
    read_batch: usize,
}

impl EventLoop {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        input: Box<dyn InputPort>,
        output: OutputHandle,
        table: Arc<DispatchTable>,
        notifications: Option<Sender<MidiEvent>>,
        pool: HandlerPool,
        running: Arc<AtomicBool>,
        fast: Arc<AtomicBool>,
        slow_interval: Duration,
        read_batch: usize,
    ) -> Self {
        EventLoop {
            input,
            output,
            table,
            notifications,
            pool,
            running,
            fast,
            cadence: CadenceControl::new(slow_interval),
            read_batch: read_batch.max(1),
        }
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence.mode()
    }

    /// Runs until closed or until the device fails.
    pub fn run(mut self) -> LoopExit {
        info!("Event loop started ({} handlers)", self.table.len());
        while self.running.load(Ordering::SeqCst) {
            if let Err(exit) = self.cycle() {
                info!("Event loop exited: {:?}", exit);
                return exit;
            }
        }
        info!("Event loop stopped");
        LoopExit::Stopped
    }

    /// One scheduling tick: wait if idle, probe the output, then drain at most
    /// one batch. Returns the number of frames read.
    pub(crate) fn cycle(&mut self) -> Result<usize, LoopExit> {
        if let Some(delay) = self.cadence.delay() {
            thread::sleep(delay);
        }

        match self.output.probe() {
            Ok(()) => {}
            Err(MidiError::CommunicationFault(e)) => {
                warn!("Liveness probe failed, device disconnected: {}", e);
                return Err(LoopExit::Disconnected);
            }
            Err(e) => {
                error!("Output unusable, stopping: {}", e);
                return Err(LoopExit::Stopped);
            }
        }

        let has_data = self.input.poll().map_err(|e| {
            error!("Input poll failed, stopping: {}", e);
            LoopExit::Stopped
        })?;
        self.cadence.observe(has_data);
        self.fast
            .store(self.cadence.mode() == Cadence::Fast, Ordering::SeqCst);
        if !has_data {
            return Ok(0);
        }

        let frames = self.input.read(self.read_batch).map_err(|e| {
            error!("Input read failed, stopping: {}", e);
            LoopExit::Stopped
        })?;

        for frame in &frames {
            match decode(frame) {
                Ok(event) => self.route(event),
                Err(e) => debug!("Skipping frame {:?}: {}", frame, e),
            }
        }
        Ok(frames.len())
    }

    fn route(&self, event: MidiEvent) {
        trace!("Decoded {}", event);

        if let Some(tx) = &self.notifications {
            // An observer that went away must not stop routing.
            let _ = tx.send(event);
        }

        if let Some(handler) = self.table.lookup(event.channel, event.kind, event.data1, event.data2)
        {
            let handler = Arc::clone(handler);
            self.pool.spawn(move || {
                if let Err(e) = handler(event.data1, event.data2) {
                    error!("Handler for [{}] failed: {}", event, e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::handler;
    use crate::midi::{MessageType, MidiBackend, MockBackend, RawFrame};
    use crossbeam::channel::unbounded;

    fn event_loop(backend: &MockBackend, table: DispatchTable, tx: Option<Sender<MidiEvent>>) -> EventLoop {
        EventLoop::new(
            backend.open_input(0).unwrap(),
            OutputHandle::new(backend.open_output(1).unwrap()),
            Arc::new(table),
            tx,
            HandlerPool::new(2, 16),
            Arc::new(AtomicBool::new(true)),
            Arc::new(AtomicBool::new(true)),
            Duration::from_millis(1),
            10,
        )
    }

    #[test]
    fn test_cadence_transitions() {
        let mut cadence = CadenceControl::new(Duration::from_millis(50));
        assert_eq!(cadence.delay(), None);
        cadence.observe(false);
        assert_eq!(cadence.mode(), Cadence::Slow);
        assert_eq!(cadence.delay(), Some(Duration::from_millis(50)));
        cadence.observe(false);
        assert_eq!(cadence.mode(), Cadence::Slow);
        cadence.observe(true);
        assert_eq!(cadence.mode(), Cadence::Fast);
    }

    #[test]
    fn test_slow_after_empty_polls_fast_when_data_appears() {
        let backend = MockBackend::with_controller("Pad");
        let mut event_loop = event_loop(&backend, DispatchTable::new(), None);

        let n = 5;
        for cycle in 1..=n {
            assert_eq!(event_loop.cycle(), Ok(0));
            assert_eq!(event_loop.cadence(), Cadence::Slow, "cycle {cycle}");
        }

        backend.push_frames(&[RawFrame::new(0xB0, 1, 64)]);
        assert_eq!(event_loop.cycle(), Ok(1));
        assert_eq!(event_loop.cadence(), Cadence::Fast);
    }

    #[test]
    fn test_batches_are_bounded() {
        let backend = MockBackend::with_controller("Pad");
        let mut event_loop = event_loop(&backend, DispatchTable::new(), None);
        let frames: Vec<RawFrame> = (0..25).map(|n| RawFrame::new(0xB0, n, 0)).collect();
        backend.push_frames(&frames);

        assert_eq!(event_loop.cycle(), Ok(10));
        assert_eq!(event_loop.cycle(), Ok(10));
        assert_eq!(event_loop.cycle(), Ok(5));
        assert_eq!(event_loop.cycle(), Ok(0));
    }

    #[test]
    fn test_every_event_is_published_in_order() {
        let backend = MockBackend::with_controller("Pad");
        let (tx, rx) = unbounded();
        let mut event_loop = event_loop(&backend, DispatchTable::new(), Some(tx));

        backend.push_frames(&[
            RawFrame::new(0x91, 60, 100),
            RawFrame::new(0xF8, 0, 0),
            RawFrame::new(0x05, 0, 0),
            RawFrame::new(0xB0, 7, 12),
        ]);
        assert_eq!(event_loop.cycle(), Ok(4));

        let events: Vec<MidiEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                MidiEvent {
                    channel: 2,
                    kind: MessageType::NoteOn,
                    data1: 60,
                    data2: 100
                },
                MidiEvent {
                    channel: 1,
                    kind: MessageType::ControlChange,
                    data1: 7,
                    data2: 12
                },
            ]
        );
    }

    #[test]
    fn test_probe_fault_exits_disconnected() {
        let backend = MockBackend::with_controller("Pad");
        let mut event_loop = event_loop(&backend, DispatchTable::new(), None);
        assert_eq!(event_loop.cycle(), Ok(0));
        assert_eq!(backend.written(), vec![vec![0xFE]]);

        backend.break_output();
        backend.push_frames(&[RawFrame::new(0x90, 1, 1)]);
        assert_eq!(event_loop.cycle(), Err(LoopExit::Disconnected));
        // the frame was not read
        assert_eq!(backend.pending_frames(), 1);
    }

    #[test]
    fn test_input_failure_stops() {
        let backend = MockBackend::with_controller("Pad");
        let mut event_loop = event_loop(&backend, DispatchTable::new(), None);
        backend.break_input();
        assert_eq!(event_loop.cycle(), Err(LoopExit::Stopped));
    }

    #[test]
    fn test_handler_failure_does_not_stop_loop() {
        let backend = MockBackend::with_controller("Pad");
        let (tx, rx) = unbounded();
        let mut table = DispatchTable::new();
        table
            .register(
                1,
                MessageType::NoteOn,
                Some(36),
                None,
                handler(|_, _| Err("pad 36 is broken".into())),
            )
            .unwrap();
        table
            .register(
                1,
                MessageType::NoteOn,
                Some(37),
                None,
                handler(|_, _| panic!("pad 37 panicked")),
            )
            .unwrap();
        table
            .register(
                1,
                MessageType::NoteOn,
                None,
                None,
                handler(move |d1, d2| {
                    tx.send((d1, d2)).unwrap();
                    Ok(())
                }),
            )
            .unwrap();
        let mut event_loop = event_loop(&backend, table, None);

        backend.push_frames(&[
            RawFrame::new(0x90, 36, 1),
            RawFrame::new(0x90, 37, 1),
            RawFrame::new(0x90, 38, 127),
        ]);
        assert_eq!(event_loop.cycle(), Ok(3));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            (38, 127)
        );
        assert_eq!(event_loop.cycle(), Ok(0));
    }
}
