//! Handler lookup keyed by channel, message type and data bytes.
//!
//! Every (channel, type) cell holds exact `(data1, data2)` handlers, per-`data1`
//! wildcards and one type-level wildcard. Lookup tries them in that order.

use crate::midi::{MessageType, MidiError, Result};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

pub const CHANNELS: usize = 16;

/// Error returned by a handler; logged and discarded by the router.
pub type HandlerError = Box<dyn Error + Send + Sync>;
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// A callback receiving the two data bytes of the matched event
pub type Handler = Arc<dyn Fn(u8, u8) -> HandlerResult + Send + Sync>;

/// Wraps a closure into a [`Handler`]
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(u8, u8) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Default, Clone)]
struct Cell {
    exact: HashMap<(u8, u8), Handler>,
    by_data1: HashMap<u8, Handler>,
    any: Option<Handler>,
}

impl Cell {
    fn len(&self) -> usize {
        self.exact.len() + self.by_data1.len() + usize::from(self.any.is_some())
    }
}

#[derive(Clone)]
pub struct DispatchTable {
    cells: Vec<Cell>,
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("registrations", &self.len())
            .finish()
    }
}

impl DispatchTable {
    pub fn new() -> Self {
        Self {
            cells: vec![Cell::default(); CHANNELS * MessageType::ALL.len()],
        }
    }

    fn slot(channel: u8, kind: MessageType) -> Option<usize> {
        if (1..=CHANNELS as u8).contains(&channel) {
            Some(usize::from(channel - 1) * MessageType::ALL.len() + kind.index())
        } else {
            None
        }
    }

    fn cell_mut(&mut self, channel: u8, kind: MessageType) -> Result<&mut Cell> {
        let slot = Self::slot(channel, kind).ok_or_else(|| {
            MidiError::InvalidBinding(format!("channel {channel} is outside 1..=16"))
        })?;
        Ok(&mut self.cells[slot])
    }

    /// Binds `handler`. Without `data1` the handler catches every event of this
    /// channel and type (`data2` is then ignored); with only `data1` it catches
    /// every `data2`. An existing handler at the same key is replaced.
    pub fn register(
        &mut self,
        channel: u8,
        kind: MessageType,
        data1: Option<u8>,
        data2: Option<u8>,
        handler: Handler,
    ) -> Result<()> {
        for value in [data1, data2].into_iter().flatten() {
            if value > 127 {
                return Err(MidiError::InvalidBinding(format!(
                    "data byte {value} is outside 0..=127"
                )));
            }
        }

        let cell = self.cell_mut(channel, kind)?;
        match (data1, data2) {
            (None, _) => cell.any = Some(handler),
            (Some(d1), None) => {
                cell.by_data1.insert(d1, handler);
            }
            (Some(d1), Some(d2)) => {
                cell.exact.insert((d1, d2), handler);
            }
        }
        Ok(())
    }

    /// Removes the most specific registration matching the arguments, falling back
    /// to the `data1` wildcard and then to the type-level wildcard. Returns the
    /// removed handler; removing nothing is not an error.
    pub fn unregister(
        &mut self,
        channel: u8,
        kind: MessageType,
        data1: Option<u8>,
        data2: Option<u8>,
    ) -> Option<Handler> {
        let slot = Self::slot(channel, kind)?;
        let cell = &mut self.cells[slot];

        if let (Some(d1), Some(d2)) = (data1, data2) {
            if let Some(removed) = cell.exact.remove(&(d1, d2)) {
                return Some(removed);
            }
        }
        if let Some(d1) = data1 {
            if let Some(removed) = cell.by_data1.remove(&d1) {
                return Some(removed);
            }
        }
        cell.any.take()
    }

    pub fn lookup(&self, channel: u8, kind: MessageType, data1: u8, data2: u8) -> Option<&Handler> {
        let cell = &self.cells[Self::slot(channel, kind)?];
        cell.exact
            .get(&(data1, data2))
            .or_else(|| cell.by_data1.get(&data1))
            .or(cell.any.as_ref())
    }

    /// Number of registrations across all channels and types
    pub fn len(&self) -> usize {
        self.cells.iter().map(Cell::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
