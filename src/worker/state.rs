//! Worker lifecycle states

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a worker
///
/// ```text
/// Created -> Binding -> Listening -> Connected -> Draining -> Closed
/// ```
///
/// A worker may jump to `Draining` from any state once it stops, but it
/// always ends in `Closed`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkerState {
    Created = 0,
    Binding = 1,
    Listening = 2,
    Connected = 3,
    Draining = 4,
    Closed = 5,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Created,
            1 => WorkerState::Binding,
            2 => WorkerState::Listening,
            3 => WorkerState::Connected,
            4 => WorkerState::Draining,
            _ => WorkerState::Closed,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Created => "created",
            WorkerState::Binding => "binding",
            WorkerState::Listening => "listening",
            WorkerState::Connected => "connected",
            WorkerState::Draining => "draining",
            WorkerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// State shared between a worker task and its handle
///
/// Written only by the worker task.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(WorkerState::Created as u8))
    }

    pub fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
