//! Observability seam for the VM.
//!
//! The interpreter reports selected events through a [`VmTracer`]. The
//! default is a no-op; [`StderrTracer`] prints events while debugging (the
//! CLI installs it for `--trace`), and [`RecordingTracer`] collects events
//! behind a shared handle so tests can install it with
//! `Context::set_tracer` and still read what happened afterwards. All hooks
//! default to doing nothing, so implementations opt into exactly the events
//! they care about.

use std::{cell::RefCell, rc::Rc};

use crate::vm::{error::RunError, objects::CoroutineState};

/// Events the VM can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A coroutine changed state.
    CoroutineState { name: String, state: CoroutineState },
    /// A runtime error terminated a coroutine.
    Error { message: String },
    /// A full garbage collection ran.
    Collection { live_before: usize, live_after: usize },
}

pub trait VmTracer {
    fn coroutine_state(&mut self, name: &str, state: CoroutineState) {
        let _ = (name, state);
    }

    fn error(&mut self, error: &RunError) {
        let _ = error;
    }

    fn collection(&mut self, live_before: usize, live_after: usize) {
        let _ = (live_before, live_after);
    }
}

/// Discards all events.
#[derive(Debug, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Prints events to stderr.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl VmTracer for StderrTracer {
    fn coroutine_state(&mut self, name: &str, state: CoroutineState) {
        eprintln!("coroutine {name}: {state}");
    }

    fn error(&mut self, error: &RunError) {
        eprintln!("runtime error: {error}");
    }

    fn collection(&mut self, live_before: usize, live_after: usize) {
        eprintln!("gc: {live_before} -> {live_after} live objects");
    }
}

/// Records events for inspection in tests.
///
/// Clones share the same event buffer: keep one handle, install the other
/// in the context, and read [`RecordingTracer::events`] after running.
#[derive(Debug, Default, Clone)]
pub struct RecordingTracer {
    events: Rc<RefCell<Vec<TraceEvent>>>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.borrow().clone()
    }

    /// Recorded states of the coroutine with the given name, in order.
    #[must_use]
    pub fn states_of(&self, name: &str) -> Vec<CoroutineState> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                TraceEvent::CoroutineState { name: event_name, state } if event_name == name => Some(*state),
                _ => None,
            })
            .collect()
    }
}

impl VmTracer for RecordingTracer {
    fn coroutine_state(&mut self, name: &str, state: CoroutineState) {
        self.events.borrow_mut().push(TraceEvent::CoroutineState {
            name: name.to_owned(),
            state,
        });
    }

    fn error(&mut self, error: &RunError) {
        self.events.borrow_mut().push(TraceEvent::Error {
            message: error.to_string(),
        });
    }

    fn collection(&mut self, live_before: usize, live_after: usize) {
        self.events.borrow_mut().push(TraceEvent::Collection {
            live_before,
            live_after,
        });
    }
}
