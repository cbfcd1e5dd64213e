//! Ordered event emission for workflow runs.
//!
//! A run's events flow through a single unbounded channel. Sequence numbers
//! are assigned under the same lock as the send, so consumers always observe
//! strictly increasing `seq` values even when parallel loop iterations emit
//! concurrently.

use std::sync::Mutex;

use maverick_types::event::{WorkflowEvent, WorkflowEventKind};
use tokio::sync::mpsc;

/// Emits ordered [`WorkflowEvent`]s into a run's event channel.
pub struct EventEmitter {
    inner: Mutex<EmitterState>,
}

struct EmitterState {
    tx: mpsc::UnboundedSender<WorkflowEvent>,
    next_seq: u64,
}

impl EventEmitter {
    /// Create an emitter and the receiving half of the event channel.
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: Mutex::new(EmitterState { tx, next_seq: 0 }),
            },
            rx,
        )
    }

    /// Emit one event; returns its sequence number.
    ///
    /// Sends to a dropped receiver are ignored: a consumer that walked away
    /// stops observing events but does not stop the run (cancellation is the
    /// explicit mechanism for that).
    pub(crate) fn emit(&self, step_path: Option<String>, kind: WorkflowEventKind) -> u64 {
        let mut state = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let seq = state.next_seq;
        state.next_seq += 1;
        let _ = state.tx.send(WorkflowEvent {
            seq,
            step_path,
            kind,
        });
        seq
    }
}
