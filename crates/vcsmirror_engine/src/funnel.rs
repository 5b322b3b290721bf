//! Background error funnel.

use crate::error::{EngineError, EngineResult};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Thread-safe queue collecting failures from background tasks.
///
/// Any stage may report; the orchestrator drains at defined checkpoints
/// and aborts the run on the first error found. The funnel is scoped to
/// a single run and holds no global state.
#[derive(Debug, Default)]
pub struct ErrorFunnel {
    queue: Mutex<VecDeque<EngineError>>,
}

impl ErrorFunnel {
    /// Creates an empty funnel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a failure. Callable from any thread.
    pub fn report(&self, error: EngineError) {
        tracing::debug!(%error, "background failure funneled");
        self.queue.lock().push_back(error);
    }

    /// Pops the oldest failure, if any.
    pub fn drain_one(&self) -> Option<EngineError> {
        self.queue.lock().pop_front()
    }

    /// Orchestrator checkpoint: fails the run if anything was reported.
    ///
    /// The oldest failure is wrapped so the caller sees a single
    /// synchronization error with the original preserved as cause.
    pub fn checkpoint(&self) -> EngineResult<()> {
        match self.drain_one() {
            Some(cause) => Err(EngineError::aborted(cause)),
            None => Ok(()),
        }
    }

    /// Returns true if no failure is pending.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}
