//! In-order host queue that runs [`HostExecutable`]s.
//!
//! A submission freezes the executable's node parameters when it is made.
//! In [`QueueMode::Deferred`] the frozen copy only runs on
//! [`HostQueue::flush`], which makes the effect of updates on in-flight
//! work observable.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use cmdgraph_core::{GraphError, GraphResult, SubmissionQueue};
use tracing::{debug, warn};

use crate::emitter::ReferenceEmitter;
use crate::graph::{ExecSnapshot, HostExecutable};
use crate::memory::ReferenceDevice;

static NEXT_EVENT: AtomicU64 = AtomicU64::new(1);

// ── Events ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct EventState {
    id: u64,
    complete: AtomicBool,
}

/// Completion signal of one submission. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct HostEvent(Arc<EventState>);

impl HostEvent {
    fn new() -> Self {
        Self(Arc::new(EventState {
            id: NEXT_EVENT.fetch_add(1, Ordering::Relaxed),
            complete: AtomicBool::new(false),
        }))
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.0.complete.load(Ordering::Acquire)
    }

    fn signal(&self) {
        self.0.complete.store(true, Ordering::Release);
    }
}

// ── Queue ───────────────────────────────────────────────────────────────────

/// When submitted work runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueMode {
    /// During `submit`.
    #[default]
    Immediate,
    /// On the next `flush`.
    Deferred,
}

#[derive(Debug)]
struct Submission {
    seq: usize,
    snapshot: ExecSnapshot,
    waits: Vec<HostEvent>,
    signal: Option<HostEvent>,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Submission>,
    waits: Vec<HostEvent>,
    submitted: usize,
    completed: usize,
}

/// Host queue bound to one reference device.
#[derive(Debug)]
pub struct HostQueue {
    device: ReferenceDevice,
    mode: QueueMode,
    state: Mutex<QueueState>,
}

impl HostQueue {
    #[must_use]
    pub fn new(device: ReferenceDevice, mode: QueueMode) -> Self {
        Self { device, mode, state: Mutex::new(QueueState::default()) }
    }

    #[must_use]
    pub fn immediate(device: ReferenceDevice) -> Self {
        Self::new(device, QueueMode::Immediate)
    }

    #[must_use]
    pub fn deferred(device: ReferenceDevice) -> Self {
        Self::new(device, QueueMode::Deferred)
    }

    #[must_use]
    pub const fn mode(&self) -> QueueMode {
        self.mode
    }

    fn lock(&self) -> GraphResult<MutexGuard<'_, QueueState>> {
        self.state.lock().map_err(|_| GraphError::unknown("host queue poisoned"))
    }

    pub fn submission_count(&self) -> GraphResult<usize> {
        Ok(self.lock()?.submitted)
    }

    pub fn completed_count(&self) -> GraphResult<usize> {
        Ok(self.lock()?.completed)
    }

    pub fn pending_count(&self) -> GraphResult<usize> {
        Ok(self.lock()?.pending.len())
    }

    /// Run every pending submission in order. Returns how many ran.
    ///
    /// Stops at the first failing submission. That submission and every
    /// later one stay queued, so a flush after the cause is cleared retries
    /// them in order.
    pub fn flush(&self) -> GraphResult<usize> {
        let mut state = self.lock()?;
        let mut ran = 0;
        while let Some(sub) = state.pending.pop_front() {
            if let Err(e) = self.execute(&sub) {
                state.pending.push_front(sub);
                return Err(e);
            }
            state.completed += 1;
            ran += 1;
        }
        if ran > 0 {
            debug!(ran, "host queue flushed");
        }
        Ok(ran)
    }

    fn execute(&self, sub: &Submission) -> GraphResult<()> {
        if let Some(blocked) = sub.waits.iter().find(|e| !e.is_complete()) {
            warn!(submission = sub.seq, event = blocked.id(), "wait on an event that has not completed");
            return Err(GraphError::invalid_operation(format!(
                "submission {} waits on event {} which has not completed",
                sub.seq,
                blocked.id()
            )));
        }
        sub.snapshot.run(&self.device)?;
        if let Some(signal) = &sub.signal {
            signal.signal();
        }
        debug!(submission = sub.seq, nodes = sub.snapshot.len(), "submission executed");
        Ok(())
    }
}

impl SubmissionQueue<ReferenceEmitter> for HostQueue {
    type Signal = HostEvent;

    fn wait_on(&self, signals: &[HostEvent]) -> GraphResult<()> {
        self.lock()?.waits.extend_from_slice(signals);
        Ok(())
    }

    fn submit(&self, exec: &HostExecutable, want_signal: bool) -> GraphResult<Option<HostEvent>> {
        let snapshot = exec.snapshot()?;
        let mut state = self.lock()?;
        state.submitted += 1;
        let sub = Submission {
            seq: state.submitted,
            snapshot,
            waits: std::mem::take(&mut state.waits),
            signal: want_signal.then(HostEvent::new),
        };
        let signal = sub.signal.clone();
        match self.mode {
            QueueMode::Immediate => {
                self.execute(&sub)?;
                state.completed += 1;
            }
            QueueMode::Deferred => state.pending.push_back(sub),
        }
        Ok(signal)
    }
}
