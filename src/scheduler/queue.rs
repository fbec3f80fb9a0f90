//! Bounded FIFO request queue shared by the host and the worker.
//!
//! Capacity bounds *outstanding* requests: queued, executing, or completed
//! but not yet handed back to the host. A host that stops draining therefore
//! sees `QueueFull` rather than unbounded completion growth.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use super::request::Request;
use crate::error::{ErrorKind, Result, RuntimeError};
use crate::session::SessionId;
use crate::telemetry;

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 8;

/// A request with its assigned sequence id and cancellation flag.
pub(crate) struct QueuedRequest {
    pub id: u64,
    pub session: SessionId,
    pub request: Request,
    pub cancelled: Arc<AtomicBool>,
    pub enqueued_at: Instant,
}

impl std::fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("id", &self.id)
            .field("session", &self.session)
            .field("cancelled", &self.cancelled.load(Ordering::Acquire))
            .finish()
    }
}

/// Result of [`RequestQueue::cancel`].
pub(crate) enum CancelAction {
    /// Removed before execution; the caller posts its completion.
    Removed(QueuedRequest),
    /// Currently executing; the flag is set.
    Flagged,
    NotFound,
}

struct QueueState {
    pending: VecDeque<QueuedRequest>,
    in_flight: Option<(u64, Arc<AtomicBool>)>,
    outstanding: usize,
    accepting: bool,
    next_id: u64,
}

pub(crate) struct RequestQueue {
    state: Mutex<QueueState>,
    /// Signalled when work is queued or the queue closes.
    work: Condvar,
    /// Signalled when outstanding capacity frees up or the queue closes.
    space: Condvar,
    capacity: usize,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                in_flight: None,
                outstanding: 0,
                accepting: true,
                next_id: 0,
            }),
            work: Condvar::new(),
            space: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue, failing immediately when full. With a deadline, wait for
    /// space until the deadline passes.
    pub fn push(&self, request: Request, deadline: Option<Instant>) -> Result<u64> {
        let mut state = self.state.lock();
        loop {
            if !state.accepting {
                return Err(RuntimeError::new(ErrorKind::Shutdown, "dispatcher is shutting down"));
            }
            if state.outstanding < self.capacity {
                break;
            }
            let Some(deadline) = deadline else {
                return Err(queue_full(self.capacity));
            };
            if self.space.wait_until(&mut state, deadline).timed_out() && state.outstanding >= self.capacity {
                return Err(if state.accepting {
                    queue_full(self.capacity)
                } else {
                    RuntimeError::new(ErrorKind::Shutdown, "dispatcher is shutting down")
                });
            }
        }

        let id = state.next_id;
        state.next_id += 1;
        state.outstanding += 1;
        state.pending.push_back(QueuedRequest {
            id,
            session: request.session_id(),
            request,
            cancelled: Arc::new(AtomicBool::new(false)),
            enqueued_at: Instant::now(),
        });
        telemetry::record_queue_depth(state.pending.len());
        drop(state);
        self.work.notify_one();
        Ok(id)
    }

    /// Block until work is available. Returns `None` once the queue is
    /// closed and empty. The returned request is marked in flight.
    pub fn next(&self) -> Option<QueuedRequest> {
        let mut state = self.state.lock();
        while state.pending.is_empty() && state.accepting {
            self.work.wait(&mut state);
        }
        let job = state.pending.pop_front()?;
        state.in_flight = Some((job.id, Arc::clone(&job.cancelled)));
        telemetry::record_queue_depth(state.pending.len());
        Some(job)
    }

    pub fn finish_in_flight(&self) {
        self.state.lock().in_flight = None;
    }

    pub fn cancel(&self, id: u64) -> CancelAction {
        let mut state = self.state.lock();
        if let Some(pos) = state.pending.iter().position(|q| q.id == id) {
            if let Some(job) = state.pending.remove(pos) {
                job.cancelled.store(true, Ordering::Release);
                telemetry::record_queue_depth(state.pending.len());
                return CancelAction::Removed(job);
            }
        }
        match &state.in_flight {
            Some((in_flight, flag)) if *in_flight == id => {
                flag.store(true, Ordering::Release);
                CancelAction::Flagged
            }
            _ => CancelAction::NotFound,
        }
    }

    /// Return `n` outstanding slots after records leave the dispatcher.
    pub fn release(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut state = self.state.lock();
        state.outstanding = state.outstanding.saturating_sub(n);
        drop(state);
        self.space.notify_all();
    }

    /// Stop accepting and hand back everything still pending.
    pub fn close(&self) -> Vec<QueuedRequest> {
        let mut state = self.state.lock();
        state.accepting = false;
        let pending: Vec<QueuedRequest> = state.pending.drain(..).collect();
        for job in &pending {
            job.cancelled.store(true, Ordering::Release);
        }
        telemetry::record_queue_depth(0);
        drop(state);
        self.work.notify_all();
        self.space.notify_all();
        pending
    }

    pub fn is_accepting(&self) -> bool {
        self.state.lock().accepting
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }
}

fn queue_full(capacity: usize) -> RuntimeError {
    RuntimeError::new(ErrorKind::QueueFull, format!("{} requests outstanding", capacity))
}
