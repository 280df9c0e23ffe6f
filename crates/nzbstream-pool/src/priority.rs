//! Two-class admission gate
//!
//! Waiters queue FIFO within their class. When a permit is released and both
//! classes are waiting, a weighted coin flip picks the class (high priority
//! wins with probability `high_priority_odds`), so low priority work is
//! slowed down but never starved.
//!
//! An acquirer may reserve `k` permits: it is only admitted while more than
//! `k` are free, and queued reserving waiters are skipped by a release that
//! would leave fewer than `k` free.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::cancel::CancellationToken;
use crate::context::Priority;
use crate::error::{PoolError, PoolResult};

/// Default probability that a released permit goes to the high priority queue
pub const DEFAULT_HIGH_PRIORITY_ODDS: f64 = 0.8;

#[derive(Debug)]
struct WaitSlot {
    granted: AtomicBool,
    notify: Notify,
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    reserved: usize,
    slot: Arc<WaitSlot>,
}

impl Waiter {
    /// The acquiring future still holds its end of the slot
    fn is_live(&self) -> bool {
        Arc::strong_count(&self.slot) > 1
    }
}

#[derive(Debug, Default)]
struct GateState {
    available: usize,
    next_id: u64,
    high: VecDeque<Waiter>,
    low: VecDeque<Waiter>,
}

impl GateState {
    fn queue_mut(&mut self, priority: Priority) -> &mut VecDeque<Waiter> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Low => &mut self.low,
        }
    }

    /// First live waiter that may take a permit while `available` stay banked
    fn pop_eligible(&mut self, priority: Priority, available: usize) -> Option<Waiter> {
        let queue = self.queue_mut(priority);
        queue.retain(Waiter::is_live);
        let position = queue.iter().position(|w| w.reserved <= available)?;
        queue.remove(position)
    }

    fn remove(&mut self, priority: Priority, id: u64) -> bool {
        let queue = self.queue_mut(priority);
        if let Some(pos) = queue.iter().position(|w| w.id == id) {
            queue.remove(pos);
            true
        } else {
            false
        }
    }
}

/// Priority gate bounding concurrent work to a fixed number of permits
#[derive(Debug)]
pub struct PriorityGate {
    state: Mutex<GateState>,
    high_priority_odds: f64,
}

impl PriorityGate {
    /// Create a gate with `permits` and the default odds
    pub fn new(permits: usize) -> Self {
        Self::with_odds(permits, DEFAULT_HIGH_PRIORITY_ODDS)
    }

    /// Create a gate with custom odds, clamped to `[0, 1]`
    pub fn with_odds(permits: usize, high_priority_odds: f64) -> Self {
        Self {
            state: Mutex::new(GateState {
                available: permits,
                ..GateState::default()
            }),
            high_priority_odds: high_priority_odds.clamp(0.0, 1.0),
        }
    }

    /// Wait for a permit in the given class
    pub async fn acquire(
        &self,
        priority: Priority,
        cancel: &CancellationToken,
    ) -> PoolResult<GatePermit<'_>> {
        self.acquire_reserving(priority, 0, cancel).await
    }

    /// Wait until more than `reserved` permits are free and take one
    pub async fn acquire_reserving(
        &self,
        priority: Priority,
        reserved: usize,
        cancel: &CancellationToken,
    ) -> PoolResult<GatePermit<'_>> {
        let mut guard = {
            let mut state = self.state.lock();
            if state.available > reserved {
                state.available -= 1;
                return Ok(GatePermit { gate: self });
            }
            if cancel.is_cancelled() {
                return Err(PoolError::Cancelled);
            }

            let id = state.next_id;
            state.next_id += 1;
            let slot = Arc::new(WaitSlot {
                granted: AtomicBool::new(false),
                notify: Notify::new(),
            });
            state.queue_mut(priority).push_back(Waiter {
                id,
                reserved,
                slot: slot.clone(),
            });
            WaitGuard {
                gate: self,
                priority,
                id,
                slot,
                completed: false,
            }
        };

        let granted = tokio::select! {
            () = guard.wait() => true,
            () = cancel.cancelled() => false,
        };
        if granted {
            guard.completed = true;
            Ok(GatePermit { gate: self })
        } else {
            Err(PoolError::Cancelled)
        }
    }

    /// Hand a permit to the next eligible waiter, or bank it
    pub fn release(&self) {
        let mut state = self.state.lock();
        let preferred = match (state.high.is_empty(), state.low.is_empty()) {
            (true, true) => {
                state.available += 1;
                return;
            }
            (false, true) => Priority::High,
            (true, false) => Priority::Low,
            (false, false) => {
                if rand::random::<f64>() < self.high_priority_odds {
                    Priority::High
                } else {
                    Priority::Low
                }
            }
        };
        let fallback = match preferred {
            Priority::High => Priority::Low,
            Priority::Low => Priority::High,
        };

        let available = state.available;
        let next = state
            .pop_eligible(preferred, available)
            .or_else(|| state.pop_eligible(fallback, available));
        match next {
            Some(waiter) => {
                trace!("Granting gate permit to waiter {}", waiter.id);
                waiter.slot.granted.store(true, Ordering::SeqCst);
                waiter.slot.notify.notify_one();
            }
            None => state.available += 1,
        }
    }

    /// Free permits right now
    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    /// Number of queued waiters per class as `(high, low)`
    pub fn waiting(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.high.len(), state.low.len())
    }
}

/// Tracks one queued acquirer; settles the slot if the wait is abandoned
struct WaitGuard<'a> {
    gate: &'a PriorityGate,
    priority: Priority,
    id: u64,
    slot: Arc<WaitSlot>,
    completed: bool,
}

impl WaitGuard<'_> {
    async fn wait(&self) {
        loop {
            if self.slot.granted.load(Ordering::SeqCst) {
                return;
            }
            self.slot.notify.notified().await;
        }
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let mut state = self.gate.state.lock();
        if state.remove(self.priority, self.id) {
            return;
        }
        drop(state);

        // Granted concurrently with cancellation: pass the permit on
        if self.slot.granted.load(Ordering::SeqCst) {
            self.gate.release();
        }
    }
}

/// Permit held while work runs; released on drop
#[derive(Debug)]
pub struct GatePermit<'a> {
    gate: &'a PriorityGate,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
