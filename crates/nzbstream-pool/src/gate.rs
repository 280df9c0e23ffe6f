//! Counting gate with reservation-aware acquisition
//!
//! `acquire(reserved)` only succeeds while more than `reserved` permits are
//! free, and then takes exactly one. A caller with `reserved = 0` therefore
//! gets in as soon as a single permit frees up, while a caller reserving `k`
//! waits for `k + 1`.

use std::pin::pin;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::cancel::CancellationToken;
use crate::error::{PoolError, PoolResult};

#[derive(Debug)]
struct GateState {
    available: usize,
    closed: bool,
}

/// Counting gate used by [`crate::ConnectionPool`]
#[derive(Debug)]
pub struct SlotGate {
    state: Mutex<GateState>,
    notify: Notify,
}

impl SlotGate {
    /// Create a gate seeded with `permits`
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(GateState {
                available: permits,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Wait for more than `reserved` free permits and take one
    pub async fn acquire(&self, reserved: usize, cancel: &CancellationToken) -> PoolResult<()> {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            if self.try_acquire(reserved)? {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(PoolError::Cancelled);
            }

            tokio::select! {
                () = notified => {}
                () = cancel.cancelled() => return Err(PoolError::Cancelled),
            }
        }
    }

    /// Take a permit without waiting
    ///
    /// Returns `Ok(false)` when not enough permits are free.
    pub fn try_acquire(&self, reserved: usize) -> PoolResult<bool> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::Disposed);
        }
        if state.available > reserved {
            state.available -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    /// Return `permits` to the gate
    pub fn release(&self, permits: usize) {
        if permits == 0 {
            return;
        }
        self.state.lock().available += permits;
        self.notify.notify_waiters();
    }

    /// Snapshot of currently free permits
    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    /// Fail all current and future waiters with [`PoolError::Disposed`]
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Whether [`SlotGate::close`] was called
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
