//! Acquisition context threaded from callers down to the pool
//!
//! Background work (ingest, repair) passes a non-zero `reserved_slots` so
//! that it only takes a connection while at least that many remain free for
//! interactive reads.

use crate::cancel::CancellationToken;

/// Admission priority derived from a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Interactive reads
    High,
    /// Bulk background work
    Low,
}

/// Cancellation plus reservation, passed explicitly through every call
#[derive(Debug, Clone, Default)]
pub struct AcquireContext {
    /// Token aborting the operation
    pub cancel: CancellationToken,
    /// Pool slots that must stay free for other callers
    pub reserved_slots: usize,
}

impl AcquireContext {
    /// Context for an interactive read
    pub fn foreground(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            reserved_slots: 0,
        }
    }

    /// Context for background work that leaves `reserved_slots` untouched
    pub fn background(cancel: CancellationToken, reserved_slots: usize) -> Self {
        Self {
            cancel,
            reserved_slots,
        }
    }

    /// Same reservation, different token
    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            reserved_slots: self.reserved_slots,
        }
    }

    /// Priority used by the admission gate
    pub fn priority(&self) -> Priority {
        if self.reserved_slots == 0 {
            Priority::High
        } else {
            Priority::Low
        }
    }

    /// Shortcut for `self.cancel.is_cancelled()`
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_from_reservation() {
        let token = CancellationToken::new();
        assert_eq!(
            AcquireContext::foreground(token.clone()).priority(),
            Priority::High
        );
        assert_eq!(
            AcquireContext::background(token, 3).priority(),
            Priority::Low
        );
    }

    #[test]
    fn test_with_cancel_keeps_reservation() {
        let ctx = AcquireContext::background(CancellationToken::new(), 2);
        let other = CancellationToken::new();
        other.cancel();
        let derived = ctx.with_cancel(other);
        assert_eq!(derived.reserved_slots, 2);
        assert!(derived.is_cancelled());
        assert!(!ctx.is_cancelled());
    }
}
