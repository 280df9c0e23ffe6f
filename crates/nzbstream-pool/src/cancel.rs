//! Cooperative cancellation with linked child tokens
//!
//! A token can be cancelled explicitly, through its parent, or by a timer
//! attached with [`CancellationToken::with_timeout`]. Every long-running step
//! in the ingest pipeline takes a token and unwinds when it fires.

use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<TokenInner>>>,
}

impl TokenInner {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
            children: Mutex::new(Vec::new()),
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();

        // Flag is set before the list is taken, see `child_token`
        let children = std::mem::take(&mut *self.children.lock());
        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel();
            }
        }
    }
}

/// Cancellation token shared between an operation and whoever may abort it
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancellationToken {
    /// Create a new, uncancelled token
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner::new()),
        }
    }

    /// Cancel this token and every token linked below it
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Check if the token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the token is cancelled
    pub async fn cancelled(&self) {
        loop {
            let mut notified = pin!(self.inner.notify.notified());
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Create a token that is cancelled whenever this one is
    ///
    /// Cancelling the child does not affect the parent.
    pub fn child_token(&self) -> Self {
        let child = Self::new();
        let mut children = self.inner.children.lock();
        if self.is_cancelled() {
            drop(children);
            child.cancel();
            return child;
        }
        children.retain(|weak| weak.strong_count() > 0);
        children.push(Arc::downgrade(&child.inner));
        drop(children);
        child
    }

    /// Create a child token that additionally fires after `timeout`
    ///
    /// The timer is aborted when the returned guard is dropped.
    pub fn with_timeout(&self, timeout: Duration) -> TimeoutToken {
        let token = self.child_token();
        let timer_token = token.clone();
        let timer = tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(timeout) => timer_token.cancel(),
                () = timer_token.cancelled() => {}
            }
        });

        TimeoutToken {
            token,
            timer: Some(timer),
        }
    }

    /// Run `future` to completion unless the token fires first
    pub async fn run_until_cancelled<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            () = self.cancelled() => None,
            output = future => Some(output),
        }
    }
}

/// Child token linked to a parent and a timer
pub struct TimeoutToken {
    token: CancellationToken,
    timer: Option<JoinHandle<()>>,
}

impl TimeoutToken {
    /// The combined token
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl std::ops::Deref for TimeoutToken {
    type Target = CancellationToken;

    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl Drop for TimeoutToken {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
