use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use crate::errors::{LinkError, LinkResult};

/// Call-scoped deadline and cancellation handle. Every linker and transport
/// operation accepts one; cancelling it releases pending waiters promptly.
#[derive(Clone)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Option<Receiver<()>>,
}

/// Cancels the associated context when invoked or dropped.
pub struct CancelHandle {
    _tx: Sender<()>,
}

impl CancelHandle {
    /// Cancels the context. Dropping the handle has the same effect.
    #[inline]
    pub fn cancel(self) {}
}

impl Context {
    /// A context with no deadline and no cancellation.
    #[inline]
    pub fn background() -> Context {
        Context {
            deadline: None,
            cancel: None,
        }
    }

    /// A cancelable context expiring after the given duration.
    pub fn with_timeout(timeout: Duration) -> (Context, CancelHandle) {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A cancelable context expiring at the given instant.
    pub fn with_deadline(deadline: Instant) -> (Context, CancelHandle) {
        let (tx, rx) = bounded(0);

        (
            Context {
                deadline: Some(deadline),
                cancel: Some(rx),
            },
            CancelHandle { _tx: tx },
        )
    }

    /// A cancelable context with no deadline.
    pub fn with_cancel() -> (Context, CancelHandle) {
        let (tx, rx) = bounded(0);

        (
            Context {
                deadline: None,
                cancel: Some(rx),
            },
            CancelHandle { _tx: tx },
        )
    }

    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The channel that disconnects when the context is canceled, or `None`
    /// for a non-cancelable context.
    #[inline]
    pub fn canceled(&self) -> Option<&Receiver<()>> {
        self.cancel.as_ref()
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        match &self.cancel {
            Some(rx) => matches!(rx.try_recv(), Err(TryRecvError::Disconnected)),
            None => false,
        }
    }

    /// Checks the context for expiry or cancellation without blocking.
    pub fn check(&self) -> LinkResult<()> {
        if self.is_canceled() {
            return Err(LinkError::Canceled);
        }

        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(LinkError::Timeout);
            }
        }

        Ok(())
    }
}
