//! Cooperative cancellation for blocking pool operations
//!
//! A cancellation pair is created per acquire call (or shared across a
//! batch of them). The [`CancelToken`] travels with the blocked operation,
//! while the [`Canceller`] stays with whoever decides to abort it. Firing
//! is sticky: once cancelled, every clone of the token observes the
//! cancellation forever.

use crossbeam::channel::{bounded, never, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::Arc;

/// Create a connected `(Canceller, CancelToken)` pair.
///
/// Dropping the last [`Canceller`] clone also fires the token, so the
/// canceller doubles as a cancel-on-drop guard.
///
/// # Examples
///
/// ```
/// use respool::cancellation;
///
/// let (canceller, token) = cancellation();
/// assert!(!token.is_cancelled());
///
/// canceller.cancel();
/// assert!(token.is_cancelled());
/// ```
pub fn cancellation() -> (Canceller, CancelToken) {
    let (tx, rx) = bounded::<()>(0);
    let canceller = Canceller {
        tx: Arc::new(Mutex::new(Some(tx))),
    };
    (canceller, CancelToken { rx })
}

/// The firing half of a cancellation pair.
///
/// Clones share the same underlying signal; cancelling through any clone
/// fires every associated [`CancelToken`].
#[derive(Debug, Clone)]
pub struct Canceller {
    tx: Arc<Mutex<Option<Sender<()>>>>,
}

impl Canceller {
    /// Fire the cancellation signal. Idempotent.
    pub fn cancel(&self) {
        // Dropping the sender disconnects the channel, which is the
        // observable "fired" state for every token clone.
        self.tx.lock().take();
    }

    /// Whether [`cancel`](Self::cancel) has already been called.
    pub fn is_cancelled(&self) -> bool {
        self.tx.lock().is_none()
    }
}

/// The observing half of a cancellation pair, passed into
/// [`Pool::get`](crate::Pool::get).
// TODO: add a deadline-backed constructor once `get` grows a per-call
// timeout variant.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
}

impl CancelToken {
    /// A token that never fires, for callers that do not need
    /// cancellation.
    pub fn never() -> Self {
        Self { rx: never() }
    }

    /// Whether the paired [`Canceller`] has fired.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// The raw channel endpoint, for multiplexing inside `select!`.
    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}
