//! Cooperative cancellation shared between an application and the runner.
//!
//! - `CancellationSource`: controller that triggers cancellation
//! - `CancellationToken`: cloneable handle that observes it
//! - `Registration`: callback attached to a token, detached on drop
//!
//! Everything here is synchronous; waking a blocked thread is done by
//! registering a callback that publishes into whatever the thread waits on.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Reason for cancellation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancellationReason {
    /// User-initiated cancellation
    UserCancel,
    /// Supervisor or orchestrator cancelled the run
    SupervisorCancel,
    /// Custom reason with description
    Custom(String),
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancellationReason::UserCancel => write!(f, "user cancelled"),
            CancellationReason::SupervisorCancel => write!(f, "supervisor cancelled"),
            CancellationReason::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Inner {
    reason: Option<CancellationReason>,
    next_id: u64,
    callbacks: Vec<(u64, Callback)>,
}

#[derive(Clone, Default)]
struct Shared {
    inner: Arc<Mutex<Inner>>,
}

impl Shared {
    fn reason(&self) -> Option<CancellationReason> {
        self.inner.lock().reason.clone()
    }

    fn cancel(&self, reason: CancellationReason) {
        let callbacks = {
            let mut inner = self.inner.lock();
            if inner.reason.is_some() {
                return;
            }
            inner.reason = Some(reason);
            std::mem::take(&mut inner.callbacks)
        };
        // Run outside the lock so callbacks may touch the token again.
        for (_, callback) in callbacks {
            callback();
        }
    }
}

/// A cloneable handle that can be checked for cancellation.
///
/// ```
/// use hearth_svc::{CancellationReason, CancellationSource};
///
/// let source = CancellationSource::new();
/// let token = source.token();
/// assert!(!token.is_cancelled());
///
/// source.cancel(CancellationReason::UserCancel);
/// assert!(token.is_cancelled());
/// assert_eq!(token.reason(), Some(CancellationReason::UserCancel));
/// ```
#[derive(Clone)]
pub struct CancellationToken {
    shared: Shared,
}

impl CancellationToken {
    /// Creates a token that is never cancelled.
    pub fn none() -> Self {
        Self {
            shared: Shared::default(),
        }
    }

    /// Checks if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.shared.inner.lock().reason.is_some()
    }

    /// Returns the reason for cancellation, if cancelled.
    pub fn reason(&self) -> Option<CancellationReason> {
        self.shared.reason()
    }

    /// Runs `callback` once when the token is cancelled.
    ///
    /// If the token is already cancelled the callback runs immediately on the
    /// calling thread. Dropping the returned [`Registration`] before
    /// cancellation detaches the callback.
    pub fn on_cancel<F>(&self, callback: F) -> Registration
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.shared.inner.lock();
        if inner.reason.is_some() {
            drop(inner);
            callback();
            return Registration {
                shared: self.shared.clone(),
                id: None,
            };
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.callbacks.push((id, Box::new(callback)));
        Registration {
            shared: self.shared.clone(),
            id: Some(id),
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("reason", &self.reason())
            .finish()
    }
}

/// A controller that can trigger cancellation for all of its tokens.
#[derive(Clone, Default)]
pub struct CancellationSource {
    shared: Shared,
}

impl CancellationSource {
    /// Creates a new cancellation source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token from this source.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            shared: self.shared.clone(),
        }
    }

    /// Cancels every token from this source. Only the first reason sticks.
    pub fn cancel(&self, reason: CancellationReason) {
        self.shared.cancel(reason);
    }

    /// Checks if this source has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.shared.inner.lock().reason.is_some()
    }
}

impl fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSource")
            .field("reason", &self.shared.reason())
            .finish()
    }
}

/// Callback attached with [`CancellationToken::on_cancel`].
#[must_use = "dropping a registration detaches its callback"]
pub struct Registration {
    shared: Shared,
    id: Option<u64>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.shared
                .inner
                .lock()
                .callbacks
                .retain(|(registered, _)| *registered != id);
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}
