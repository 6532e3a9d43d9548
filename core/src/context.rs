//! Execution context carried by a request: an optional deadline and an
//! optional cancellation token.
//!
//! Contexts are cheap to clone. Derived contexts never extend their parent:
//! `with_timeout` keeps the earlier deadline, and a child token reports
//! cancelled as soon as any ancestor does.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Cancellation handle shared by a context and its caller. Cloning yields a
/// handle to the same token.
///
/// Only the runtime-free half of `CancellationToken` is used, so the client
/// stays synchronous. `as_cancellation_token` hands the inner token to async
/// code that wants to await it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(CancellationToken);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is cancelled by its own `cancel` or by any ancestor.
    pub fn child(&self) -> Self {
        Self(self.0.child_token())
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    pub fn as_cancellation_token(&self) -> &CancellationToken {
        &self.0
    }
}

impl From<CancellationToken> for CancelToken {
    fn from(token: CancellationToken) -> Self {
        Self(token)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl Context {
    /// A context with no deadline and no cancellation.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context that expires at `deadline`, or at the parent's
    /// deadline if that comes first.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            cancel: self.cancel.clone(),
        }
    }

    /// Derive a context that expires `timeout` from now. A timeout too large
    /// to represent leaves the parent deadline untouched.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.clone(),
        }
    }

    /// Derive a cancellable context. Cancelling the returned token cancels
    /// the new context only; cancelling the parent cancels both.
    pub fn with_cancel(&self) -> (Self, CancelToken) {
        let token = match &self.cancel {
            Some(parent) => parent.child(),
            None => CancelToken::new(),
        };
        let ctx = Self {
            deadline: self.deadline,
            cancel: Some(token.clone()),
        };
        (ctx, token)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn cancel_token(&self) -> Option<&CancelToken> {
        self.cancel.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    /// `Err` if the context is already cancelled or past its deadline.
    pub fn check(&self) -> Result<(), TransportError> {
        if self.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(TransportError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}
