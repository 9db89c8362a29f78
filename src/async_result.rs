//! Single-assignment request/response cells.
//!
//! Each provider operation returns a [`ProviderFuture`] immediately and keeps
//! the matching [`ProviderRequest`] until the outcome is known. The first
//! call to [`ProviderRequest::complete`] or [`ProviderRequest::fail`] wins;
//! later calls report [`AsyncResultError::AlreadyResolved`] and leave the
//! stored outcome untouched.
//!
//! The future can be awaited on any executor, polled with
//! [`ProviderFuture::try_result`], or blocked on with
//! [`ProviderFuture::wait`]. The cell only uses `std` synchronisation so the
//! worker never depends on the caller's runtime.

#[cfg(not(loom))]
use std::sync::{Condvar, Mutex, MutexGuard, atomic::AtomicUsize};
use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, PoisonError, atomic::Ordering},
    task::{Context, Poll, Waker},
    time::{Duration, Instant},
};

#[cfg(loom)]
use loom::sync::{Condvar, Mutex, MutexGuard, atomic::AtomicUsize};
use thiserror::Error;

use crate::error::ProviderError;

/// Errors reported by [`ProviderRequest`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum AsyncResultError {
    /// The cell already holds an outcome.
    #[error("request already resolved")]
    AlreadyResolved,
}

enum Slot<T> {
    Pending,
    Ready(Result<T, ProviderError>),
    Taken,
}

struct State<T> {
    slot: Slot<T>,
    waker: Option<Waker>,
}

struct Cell<T> {
    state: Mutex<State<T>>,
    resolved: Condvar,
    completers: AtomicUsize,
}

impl<T> Cell<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, outcome: Result<T, ProviderError>) -> Result<(), AsyncResultError> {
        let mut state = self.lock();
        if !matches!(state.slot, Slot::Pending) {
            return Err(AsyncResultError::AlreadyResolved);
        }
        state.slot = Slot::Ready(outcome);
        let waker = state.waker.take();
        drop(state);
        self.resolved.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }

    fn is_done(&self) -> bool { !matches!(self.lock().slot, Slot::Pending) }
}

/// Create a connected completer/observer pair.
#[must_use]
pub fn pair<T>() -> (ProviderRequest<T>, ProviderFuture<T>) {
    let cell = Arc::new(Cell {
        state: Mutex::new(State {
            slot: Slot::Pending,
            waker: None,
        }),
        resolved: Condvar::new(),
        completers: AtomicUsize::new(1),
    });
    (
        ProviderRequest {
            cell: Arc::clone(&cell),
        },
        ProviderFuture { cell },
    )
}

/// Completion side of a pending operation.
///
/// Clones resolve the same cell. When the last clone is dropped while the
/// cell is still pending, the observer sees [`ProviderError::Closed`].
pub struct ProviderRequest<T> {
    cell: Arc<Cell<T>>,
}

impl<T> ProviderRequest<T> {
    /// Resolve with a value.
    ///
    /// # Errors
    ///
    /// Returns [`AsyncResultError::AlreadyResolved`] if an outcome is already
    /// stored.
    pub fn complete(&self, value: T) -> Result<(), AsyncResultError> { self.cell.resolve(Ok(value)) }

    /// Resolve with a failure.
    ///
    /// # Errors
    ///
    /// Returns [`AsyncResultError::AlreadyResolved`] if an outcome is already
    /// stored.
    pub fn fail(&self, cause: ProviderError) -> Result<(), AsyncResultError> {
        self.cell.resolve(Err(cause))
    }

    /// Whether an outcome has been stored.
    #[must_use]
    pub fn is_done(&self) -> bool { self.cell.is_done() }
}

impl<T> Clone for ProviderRequest<T> {
    fn clone(&self) -> Self {
        self.cell.completers.fetch_add(1, Ordering::Relaxed);
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> Drop for ProviderRequest<T> {
    fn drop(&mut self) {
        if self.cell.completers.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _ = self.cell.resolve(Err(ProviderError::Closed));
        }
    }
}

impl<T> std::fmt::Debug for ProviderRequest<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRequest")
            .field("done", &self.is_done())
            .finish()
    }
}

/// Observer side of a pending operation.
#[must_use = "futures do nothing unless awaited or waited on"]
pub struct ProviderFuture<T> {
    cell: Arc<Cell<T>>,
}

impl<T> ProviderFuture<T> {
    /// A future that is already resolved with `value`.
    pub fn ready(value: T) -> Self {
        let (request, future) = pair();
        let _ = request.complete(value);
        future
    }

    /// A future that has already failed with `cause`.
    pub fn failed(cause: ProviderError) -> Self {
        let (request, future) = pair();
        let _ = request.fail(cause);
        future
    }

    /// Whether an outcome is available.
    #[must_use]
    pub fn is_done(&self) -> bool { self.cell.is_done() }

    /// Take the outcome if one is available, without blocking.
    ///
    /// Returns `None` while pending and after the outcome has been taken.
    pub fn try_result(&mut self) -> Option<Result<T, ProviderError>> {
        let mut state = self.cell.lock();
        take_ready(&mut state.slot)
    }

    /// Block the calling thread until the outcome is available.
    ///
    /// # Errors
    ///
    /// Returns the stored failure, or [`ProviderError::Timeout`] when
    /// `timeout` elapses first.
    pub fn wait(self, timeout: Option<Duration>) -> Result<T, ProviderError> {
        let deadline = timeout.map(|t| (t, Instant::now() + t));
        let mut state = self.cell.lock();
        loop {
            if let Some(outcome) = take_ready(&mut state.slot) {
                return outcome;
            }
            if matches!(state.slot, Slot::Taken) {
                return Err(taken());
            }
            state = match deadline {
                None => self
                    .cell
                    .resolved
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some((limit, at)) => {
                    let remaining = at.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(ProviderError::Timeout(limit));
                    }
                    self.cell
                        .resolved
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

fn take_ready<T>(slot: &mut Slot<T>) -> Option<Result<T, ProviderError>> {
    match std::mem::replace(slot, Slot::Taken) {
        Slot::Ready(outcome) => Some(outcome),
        other => {
            *slot = other;
            None
        }
    }
}

fn taken() -> ProviderError { ProviderError::IllegalState("result already taken".into()) }

impl<T> Future for ProviderFuture<T> {
    type Output = Result<T, ProviderError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.cell.lock();
        if let Some(outcome) = take_ready(&mut state.slot) {
            return Poll::Ready(outcome);
        }
        if matches!(state.slot, Slot::Taken) {
            return Poll::Ready(Err(taken()));
        }
        match &state.waker {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            _ => state.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

impl<T> std::fmt::Debug for ProviderFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderFuture")
            .field("done", &self.is_done())
            .finish()
    }
}
