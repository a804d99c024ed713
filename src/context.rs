//! Cancellable, deadline-aware request context.
//!
//! A [`RequestContext`] travels with a request in its [`Extensions`](axum::http::Extensions)
//! and is what downstream code consults to find out whether it should keep
//! working. It pairs a [`CancellationToken`] with an optional absolute deadline.
//!
//! # Lifecycle
//!
//! ```text
//! background() ──with_deadline(t)──▶ child (deadline = min(parent, t))
//!                                      │
//!                                      ├─ timer fires at t ──▶ cancelled (DeadlineExceeded)
//!                                      └─ CancelGuard dropped ─▶ cancelled (Cancelled)
//! ```
//!
//! Cancelling a parent cancels every child derived from it. A child never
//! outlives its parent's deadline.
//!
//! # Usage
//!
//! ```rust,ignore
//! async fn handler(ctx: RequestContext) -> AppResult<String> {
//!     let rows = ctx.run(load_rows()).await?;
//!     Ok(format!("{} rows", rows.len()))
//! }
//! ```

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::Request;
use axum::http::request::Parts;
use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Why a context stopped accepting work.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("context cancelled")]
    Cancelled,
}

/// Request-scoped cancellation handle with an optional deadline.
///
/// Cloning is cheap and every clone observes the same cancellation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<DateTime<Utc>>,
    /// Set once the deadline has been observed to pass.
    expired: Arc<AtomicBool>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}

impl RequestContext {
    /// A root context with no deadline that is never cancelled on its own.
    pub fn background() -> Self {
        Self::from_token(CancellationToken::new())
    }

    /// A root context bound to an externally owned token, e.g. a shutdown signal.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
            expired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The absolute deadline, if one has been installed.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Time left until the deadline. Zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|deadline| {
            if self.expired.load(Ordering::SeqCst) {
                Duration::ZERO
            } else {
                until(deadline)
            }
        })
    }

    /// Whether work bound to this context should stop.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline_passed()
    }

    /// The reason this context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if self.deadline_passed() {
            Some(ContextError::DeadlineExceeded)
        } else if self.token.is_cancelled() {
            Some(ContextError::Cancelled)
        } else {
            None
        }
    }

    /// Wait until the context is cancelled or its deadline passes.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep(until(deadline)) => {
                        self.expired.store(true, Ordering::SeqCst);
                    }
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Derive a child context bound to `deadline`.
    ///
    /// The child's deadline is the earlier of `deadline` and this context's own.
    /// The returned guard cancels the child when dropped.
    pub fn with_deadline(&self, deadline: DateTime<Utc>) -> (RequestContext, CancelGuard) {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        self.derive(Some(deadline))
    }

    /// Derive a child context whose deadline is `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> (RequestContext, CancelGuard) {
        match TimeDelta::from_std(timeout)
            .ok()
            .and_then(|delta| Utc::now().checked_add_signed(delta))
        {
            Some(deadline) => self.with_deadline(deadline),
            None => self.with_cancel(),
        }
    }

    /// Derive a child context with its own cancel trigger and the parent's deadline.
    pub fn with_cancel(&self) -> (RequestContext, CancelGuard) {
        self.derive(self.deadline)
    }

    /// Drive `fut` to completion unless the context finishes first.
    ///
    /// Returns immediately if the context is already done.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }

        tokio::select! {
            biased;
            output = fut => Ok(output),
            _ = self.cancelled() => Err(self.err().unwrap_or(ContextError::Cancelled)),
        }
    }

    fn derive(&self, deadline: Option<DateTime<Utc>>) -> (RequestContext, CancelGuard) {
        let child = RequestContext {
            token: self.token.child_token(),
            deadline,
            expired: Arc::new(AtomicBool::new(false)),
        };
        child.arm_timer();

        let guard = CancelGuard {
            _guard: child.token.clone().drop_guard(),
        };
        (child, guard)
    }

    /// Spawn a task that cancels the token at the deadline.
    ///
    /// Without a runtime the deadline is still observed lazily by
    /// `is_cancelled` and `cancelled`.
    fn arm_timer(&self) {
        let Some(deadline) = self.deadline else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let token = self.token.clone();
        let expired = self.expired.clone();
        handle.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(until(deadline)) => {
                    expired.store(true, Ordering::SeqCst);
                    token.cancel();
                }
            }
        });
    }

    fn deadline_passed(&self) -> bool {
        self.expired.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Utc::now() >= d)
    }
}

/// Cancels the context it was created with when dropped.
///
/// Holding the guard for the duration of a request releases the timer task
/// on every exit path, including unwinding and the request future being dropped.
#[derive(Debug)]
#[must_use = "dropping the guard cancels the context immediately"]
pub struct CancelGuard {
    _guard: DropGuard,
}

impl CancelGuard {
    /// Cancel the guarded context now.
    pub fn cancel(self) {
        drop(self);
    }
}

/// Time until `deadline`, saturating at zero.
fn until(deadline: DateTime<Utc>) -> Duration {
    (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

/// Extension trait for reading and replacing the context carried by a request.
pub trait RequestContextExt {
    /// The request's context, or a fresh background context if none is attached.
    fn context(&self) -> RequestContext;

    /// The deadline of the attached context, if any.
    fn deadline(&self) -> Option<DateTime<Utc>>;

    /// Replace the attached context.
    fn with_context(self, ctx: RequestContext) -> Self;
}

impl<B> RequestContextExt for Request<B> {
    fn context(&self) -> RequestContext {
        self.extensions()
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_default()
    }

    fn deadline(&self) -> Option<DateTime<Utc>> {
        self.extensions()
            .get::<RequestContext>()
            .and_then(RequestContext::deadline)
    }

    fn with_context(mut self, ctx: RequestContext) -> Self {
        self.extensions_mut().insert(ctx);
        self
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_default())
    }
}
