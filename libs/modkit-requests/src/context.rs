//! Call context: cancellation and deadlines for a single request.
//!
//! A [`Context`] is cheap to clone. Children created with
//! [`with_cancel`](Context::with_cancel) or [`with_timeout`](Context::with_timeout)
//! are cancelled together with their parent, and inherit the earlier of the two
//! deadlines.
//!
//! ```ignore
//! let ctx = Context::background().with_timeout(Duration::from_secs(5));
//! let resp = modkit_requests::get(&ctx, "https://example.com/", vec![]).await?;
//! ```

use crate::error::CancelReason;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Wrap an existing cancellation token (e.g. a module shutdown token).
    #[must_use]
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Child context that can be cancelled independently of its parent.
    #[must_use]
    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Child context whose deadline is `timeout` from now (or the parent's, if earlier).
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Child context with the given deadline (or the parent's, if earlier).
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancel this context and all of its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Why the context is done, or `None` while it is still live.
    ///
    /// Explicit cancellation is reported even when the deadline has also passed.
    #[must_use]
    pub fn err(&self) -> Option<CancelReason> {
        if self.token.is_cancelled() {
            return Some(CancelReason::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.token.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Sleep for `duration` unless the context finishes first.
    ///
    /// # Errors
    /// Returns the cancellation reason if the context finished before the sleep elapsed.
    pub async fn sleep(&self, duration: Duration) -> Result<(), CancelReason> {
        tokio::select! {
            biased;
            () = self.done() => Err(self.err().unwrap_or(CancelReason::Canceled)),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
