//! Cancellable operation wrapper.
//!
//! [`wrap`] runs a future on its own task and hands back a [`Guarded`]
//! future plus a [`CancelHandle`]. After `cancel()`:
//!
//! - the guarded future never resolves, so nothing chained after it runs,
//!   whether the operation succeeded or failed
//! - the underlying operation is *not* aborted; its task keeps running and
//!   its result is discarded
//!
//! Anything that awaits a guarded future should therefore be owned by a
//! [`Scope`](crate::scope::Scope), which drops it on drain instead of leaving
//! it parked forever.

use std::future::Future;
use std::panic;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio_util::sync::CancellationToken;

/// Cancels one wrapped operation.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
    settled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Cancel the operation. Idempotent; a no-op once it has settled.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// True once the guarded future resolved or was dropped.
    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }
}

/// Future that resolves with the wrapped operation's output, unless the
/// operation was cancelled first.
pub struct Guarded<T> {
    inner: Pin<Box<dyn Future<Output = T> + Send>>,
    settled: Arc<AtomicBool>,
}

impl<T> Future for Guarded<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let poll = self.inner.as_mut().poll(cx);
        if poll.is_ready() {
            self.settled.store(true, Ordering::Release);
        }
        poll
    }
}

impl<T> Drop for Guarded<T> {
    fn drop(&mut self) {
        self.settled.store(true, Ordering::Release);
    }
}

impl<T> std::fmt::Debug for Guarded<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guarded")
            .field("settled", &self.settled.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

/// Wrap `future` with its own cancellation token.
///
/// Must be called inside a tokio runtime: the operation is spawned
/// immediately.
pub fn wrap<F>(future: F) -> (Guarded<F::Output>, CancelHandle)
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    wrap_with_token(future, CancellationToken::new())
}

/// Wrap `future`, cancelled whenever `token` is.
pub(crate) fn wrap_with_token<F>(
    future: F,
    token: CancellationToken,
) -> (Guarded<F::Output>, CancelHandle)
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let settled = Arc::new(AtomicBool::new(false));
    let handle = CancelHandle {
        token: token.clone(),
        settled: settled.clone(),
    };

    let task = tokio::spawn(future);
    let inner = async move {
        // Dropping the JoinHandle detaches the task, it does not abort it.
        let joined = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            joined = task => Some(joined),
        };
        match joined {
            Some(Ok(value)) if !token.is_cancelled() => value,
            Some(Err(e)) if e.is_panic() && !token.is_cancelled() => {
                panic::resume_unwind(e.into_panic())
            }
            _ => std::future::pending().await,
        }
    };

    (
        Guarded {
            inner: Box::pin(inner),
            settled,
        },
        handle,
    )
}
