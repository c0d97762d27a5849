//! Async action envelope: runs one request function through the
//! `pending → success | error` lifecycle.
//!
//! # Flow
//!
//! ```text
//! run_async::<Op>(store, payload, options, request)
//!  → dispatch pending              (before the request is even built)
//!  → request().await
//!      Ok(response)  → dispatch success, return Some(response)
//!      Err(e)        → dispatch error,   return None
//!      panic         → dispatch error,   return None
//! ```
//!
//! Errors stop here. The caller only ever sees `Option<Response>`; failures
//! surface through the `error` action, which the fetching ledger and the
//! notifier observe.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

use futures::FutureExt;
use tracing::{debug, warn};

use crate::action::{AsyncOp, Envelope, Outcome};
use crate::error::ActionError;
use crate::store::Store;

/// Per-invocation options of [`run_async`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Ledger key; defaults to the action kind's name.
    pub dedup_key: Option<String>,
    /// Keep a failure out of the user-visible error slot.
    pub ignore_failure: bool,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dedup_key(mut self, dedup_key: impl Into<String>) -> Self {
        self.dedup_key = Some(dedup_key.into());
        self
    }

    pub fn ignore_failure(mut self) -> Self {
        self.ignore_failure = true;
        self
    }
}

/// Run `request` inside the async lifecycle of `Op`.
///
/// The `pending` action is dispatched on first poll, strictly before
/// `request` is invoked. Exactly one terminal action follows it.
pub async fn run_async<Op, F, Fut>(
    store: &Store,
    payload: Op::Payload,
    options: RunOptions,
    request: F,
) -> Option<Op::Response>
where
    Op: AsyncOp,
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<Op::Response>>,
{
    let pending = Envelope::pending(Op::KIND, payload, options.dedup_key, options.ignore_failure);
    debug!(
        kind = %Op::KIND,
        dedup_key = %pending.dedup_key,
        request_id = %pending.request_id,
        "request pending"
    );
    store.dispatch(Op::wrap(pending.clone()));

    let outcome = match panic::catch_unwind(AssertUnwindSafe(request)) {
        Ok(future) => match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(ActionError::from_error(&e)),
            Err(payload) => Err(ActionError::from_panic(payload)),
        },
        // Building the request panicked before any future existed
        Err(payload) => Err(ActionError::from_panic(payload)),
    };

    match outcome {
        Ok(response) => {
            debug!(
                kind = %Op::KIND,
                request_id = %pending.request_id,
                "request succeeded"
            );
            store.dispatch(Op::wrap(pending.settle(Outcome::Success(response.clone()))));
            Some(response)
        }
        Err(error) => {
            warn!(
                kind = %Op::KIND,
                dedup_key = %pending.dedup_key,
                ignore_failure = pending.ignore_failure,
                error = %error,
                "request failed"
            );
            store.dispatch(Op::wrap(pending.settle(Outcome::Error(error))));
            None
        }
    }
}
