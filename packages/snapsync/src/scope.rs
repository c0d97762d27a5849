//! Cancellation scope: owns every guarded operation started on behalf of
//! one UI element, and cancels them all when that element goes away.
//!
//! # Lifecycle
//!
//! ```text
//! Scope::new(store)
//!  ├── guard(fut)        wrap + register, returns Guarded<T>
//!  ├── run_async::<Op>   envelope around a guarded request
//!  ├── spawn(chain)      task dropped on drain
//!  └── drain()           cancel everything (once; also on Drop)
//! ```
//!
//! # Drain and the Fetching Ledger
//!
//! A request cancelled by `drain` never dispatches its terminal action, so
//! its ledger entry stays `true`. With `release_on_drain` the scope
//! dispatches `FetchAbandoned` for every request it was still running,
//! which resets those entries.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::action::{Action, AsyncOp};
use crate::cancel::{self, CancelHandle, Guarded};
use crate::envelope::{self, RunOptions};
use crate::store::Store;

pub struct Scope {
    store: Arc<Store>,
    root: CancellationToken,
    operations: Mutex<Vec<CancelHandle>>,
    /// Ticket id -> dedup key of requests started through `run_async`.
    inflight: DashMap<u64, String>,
    next_ticket: AtomicU64,
    release_on_drain: bool,
    drained: AtomicBool,
}

impl Scope {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            root: CancellationToken::new(),
            operations: Mutex::new(Vec::new()),
            inflight: DashMap::new(),
            next_ticket: AtomicU64::new(0),
            release_on_drain: false,
            drained: AtomicBool::new(false),
        }
    }

    /// Dispatch `FetchAbandoned` for unfinished requests on drain.
    pub fn release_on_drain(mut self, release: bool) -> Self {
        self.release_on_drain = release;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Wrap `future` in a cancellable operation owned by this scope.
    ///
    /// Guarding on a drained scope is allowed; the result never resolves.
    pub fn guard<F>(&self, future: F) -> Guarded<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (guarded, handle) = cancel::wrap_with_token(future, self.root.child_token());
        let mut operations = self
            .operations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        operations.retain(|op| !op.is_settled());
        operations.push(handle);
        guarded
    }

    /// Spawn a consumer chain that is dropped, not resumed, on drain.
    ///
    /// Resolves to `None` if the scope drained first.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let token = self.root.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => None,
                output = future => Some(output),
            }
        })
    }

    /// Run `request` through the envelope of `Op`, guarded by this scope.
    ///
    /// After `drain`, the returned future never resolves and no terminal
    /// action is dispatched. Started on an already drained scope, it
    /// dispatches nothing at all. Run it under [`Scope::spawn`] when the caller
    /// must not be left parked.
    pub async fn run_async<Op, F, Fut>(
        &self,
        payload: Op::Payload,
        options: RunOptions,
        request: F,
    ) -> Option<Op::Response>
    where
        Op: AsyncOp,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Op::Response>> + Send + 'static,
    {
        if self.is_drained() {
            debug!(kind = %Op::KIND, "scope drained, request not started");
            return std::future::pending().await;
        }

        let dedup_key = options
            .dedup_key
            .clone()
            .unwrap_or_else(|| Op::KIND.as_str().to_string());
        let mut ticket = None;

        envelope::run_async::<Op, _, _>(&self.store, payload, options, || {
            // Issued after `pending`, so a drain that sees it releases it last
            let issued = ticket.insert(InflightTicket::issue(self, dedup_key));
            if self.is_drained() && self.release_on_drain {
                // The drain ran before this ticket existed
                if let Some(dedup_key) = issued.claim() {
                    self.release(dedup_key);
                }
            }
            self.guard(request())
        })
        .await
    }

    /// Cancel every registered operation. Runs at most once.
    pub fn drain(&self) {
        if self.drained.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut abandoned = BTreeSet::new();
        self.inflight.retain(|_, dedup_key| {
            abandoned.insert(dedup_key.clone());
            false
        });
        let operations = std::mem::take(
            &mut *self
                .operations
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        let pending = operations.iter().filter(|op| !op.is_settled()).count();

        for op in &operations {
            op.cancel();
        }
        self.root.cancel();

        info!(
            pending,
            abandoned = abandoned.len(),
            release = self.release_on_drain,
            "scope drained"
        );

        if self.release_on_drain {
            for dedup_key in abandoned {
                self.release(dedup_key);
            }
        }
    }

    fn release(&self, dedup_key: String) {
        debug!(dedup_key = %dedup_key, "releasing abandoned fetch");
        self.store.dispatch(Action::FetchAbandoned { dedup_key });
    }

    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::Acquire)
    }

    /// Registered operations that have not settled yet.
    pub fn pending_count(&self) -> usize {
        self.operations
            .lock()
            .map(|operations| operations.iter().filter(|op| !op.is_settled()).count())
            .unwrap_or(0)
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.drain();
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("pending", &self.pending_count())
            .field("inflight", &self.inflight.len())
            .field("drained", &self.is_drained())
            .finish()
    }
}

/// RAII record of one `run_async` call, removed when the call finishes or
/// is dropped, or claimed by `drain`.
struct InflightTicket<'a> {
    inflight: &'a DashMap<u64, String>,
    id: u64,
}

impl<'a> InflightTicket<'a> {
    fn issue(scope: &'a Scope, dedup_key: String) -> Self {
        let id = scope.next_ticket.fetch_add(1, Ordering::Relaxed);
        scope.inflight.insert(id, dedup_key);
        Self {
            inflight: &scope.inflight,
            id,
        }
    }
}

impl InflightTicket<'_> {
    /// Take the dedup key unless a drain already took it.
    fn claim(&self) -> Option<String> {
        self.inflight.remove(&self.id).map(|(_, dedup_key)| dedup_key)
    }
}

impl Drop for InflightTicket<'_> {
    fn drop(&mut self) {
        self.inflight.remove(&self.id);
    }
}
