//! # Snapsync
//!
//! Client-side state synchronization: every remote call runs through a
//! uniform async lifecycle, folds into one immutable snapshot, and can be
//! cancelled by the UI element that started it.
//!
//! ## Core Concepts
//!
//! - [`Action`] = one state-transition attempt (an intent, or an async
//!   request in its `pending`, `success` or `error` phase)
//! - [`Snapshot`] = the whole client state (user aggregate, caches, ledger)
//! - [`Scope`] = the set of operations owned by one UI element
//!
//! ## Architecture
//!
//! ```text
//! UI element
//!     │
//!     ▼ api.fetch_*(&scope, ..)
//! Scope.run_async ───► guard(request) ──► Transport
//!     │                     │
//!     ▼ pending             ▼ success | error   (suppressed after drain)
//! Store.dispatch ◄──────────┘
//!     │
//!     ├─► reduce_user    (revision merge / increment)
//!     ├─► reduce_caches  (keyed caches)
//!     └─► ledger::reduce (is_fetching, last_error)
//!     │
//!     ▼
//! ActionBus ──► taps (notifier, audit, tests)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Pending first** - every async request emits `pending` before its
//!    single terminal action. `pending` goes out when the request future is
//!    first polled, not when it is created
//! 2. **Errors are data** - request failures become `error` actions, never
//!    `Err` returns; only the auth precondition fails eagerly
//! 3. **Drain is final** - nothing chained on a drained operation ever runs
//! 4. **Reference equality means unchanged** - reducers return their input
//!    `Arc` when an action does not apply
//! 5. **Stale servers lose** - a response with an older revision never
//!    overwrites a newer local edit
//!
//! ## Example
//!
//! ```ignore
//! use snapsync::{Config, Engine};
//!
//! let handle = Engine::builder(my_transport)
//!     .with_config(Config::from_env()?)
//!     .build()?
//!     .start();
//!
//! let scope = handle.scope();
//! if let Some(stats) = handle.api().fetch_labor_stats(&scope, "75", "job1").await? {
//!     println!("{} offers", stats.count);
//! }
//!
//! let snapshot = handle.snapshot();
//! assert!(!snapshot.ledger.is_fetching("stats:75:job1"));
//! ```

// Core modules
mod action;
mod bus;
pub mod cache;
mod cancel;
mod envelope;
mod error;
mod ledger;
mod model;
mod reducer;
mod revision;
mod scope;
mod store;

// Context and collaborators
mod api;
mod config;
mod engine;
mod session;
mod storage;
mod tap;
mod transport;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// End-to-end tests (test-only)
#[cfg(test)]
mod scenario_tests;

// Re-export action types
pub use action::{
    Action, ActionKind, AsyncAction, AsyncOp, Envelope, FetchAdviceContent, FetchAdviceTips,
    FetchJobGroup, FetchLaborStats, FetchUser, Outcome, Phase, RequestId, SaveUser,
    UpdateProject,
};

// Re-export error types
pub use error::{ActionError, SyncError};

// Re-export state types
pub use cache::{CacheKey, KeyedCache, KEY_SEPARATOR};
pub use ledger::FetchingLedger;
pub use model::{
    AdviceContent, AdviceKey, AdviceTip, JobGroup, LaborStats, LaborStatsKey, Profile, Project,
    User,
};
pub use reducer::{reduce, reduce_caches, reduce_user, AppCaches, Snapshot};
pub use revision::{increment, merge, winner, Revision, Revisioned, Winner};

// Re-export lifecycle types
pub use bus::ActionBus;
pub use cancel::{wrap, CancelHandle, Guarded};
pub use envelope::{run_async, RunOptions};
pub use scope::Scope;
pub use store::Store;

// Re-export engine types (primary entry point)
pub use api::Api;
pub use config::Config;
pub use engine::{Engine, EngineBuilder, EngineHandle};
pub use session::{Credentials, Session};
pub use storage::{FileStorage, KeyValueStore, MemoryStorage, StorageError};
pub use tap::{ActionTap, Notifier, NotifyTap, TapContext};
pub use transport::Transport;

// Re-export commonly used external types
pub use async_trait::async_trait;
