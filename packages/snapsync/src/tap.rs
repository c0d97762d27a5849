//! Action taps: observe dispatched actions without changing state.
//!
//! Taps run on the engine's background task, after the action has already
//! been reduced into the snapshot:
//!
//! ```text
//! dispatch
//!  → reducer (snapshot updated)
//!  → bus
//!  → taps   ← here (observe committed actions)
//! ```
//!
//! Taps are awaited one after another, in dispatch order, so a tap sees
//! actions in the same order as the reducer did. A failing tap is logged
//! and skipped.
//!
//! # Example
//!
//! ```ignore
//! use snapsync::{ActionTap, TapContext};
//!
//! pub struct AuditTap;
//!
//! #[async_trait]
//! impl ActionTap for AuditTap {
//!     async fn on_action(&self, action: &Action, ctx: &TapContext) -> Result<()> {
//!         tracing::info!(kind = %action.kind(), at = %ctx.timestamp, "audit");
//!         Ok(())
//!     }
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::action::{Action, RequestId};

// =============================================================================
// Tap Context
// =============================================================================

/// Context provided to action taps.
pub struct TapContext {
    /// Request id of an async action, `None` for plain intents.
    pub request_id: Option<RequestId>,
    /// When the tap run started.
    pub timestamp: DateTime<Utc>,
}

impl TapContext {
    pub fn for_action(action: &Action) -> Self {
        Self {
            request_id: action.as_async().map(|a| a.request_id()),
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Action Tap Trait
// =============================================================================

/// Observer of dispatched actions.
///
/// Errors are logged but do not affect the main flow.
#[async_trait]
pub trait ActionTap: Send + Sync + 'static {
    async fn on_action(&self, action: &Action, ctx: &TapContext) -> Result<()>;
}

// =============================================================================
// Tap Registry
// =============================================================================

#[derive(Default)]
pub(crate) struct TapRegistry {
    taps: Vec<(&'static str, Arc<dyn ActionTap>)>,
}

impl TapRegistry {
    pub fn new() -> Self {
        Self { taps: Vec::new() }
    }

    pub fn register<T: ActionTap>(&mut self, tap: T, name: &'static str) {
        self.taps.push((name, Arc::new(tap)));
    }

    /// Run every tap against one action.
    pub async fn run_all(&self, action: &Action) {
        let ctx = TapContext::for_action(action);
        for (name, tap) in &self.taps {
            if let Err(e) = tap.on_action(action, &ctx).await {
                warn!(
                    tap = %name,
                    kind = %action.kind(),
                    error = %e,
                    "tap failed"
                );
            }
        }
    }

    /// Feed taps from the bus until it closes.
    pub async fn run(self, mut receiver: broadcast::Receiver<Arc<Action>>) {
        debug!(taps = self.taps.len(), "tap loop started");
        loop {
            match receiver.recv().await {
                Ok(action) => self.run_all(&action).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "tap loop lagged, actions dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("tap loop stopped");
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }
}

impl std::fmt::Debug for TapRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapRegistry")
            .field("tap_count", &self.taps.len())
            .finish()
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// Single-slot, user-visible notification sink (a toast, a status line).
pub trait Notifier: Send + Sync + 'static {
    /// Show `message`, replacing whatever was shown before.
    fn notify(&self, message: &str);
}

/// Forwards failed, non-ignored requests to a [`Notifier`].
pub struct NotifyTap {
    notifier: Arc<dyn Notifier>,
}

impl NotifyTap {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl ActionTap for NotifyTap {
    async fn on_action(&self, action: &Action, _ctx: &TapContext) -> Result<()> {
        let Some(action) = action.as_async() else {
            return Ok(());
        };
        if action.ignore_failure() {
            return Ok(());
        }
        if let Some(error) = action.error().filter(|e| !e.is_empty()) {
            self.notifier.notify(&error.message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::action::{ActionKind, AsyncOp, Envelope, FetchJobGroup, FetchUser};
    use crate::error::ActionError;
    use crate::model::User;
    use crate::testing::RecordingNotifier;

    struct CountingTap {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ActionTap for CountingTap {
        async fn on_action(&self, _action: &Action, _ctx: &TapContext) -> Result<()> {
            self.count.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct FailingTap;

    #[async_trait]
    impl ActionTap for FailingTap {
        async fn on_action(&self, _action: &Action, _ctx: &TapContext) -> Result<()> {
            anyhow::bail!("sink unavailable")
        }
    }

    fn failed_fetch(ignore_failure: bool, message: &str) -> Action {
        FetchUser::wrap(
            Envelope::<String, User>::pending(ActionKind::FetchUser, "u1".into(), None, ignore_failure)
                .fail(ActionError::new(message))
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_failing_tap_does_not_stop_the_others() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = TapRegistry::new();
        registry.register(FailingTap, "failing");
        registry.register(
            CountingTap {
                count: count.clone(),
            },
            "counting",
        );

        registry.run_all(&Action::ClearError).await;
        registry.run_all(&Action::Logout).await;

        assert_eq!(count.load(Ordering::Relaxed), 2);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_run_stops_when_bus_closes() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut registry = TapRegistry::new();
        registry.register(
            CountingTap {
                count: count.clone(),
            },
            "counting",
        );

        let (tx, rx) = broadcast::channel(8);
        tx.send(Arc::new(Action::ClearError)).unwrap();
        tx.send(Arc::new(Action::Logout)).unwrap();
        drop(tx);

        registry.run(rx).await;
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_notify_tap_forwards_visible_errors_only() {
        let notifier = Arc::new(RecordingNotifier::new());
        let tap = NotifyTap::new(notifier.clone());
        let ctx = TapContext::for_action(&Action::ClearError);

        tap.on_action(&failed_fetch(false, "offline"), &ctx).await.unwrap();
        tap.on_action(&failed_fetch(true, "quiet"), &ctx).await.unwrap();
        tap.on_action(&failed_fetch(false, " "), &ctx).await.unwrap();
        tap.on_action(&Action::ClearError, &ctx).await.unwrap();

        let group = FetchJobGroup::wrap(
            Envelope::pending(ActionKind::FetchJobGroup, "A1".to_string(), None, false)
                .succeed(None)
                .unwrap(),
        );
        tap.on_action(&group, &ctx).await.unwrap();

        assert_eq!(notifier.messages(), vec!["offline".to_string()]);
    }

    #[test]
    fn test_context_carries_request_id() {
        let action = failed_fetch(false, "offline");
        let ctx = TapContext::for_action(&action);
        assert_eq!(ctx.request_id, action.as_async().map(|a| a.request_id()));

        assert!(TapContext::for_action(&Action::Logout).request_id.is_none());
    }
}
