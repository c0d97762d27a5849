//! The store: current snapshot plus the dispatch entry point.
//!
//! ```text
//! dispatch(action)
//!  → reducer::reduce(snapshot, action)   (under the watch lock)
//!  → bus.emit(action)                    (same lock, so order is kept)
//!  → watchers notified                   (only if the snapshot changed)
//! ```
//!
//! Dispatch is synchronous. Everything awaitable happens in the envelope and
//! scope layers before and after it.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::trace;

use crate::action::Action;
use crate::bus::ActionBus;
use crate::reducer::{self, Snapshot};

pub struct Store {
    state: watch::Sender<Arc<Snapshot>>,
    bus: ActionBus,
}

impl Store {
    pub fn new(initial: Snapshot, bus: ActionBus) -> Self {
        Self {
            state: watch::Sender::new(Arc::new(initial)),
            bus,
        }
    }

    /// Reduce `action` into the snapshot and broadcast it.
    ///
    /// Returns the snapshot after the action. It is the same `Arc` as
    /// before when the action changed nothing.
    pub fn dispatch(&self, action: Action) -> Arc<Snapshot> {
        let action = Arc::new(action);
        let mut after = None;
        self.state.send_if_modified(|current| {
            let next = reducer::reduce(current, &action);
            let changed = !Arc::ptr_eq(&next, current);
            trace!(
                kind = %action.kind(),
                phase = %action.phase(),
                changed,
                "dispatched action"
            );
            *current = next.clone();
            self.bus.emit(action.clone());
            after = Some(next);
            changed
        });
        after.unwrap_or_else(|| self.snapshot())
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.state.borrow().clone()
    }

    /// Receiver notified whenever the snapshot changes.
    pub fn watch(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.state.subscribe()
    }

    pub fn bus(&self) -> &ActionBus {
        &self.bus
    }

    /// Subscribe to every dispatched action, changed snapshot or not.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Action>> {
        self.bus.subscribe()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(Snapshot::default(), ActionBus::new())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use crate::model::{Profile, User};
    use crate::revision::Revision;

    fn profile(name: &str) -> Profile {
        Profile {
            name: name.into(),
            ..Profile::default()
        }
    }

    #[tokio::test]
    async fn test_dispatch_updates_snapshot_and_broadcasts() {
        let store = Store::new(Snapshot::new(User::with_id("u1")), ActionBus::new());
        let mut actions = store.subscribe();

        let after = store.dispatch(Action::UpdateProfile(profile("Ada")));

        assert_eq!(after.user.profile.name, "Ada");
        assert_eq!(after.user.revision, Revision::new(1));
        assert!(Arc::ptr_eq(&after, &store.snapshot()));
        assert_eq!(actions.recv().await.unwrap().kind(), ActionKind::UpdateProfile);
    }

    #[tokio::test]
    async fn test_noop_dispatch_keeps_reference_but_still_broadcasts() {
        let store = Store::default();
        let before = store.snapshot();
        let mut actions = store.subscribe();
        let watcher = store.watch();

        let after = store.dispatch(Action::ClearError);

        assert!(Arc::ptr_eq(&before, &after));
        assert!(!watcher.has_changed().unwrap());
        assert_eq!(actions.recv().await.unwrap().kind(), ActionKind::ClearError);
    }

    #[tokio::test]
    async fn test_watcher_sees_change() {
        let store = Store::default();
        let mut watcher = store.watch();

        store.dispatch(Action::UpdateProfile(profile("Ada")));

        watcher.changed().await.unwrap();
        assert_eq!(watcher.borrow_and_update().user.profile.name, "Ada");
    }
}
