//! Action bus for broadcasting dispatched actions to observers.
//!
//! # Guarantees
//!
//! - **Dispatch order**: receivers see actions in the order they were reduced
//! - **At-most-once delivery**: slow receivers may miss actions
//! - **No replay**: lagged receivers get `RecvError::Lagged`
//!
//! The bus is for observation only (taps, notifications, tests). State lives
//! in the store's snapshot, never in the bus.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::action::Action;

/// Default channel capacity for the action bus.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast channel of dispatched actions.
///
/// Cloning shares the underlying channel.
///
/// # Example
///
/// ```ignore
/// let bus = ActionBus::new();
/// let mut receiver = bus.subscribe();
///
/// bus.emit(Action::ClearError);
///
/// let action = receiver.recv().await?;
/// assert_eq!(action.kind(), ActionKind::ClearError);
/// ```
#[derive(Clone)]
pub struct ActionBus {
    sender: broadcast::Sender<Arc<Action>>,
}

impl ActionBus {
    /// Create a new action bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new action bus with the specified capacity.
    ///
    /// The capacity determines how many actions can be buffered before
    /// slow receivers start lagging.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an action to all subscribers.
    ///
    /// Returns the number of receivers that received the action.
    pub fn emit(&self, action: impl Into<Arc<Action>>) -> usize {
        self.sender.send(action.into()).unwrap_or(0)
    }

    /// Subscribe to actions emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Action>> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ActionBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActionBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use crate::model::Profile;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = ActionBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(Action::ClearError);

        let action = receiver.recv().await.unwrap();
        assert_eq!(action.kind(), ActionKind::ClearError);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_share_the_action() {
        let bus = ActionBus::new();
        let mut receiver1 = bus.subscribe();
        let mut receiver2 = bus.subscribe();

        bus.emit(Action::Logout);

        let a1 = receiver1.recv().await.unwrap();
        let a2 = receiver2.recv().await.unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
    }

    #[tokio::test]
    async fn test_order_is_preserved() {
        let bus = ActionBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(Action::UpdateProfile(Profile::default()));
        bus.emit(Action::ClearError);
        bus.emit(Action::Logout);

        assert_eq!(receiver.recv().await.unwrap().kind(), ActionKind::UpdateProfile);
        assert_eq!(receiver.recv().await.unwrap().kind(), ActionKind::ClearError);
        assert_eq!(receiver.recv().await.unwrap().kind(), ActionKind::Logout);
    }

    #[tokio::test]
    async fn test_emit_returns_receiver_count() {
        let bus = ActionBus::new();
        assert_eq!(bus.emit(Action::ClearError), 0);

        let _receiver1 = bus.subscribe();
        assert_eq!(bus.emit(Action::ClearError), 1);

        let _receiver2 = bus.subscribe();
        assert_eq!(bus.emit(Action::ClearError), 2);
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_actions() {
        let bus = ActionBus::new();
        bus.emit(Action::ClearError);

        let mut receiver = bus.subscribe();
        bus.emit(Action::Logout);

        assert_eq!(receiver.recv().await.unwrap().kind(), ActionKind::Logout);
    }

    #[tokio::test]
    async fn test_slow_receiver_lags() {
        let bus = ActionBus::with_capacity(2);
        let mut receiver = bus.subscribe();

        for _ in 0..4 {
            bus.emit(Action::ClearError);
        }

        assert!(matches!(
            receiver.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
    }

    #[test]
    fn test_debug_impl() {
        let bus = ActionBus::new();
        let _r1 = bus.subscribe();
        let debug_str = format!("{:?}", bus);
        assert!(debug_str.contains("ActionBus"));
        assert!(debug_str.contains("subscriber_count"));
    }
}
