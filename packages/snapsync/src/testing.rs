//! Testing utilities for snapsync.
//!
//! Enabled for this crate's own tests, and for downstream crates through the
//! `testing` feature.
//!
//! # Recording Taps
//!
//! [`RecordingTap`] keeps every action it observes, so a test can assert the
//! exact sequence an engine dispatched:
//!
//! ```ignore
//! let tap = RecordingTap::new();
//! let handle = Engine::builder(transport).with_tap(tap.clone(), "recorder").build()?.start();
//!
//! api.fetch_labor_stats(&scope, "75", "job1").await?;
//! tap.wait_for_len(2).await;
//! assert_eq!(tap.phases(), vec![Phase::Pending, Phase::Success]);
//! ```
//!
//! # Scripted Transport
//!
//! [`ScriptedTransport`] answers each action kind with a canned JSON body or
//! error, optionally after a delay, and records every call it receives.
//!
//! # Timeout Safety
//!
//! For tests that might hang, use `tokio::time::timeout`:
//!
//! ```ignore
//! timeout(Duration::from_secs(5), tap.wait_for_len(4))
//!     .await
//!     .expect("tap timed out");
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use crate::action::{Action, ActionKind, Phase};
use crate::session::Credentials;
use crate::tap::{ActionTap, Notifier, TapContext};
use crate::transport::Transport;

// =============================================================================
// Recording Tap
// =============================================================================

/// Tap that records every observed action. Clones share the recording.
#[derive(Clone, Default)]
pub struct RecordingTap {
    actions: Arc<Mutex<Vec<Arc<Action>>>>,
    notify: Arc<Notify>,
}

impl RecordingTap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<Arc<Action>> {
        self.actions.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.actions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kinds(&self) -> Vec<ActionKind> {
        self.actions().iter().map(|a| a.kind()).collect()
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.actions().iter().map(|a| a.phase()).collect()
    }

    /// Wait until at least `expected` actions were recorded.
    pub async fn wait_for_len(&self, expected: usize) {
        loop {
            // Register for notification BEFORE checking the count
            let notified = self.notify.notified();

            if self.len() >= expected {
                return;
            }

            notified.await;
        }
    }
}

#[async_trait]
impl ActionTap for RecordingTap {
    async fn on_action(&self, action: &Action, _ctx: &TapContext) -> Result<()> {
        self.actions.lock().unwrap().push(Arc::new(action.clone()));
        self.notify.notify_waiters();
        Ok(())
    }
}

impl std::fmt::Debug for RecordingTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingTap")
            .field("recorded", &self.len())
            .finish()
    }
}

// =============================================================================
// Recording Notifier
// =============================================================================

/// Notifier that keeps every message it was asked to show.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    /// The message currently shown (the latest one).
    pub fn current(&self) -> Option<String> {
        self.messages.lock().unwrap().last().cloned()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

// =============================================================================
// Scripted Transport
// =============================================================================

/// One request received by a [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub kind: ActionKind,
    pub args: Value,
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone)]
enum Script {
    Respond(Value),
    Fail(String),
}

/// Transport answering from a per-kind script.
///
/// Unscripted kinds fail with `no scripted response for {kind}`.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    scripts: HashMap<ActionKind, Script>,
    delays: HashMap<ActionKind, Duration>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `kind` with `body`.
    pub fn respond(mut self, kind: ActionKind, body: Value) -> Self {
        self.scripts.insert(kind, Script::Respond(body));
        self
    }

    /// Fail `kind` with `message`.
    pub fn fail(mut self, kind: ActionKind, message: &str) -> Self {
        self.scripts.insert(kind, Script::Fail(message.to_string()));
        self
    }

    /// Sleep before answering `kind`.
    pub fn delay(mut self, kind: ActionKind, delay: Duration) -> Self {
        self.delays.insert(kind, delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, kind: ActionKind) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.kind == kind)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(
        &self,
        kind: ActionKind,
        args: Value,
        credentials: Option<Credentials>,
    ) -> Result<Value> {
        self.calls.lock().unwrap().push(RecordedCall {
            kind,
            args,
            credentials,
        });

        if let Some(delay) = self.delays.get(&kind) {
            tokio::time::sleep(*delay).await;
        }

        match self.scripts.get(&kind) {
            Some(Script::Respond(body)) => Ok(body.clone()),
            Some(Script::Fail(message)) => Err(anyhow!("{}", message)),
            None => Err(anyhow!("no scripted response for {}", kind)),
        }
    }
}
