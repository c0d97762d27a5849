//! Error types for snapsync.
//!
//! Failures come in two layers:
//! - [`SyncError`] is returned by fallible library calls: storage access,
//!   the authorization precondition, phase transitions, wire encoding.
//! - [`ActionError`] is the only failure that reaches the reducer. Request
//!   functions return `anyhow::Result`; the envelope converts the error into
//!   an `ActionError` before it is folded into the snapshot.
//!
//! # The Error Boundary Rule
//!
//! > **No `anyhow::Error` ever crosses the reducer boundary.**
//!
//! - `anyhow` is internal transport (ergonomic for request functions)
//! - `ActionError` is the only externalized failure (plain data, cloneable)

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::{ActionKind, Phase};
use crate::storage::StorageError;

/// Structured error type for snapsync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The authorization precondition failed before any request was made.
    ///
    /// This is raised eagerly by action creators and is never converted into
    /// an `error` action: it means the caller tried to reach an authenticated
    /// endpoint without a session.
    #[error("no auth token available")]
    Unauthenticated,

    /// A completed envelope was asked to transition again.
    #[error("invalid phase transition: {kind} is already {phase}")]
    InvalidTransition {
        /// Kind of the offending action.
        kind: ActionKind,
        /// Phase the envelope was in.
        phase: Phase,
    },

    /// The persistent key/value store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A request payload could not be encoded for the transport.
    #[error("failed to encode {kind} request")]
    Encode {
        kind: ActionKind,
        #[source]
        source: serde_json::Error,
    },

    /// A transport response did not match the expected shape.
    #[error("failed to decode {kind} response")]
    Decode {
        kind: ActionKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure carried by an `error` action.
///
/// Built from the request function's `anyhow::Error` (or from a panic raised
/// while invoking it). Only the rendered message survives, which is what the
/// fetching ledger and the notification collaborator need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionError {
    pub message: String,
}

impl ActionError {
    /// Create an error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Render an `anyhow` error chain into an action error.
    ///
    /// Uses the alternate format so context layers are kept
    /// (`"fetching stats: connection refused"`).
    pub fn from_error(error: &anyhow::Error) -> Self {
        Self::new(format!("{:#}", error))
    }

    /// Convert a caught panic payload into an action error.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self::new(format!("request panicked: {}", message))
    }

    /// True when there is nothing to show the user.
    pub fn is_empty(&self) -> bool {
        self.message.trim().is_empty()
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
