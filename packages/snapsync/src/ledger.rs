//! Fetching ledger: which dedup keys are in flight, and the last error.
//!
//! The ledger is a pure reduction over actions:
//!
//! | Action                              | Effect                                   |
//! |-------------------------------------|------------------------------------------|
//! | async `pending`                     | `is_fetching[key] = true`                |
//! | async `success`                     | `is_fetching[key] = false`, error cleared|
//! | async `error`                       | `is_fetching[key] = false`               |
//! | async `error`, message, not ignored | `last_error = message` (overwrites)      |
//! | `ClearError`, `Logout`              | `last_error` cleared                     |
//! | `FetchAbandoned`                    | `is_fetching[key] = false`               |
//!
//! A request that never settles stays `true` forever; there is no timeout.

use std::sync::Arc;

use crate::action::{Action, Phase};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchingLedger {
    is_fetching: im::HashMap<String, bool>,
    last_error: Option<String>,
}

impl FetchingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a request with this dedup key is in flight.
    pub fn is_fetching(&self, dedup_key: &str) -> bool {
        self.entry(dedup_key).unwrap_or(false)
    }

    /// Raw ledger entry: `None` if the key was never dispatched.
    pub fn entry(&self, dedup_key: &str) -> Option<bool> {
        self.is_fetching.get(dedup_key).copied()
    }

    pub fn any_fetching(&self) -> bool {
        self.is_fetching.values().any(|fetching| *fetching)
    }

    pub fn last_error_message(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn with_flag(&self, dedup_key: &str, fetching: bool) -> Self {
        Self {
            is_fetching: self.is_fetching.update(dedup_key.to_string(), fetching),
            last_error: self.last_error.clone(),
        }
    }

    fn with_error(self, last_error: Option<String>) -> Self {
        Self { last_error, ..self }
    }
}

/// Fold one action into the ledger.
///
/// Returns the input `Arc` untouched when nothing changes.
pub fn reduce(ledger: &Arc<FetchingLedger>, action: &Action) -> Arc<FetchingLedger> {
    match action {
        Action::Async(action) => {
            let key = action.dedup_key();
            match action.phase() {
                Phase::Pending => {
                    if ledger.entry(key) == Some(true) {
                        return ledger.clone();
                    }
                    Arc::new(ledger.with_flag(key, true))
                }
                Phase::Success => {
                    if ledger.entry(key) == Some(false) && ledger.last_error.is_none() {
                        return ledger.clone();
                    }
                    Arc::new(ledger.with_flag(key, false).with_error(None))
                }
                Phase::Error => {
                    let message = action
                        .error()
                        .filter(|error| !error.is_empty() && !action.ignore_failure())
                        .map(|error| error.message.clone());
                    let next = ledger.with_flag(key, false);
                    match message {
                        Some(message) => Arc::new(next.with_error(Some(message))),
                        None if ledger.entry(key) == Some(false) => ledger.clone(),
                        None => Arc::new(next),
                    }
                }
                Phase::None => ledger.clone(),
            }
        }
        Action::ClearError | Action::Logout => {
            if ledger.last_error.is_none() {
                return ledger.clone();
            }
            Arc::new(FetchingLedger {
                is_fetching: ledger.is_fetching.clone(),
                last_error: None,
            })
        }
        Action::FetchAbandoned { dedup_key } => {
            if ledger.entry(dedup_key) != Some(true) {
                return ledger.clone();
            }
            Arc::new(ledger.with_flag(dedup_key, false))
        }
        Action::UpdateProfile(_) => ledger.clone(),
    }
}
