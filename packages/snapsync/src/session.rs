//! Session credentials backed by a [`KeyValueStore`].
//!
//! The auth token and user id are the only values persisted by this crate.
//! Everything else is rebuilt from the remote service.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::error::SyncError;
use crate::storage::KeyValueStore;

/// Credentials attached to authenticated requests.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub auth_token: String,
    pub user_id: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("auth_token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

pub struct Session {
    storage: Arc<dyn KeyValueStore>,
    auth_token_key: String,
    user_id_key: String,
}

impl Session {
    pub fn new(
        storage: Arc<dyn KeyValueStore>,
        auth_token_key: impl Into<String>,
        user_id_key: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            auth_token_key: auth_token_key.into(),
            user_id_key: user_id_key.into(),
        }
    }

    /// Stored auth token. Empty values count as absent.
    pub fn auth_token(&self) -> Result<Option<String>, SyncError> {
        Ok(self
            .storage
            .get(&self.auth_token_key)?
            .filter(|token| !token.is_empty()))
    }

    pub fn user_id(&self) -> Result<Option<String>, SyncError> {
        Ok(self
            .storage
            .get(&self.user_id_key)?
            .filter(|id| !id.is_empty()))
    }

    /// Credentials if a token is stored.
    pub fn credentials(&self) -> Result<Option<Credentials>, SyncError> {
        let Some(auth_token) = self.auth_token()? else {
            return Ok(None);
        };
        Ok(Some(Credentials {
            auth_token,
            user_id: self.user_id()?,
        }))
    }

    /// Authorization precondition of authenticated operations.
    ///
    /// Fails with [`SyncError::Unauthenticated`] before any request is made.
    pub fn require_auth(&self) -> Result<Credentials, SyncError> {
        self.credentials()?.ok_or(SyncError::Unauthenticated)
    }

    pub fn login(&self, auth_token: &str, user_id: &str) -> Result<(), SyncError> {
        self.storage.set(&self.auth_token_key, auth_token)?;
        self.storage.set(&self.user_id_key, user_id)?;
        info!(user_id = %user_id, "session started");
        Ok(())
    }

    pub fn logout(&self) -> Result<(), SyncError> {
        self.storage.remove(&self.auth_token_key)?;
        self.storage.remove(&self.user_id_key)?;
        info!("session cleared");
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("auth_token_key", &self.auth_token_key)
            .field("user_id_key", &self.user_id_key)
            .finish_non_exhaustive()
    }
}
