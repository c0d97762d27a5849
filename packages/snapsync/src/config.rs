use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use crate::bus::DEFAULT_CAPACITY;

/// Engine configuration loaded from environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Storage key of the auth token
    pub auth_token_key: String,
    /// Storage key of the user id
    pub user_id_key: String,
    /// Session file; in-memory storage when unset
    pub storage_path: Option<PathBuf>,
    /// Action bus buffer before slow observers lag
    pub bus_capacity: usize,
    /// Reset ledger entries of requests abandoned by a drained scope
    pub release_on_drain: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            auth_token_key: lookup("SNAPSYNC_AUTH_TOKEN_KEY")
                .unwrap_or_else(|| "authToken".to_string()),
            user_id_key: lookup("SNAPSYNC_USER_ID_KEY").unwrap_or_else(|| "userId".to_string()),
            storage_path: lookup("SNAPSYNC_STORAGE_PATH")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            bus_capacity: lookup("SNAPSYNC_BUS_CAPACITY")
                .unwrap_or_else(|| DEFAULT_CAPACITY.to_string())
                .parse()
                .context("SNAPSYNC_BUS_CAPACITY must be a valid number")?,
            release_on_drain: lookup("SNAPSYNC_RELEASE_ON_DRAIN")
                .unwrap_or_else(|| "false".to_string())
                .parse()
                .context("SNAPSYNC_RELEASE_ON_DRAIN must be true or false")?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_token_key: "authToken".to_string(),
            user_id_key: "userId".to_string(),
            storage_path: None,
            bus_capacity: DEFAULT_CAPACITY,
            release_on_drain: false,
        }
    }
}
