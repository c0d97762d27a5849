//! Snapsync engine: the explicitly constructed context that owns the store,
//! the session and the transport.
//!
//! ```text
//! EngineBuilder ── build() ──► Engine ── start() ──► EngineHandle
//!                                                      ├── api()    action creators
//!                                                      ├── scope()  one per UI element
//!                                                      └── tap loop (background task)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let handle = Engine::builder(HttpTransport::new(base_url))
//!     .with_config(Config::from_env()?)
//!     .with_notifier(toast.clone())
//!     .build()?
//!     .start();
//!
//! let scope = handle.scope();
//! handle.api().fetch_labor_stats(&scope, "75", "job1").await?;
//!
//! // UI element removed
//! scope.drain();
//!
//! handle.abort();
//! ```

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::action::Action;
use crate::api::Api;
use crate::bus::ActionBus;
use crate::config::Config;
use crate::error::SyncError;
use crate::model::User;
use crate::reducer::Snapshot;
use crate::scope::Scope;
use crate::session::Session;
use crate::storage::{FileStorage, KeyValueStore, MemoryStorage};
use crate::store::Store;
use crate::tap::{ActionTap, Notifier, NotifyTap, TapRegistry};
use crate::transport::Transport;

// =============================================================================
// Engine
// =============================================================================

/// A built, not yet started engine.
pub struct Engine {
    store: Arc<Store>,
    session: Arc<Session>,
    transport: Arc<dyn Transport>,
    config: Config,
    taps: TapRegistry,
}

impl Engine {
    /// Create a new engine builder.
    pub fn builder<T: Transport>(transport: T) -> EngineBuilder {
        EngineBuilder::new(Arc::new(transport))
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Start the tap loop in the background.
    ///
    /// Taps observe every action dispatched after this call.
    pub fn start(self) -> EngineHandle {
        info!(
            taps = self.taps.len(),
            user_id = %self.store.snapshot().user.user_id,
            "starting snapsync engine"
        );

        let handle = if self.taps.is_empty() {
            None
        } else {
            let receiver = self.store.subscribe();
            Some(tokio::spawn(self.taps.run(receiver)))
        };

        EngineHandle {
            api: Api::new(self.store.clone(), self.session.clone(), self.transport),
            store: self.store,
            session: self.session,
            config: self.config,
            handle,
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("taps", &self.taps)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Engine Handle
// =============================================================================

/// Handle to a running engine.
pub struct EngineHandle {
    store: Arc<Store>,
    session: Arc<Session>,
    api: Api,
    config: Config,
    handle: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.store.watch()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// New cancellation scope over this engine's store.
    pub fn scope(&self) -> Scope {
        Scope::new(self.store.clone()).release_on_drain(self.config.release_on_drain)
    }

    pub fn dispatch(&self, action: Action) -> Arc<Snapshot> {
        self.store.dispatch(action)
    }

    /// Abort the tap loop.
    ///
    /// Call this during teardown. Dispatch keeps working, but taps no
    /// longer observe anything.
    pub fn abort(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("config", &self.config)
            .field("running", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Engine Builder
// =============================================================================

/// Builder for constructing an [`Engine`] with storage, taps and config.
pub struct EngineBuilder {
    transport: Arc<dyn Transport>,
    config: Config,
    storage: Option<Arc<dyn KeyValueStore>>,
    taps: TapRegistry,
}

impl EngineBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: Config::default(),
            storage: None,
            taps: TapRegistry::new(),
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use this storage instead of the one `Config::storage_path` selects.
    pub fn with_storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Show failed, non-ignored requests through `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.taps.register(NotifyTap::new(notifier), "notify");
        self
    }

    pub fn with_tap<T: ActionTap>(mut self, tap: T, name: &'static str) -> Self {
        self.taps.register(tap, name);
        self
    }

    /// Open storage, restore the session's user id, and build the store.
    pub fn build(self) -> Result<Engine, SyncError> {
        let storage: Arc<dyn KeyValueStore> = match (self.storage, &self.config.storage_path) {
            (Some(storage), _) => storage,
            (None, Some(path)) => Arc::new(FileStorage::open(path)?),
            (None, None) => Arc::new(MemoryStorage::new()),
        };
        let session = Arc::new(Session::new(
            storage,
            self.config.auth_token_key.clone(),
            self.config.user_id_key.clone(),
        ));

        let user = session
            .user_id()?
            .map(User::with_id)
            .unwrap_or_default();
        let store = Arc::new(Store::new(
            Snapshot::new(user),
            ActionBus::with_capacity(self.config.bus_capacity),
        ));

        Ok(Engine {
            store,
            session,
            transport: self.transport,
            config: self.config,
            taps: self.taps,
        })
    }
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("taps", &self.taps)
            .finish_non_exhaustive()
    }
}
