//! Action creators for the remote service.
//!
//! Each async creator:
//!
//! 1. checks the authorization precondition where the endpoint needs it,
//!    returning [`SyncError::Unauthenticated`] before anything is dispatched
//! 2. encodes the payload and runs the request through the scope's envelope
//! 3. decodes the response into the operation's typed response
//!
//! Transport and decode failures become `error` actions and an `Ok(None)`
//! here. Only precondition and storage failures reach the caller as `Err`.
//!
//! # Read-through fetches
//!
//! Fetches backed by a cache (job groups, labor stats, advice tips and
//! content) return the cached value without calling the transport. A fetch
//! whose dedup key is already in flight through this `Api` returns
//! `Ok(None)` at once; its result lands in the snapshot when the first call
//! settles.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::action::{
    Action, AsyncOp, FetchAdviceContent, FetchAdviceTips, FetchJobGroup, FetchLaborStats,
    FetchUser, SaveUser, UpdateProject,
};
use crate::envelope::RunOptions;
use crate::error::SyncError;
use crate::model::{
    AdviceContent, AdviceKey, AdviceTip, JobGroup, LaborStats, LaborStatsKey, Profile, Project,
    User,
};
use crate::scope::Scope;
use crate::session::{Credentials, Session};
use crate::store::Store;
use crate::transport::Transport;

/// Action creators bound to one store, session and transport.
///
/// Clones share the in-flight registry.
#[derive(Clone)]
pub struct Api {
    store: Arc<Store>,
    session: Arc<Session>,
    transport: Arc<dyn Transport>,
    inflight: Arc<DashMap<String, ()>>,
}

impl Api {
    pub fn new(store: Arc<Store>, session: Arc<Session>, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            session,
            transport,
            inflight: Arc::new(DashMap::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Authenticated user API
    // -------------------------------------------------------------------------

    pub async fn fetch_user(&self, scope: &Scope, user_id: &str) -> Result<Option<User>, SyncError> {
        let credentials = self.session.require_auth()?;
        self.call::<FetchUser>(scope, user_id.to_string(), RunOptions::new(), Some(credentials))
            .await
    }

    /// Push the local user aggregate.
    pub async fn save_user(&self, scope: &Scope) -> Result<Option<User>, SyncError> {
        let credentials = self.session.require_auth()?;
        let user = (*scope.store().snapshot().user).clone();
        self.call::<SaveUser>(scope, user, RunOptions::new(), Some(credentials))
            .await
    }

    /// Edit one project; the local aggregate changes as soon as this is
    /// pending.
    pub async fn update_project(
        &self,
        scope: &Scope,
        project: Project,
    ) -> Result<Option<User>, SyncError> {
        let credentials = self.session.require_auth()?;
        let options = RunOptions::new().dedup_key(format!("update-project:{}", project.project_id));
        self.call::<UpdateProject>(scope, project, options, Some(credentials))
            .await
    }

    pub async fn fetch_advice_tips(
        &self,
        scope: &Scope,
        project_id: &str,
        advice_id: &str,
    ) -> Result<Option<Vec<AdviceTip>>, SyncError> {
        let credentials = self.session.require_auth()?;
        let cached = self
            .store
            .snapshot()
            .caches
            .advice_tips
            .get_scoped(project_id, advice_id)
            .cloned();
        let options = RunOptions::new()
            .dedup_key(format!("tips:{}:{}", project_id, advice_id))
            .ignore_failure();
        self.read_through::<FetchAdviceTips>(
            scope,
            AdviceKey::new(project_id, advice_id),
            options,
            Some(credentials),
            cached,
        )
        .await
    }

    // -------------------------------------------------------------------------
    // Static content (token optional)
    // -------------------------------------------------------------------------

    pub async fn fetch_job_group(
        &self,
        scope: &Scope,
        job_group_id: &str,
    ) -> Result<Option<Option<JobGroup>>, SyncError> {
        let cached = self
            .store
            .snapshot()
            .caches
            .job_groups
            .get(job_group_id)
            .cloned()
            .map(Some);
        let options = RunOptions::new()
            .dedup_key(format!("job-group:{}", job_group_id))
            .ignore_failure();
        let credentials = self.session.credentials()?;
        self.read_through::<FetchJobGroup>(
            scope,
            job_group_id.to_string(),
            options,
            credentials,
            cached,
        )
        .await
    }

    pub async fn fetch_labor_stats(
        &self,
        scope: &Scope,
        region_id: &str,
        job_id: &str,
    ) -> Result<Option<LaborStats>, SyncError> {
        let key = LaborStatsKey::new(region_id, job_id);
        let cached = key
            .cache_key()
            .and_then(|k| self.store.snapshot().caches.labor_stats.get(k.as_str()).cloned());
        let options = RunOptions::new().dedup_key(format!("stats:{}:{}", region_id, job_id));
        let credentials = self.session.credentials()?;
        self.read_through::<FetchLaborStats>(scope, key, options, credentials, cached)
            .await
    }

    pub async fn fetch_advice_content(
        &self,
        scope: &Scope,
        project_id: &str,
        advice_id: &str,
    ) -> Result<Option<Option<AdviceContent>>, SyncError> {
        let cached = self
            .store
            .snapshot()
            .caches
            .advice_content
            .get_scoped(project_id, advice_id)
            .cloned()
            .map(Some);
        let options = RunOptions::new().dedup_key(format!("advice:{}:{}", project_id, advice_id));
        let credentials = self.session.credentials()?;
        self.read_through::<FetchAdviceContent>(
            scope,
            AdviceKey::new(project_id, advice_id),
            options,
            credentials,
            cached,
        )
        .await
    }

    // -------------------------------------------------------------------------
    // Synchronous intents
    // -------------------------------------------------------------------------

    pub fn update_profile(&self, profile: Profile) {
        self.store.dispatch(Action::UpdateProfile(profile));
    }

    pub fn clear_error(&self) {
        self.store.dispatch(Action::ClearError);
    }

    /// Forget the session, then reset the user and every cache.
    pub fn logout(&self) -> Result<(), SyncError> {
        self.session.logout()?;
        self.store.dispatch(Action::Logout);
        Ok(())
    }

    /// Serve `cached`, or call unless the dedup key is already in flight.
    async fn read_through<Op>(
        &self,
        scope: &Scope,
        payload: Op::Payload,
        options: RunOptions,
        credentials: Option<Credentials>,
        cached: Option<Op::Response>,
    ) -> Result<Option<Op::Response>, SyncError>
    where
        Op: AsyncOp,
        Op::Response: DeserializeOwned,
    {
        if let Some(cached) = cached {
            debug!(kind = %Op::KIND, "served from cache");
            return Ok(Some(cached));
        }

        let dedup_key = options
            .dedup_key
            .clone()
            .unwrap_or_else(|| Op::KIND.as_str().to_string());
        let Some(_claim) = InflightClaim::acquire(&self.inflight, dedup_key) else {
            debug!(kind = %Op::KIND, "request already in flight");
            return Ok(None);
        };

        self.call::<Op>(scope, payload, options, credentials).await
    }

    async fn call<Op>(
        &self,
        scope: &Scope,
        payload: Op::Payload,
        options: RunOptions,
        credentials: Option<Credentials>,
    ) -> Result<Option<Op::Response>, SyncError>
    where
        Op: AsyncOp,
        Op::Response: DeserializeOwned,
    {
        let args = serde_json::to_value(&payload).map_err(|source| SyncError::Encode {
            kind: Op::KIND,
            source,
        })?;
        debug!(kind = %Op::KIND, authenticated = credentials.is_some(), "calling transport");

        let transport = self.transport.clone();
        let response = scope
            .run_async::<Op, _, _>(payload, options, move || async move {
                let body = transport.request(Op::KIND, args, credentials).await?;
                serde_json::from_value::<Op::Response>(body).map_err(|source| {
                    anyhow::Error::from(SyncError::Decode {
                        kind: Op::KIND,
                        source,
                    })
                })
            })
            .await;
        Ok(response)
    }
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// Registration of one in-flight read-through fetch; removed on drop.
struct InflightClaim<'a> {
    inflight: &'a DashMap<String, ()>,
    dedup_key: String,
}

impl<'a> InflightClaim<'a> {
    fn acquire(inflight: &'a DashMap<String, ()>, dedup_key: String) -> Option<Self> {
        match inflight.entry(dedup_key.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                entry.insert(());
                Some(Self {
                    inflight,
                    dedup_key,
                })
            }
        }
    }
}

impl Drop for InflightClaim<'_> {
    fn drop(&mut self) {
        self.inflight.remove(&self.dedup_key);
    }
}
