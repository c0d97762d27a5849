//! Snapshot reducer: folds actions into an immutable application snapshot.
//!
//! # Structure
//!
//! The snapshot has three slices, each with its own reducer:
//!
//! ```text
//! Snapshot
//!  ├── user    ◄── reduce_user    (revision reconciler)
//!  ├── caches  ◄── reduce_caches  (keyed cache store)
//!  └── ledger  ◄── ledger::reduce (fetching ledger)
//! ```
//!
//! [`reduce`] folds the action through [`SLICES`] in order.
//!
//! # Reference Equality Contract
//!
//! Every slice reducer returns its input `Arc` when the action does not
//! apply, and [`reduce`] returns the *same* `Arc<Snapshot>` when no slice
//! changed. Consumers detect "nothing happened" with `Arc::ptr_eq`.
//!
//! # Optimistic Updates
//!
//! - `pending` of a mutation: applied immediately through `increment`
//! - `success`: the server's aggregate goes through `merge`
//! - `error`: the optimistic value stays (no rollback)

use std::sync::Arc;

use crate::action::{Action, AsyncAction, Outcome};
use crate::cache::{CacheKey, KeyedCache};
use crate::ledger::{self, FetchingLedger};
use crate::model::{AdviceContent, AdviceTip, JobGroup, LaborStats, User};
use crate::revision::{increment, merge};

/// Read-only payloads fetched from the service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppCaches {
    /// `{job_group_id}`
    pub job_groups: KeyedCache<JobGroup>,
    /// `{region_id}:{job_id}`
    pub labor_stats: KeyedCache<LaborStats>,
    /// `[project_id][advice_id]`
    pub advice_tips: KeyedCache<KeyedCache<Vec<AdviceTip>>>,
    /// `[project_id][advice_id]`
    pub advice_content: KeyedCache<KeyedCache<AdviceContent>>,
}

impl AppCaches {
    pub fn is_empty(&self) -> bool {
        self.job_groups.is_empty()
            && self.labor_stats.is_empty()
            && self.advice_tips.is_empty()
            && self.advice_content.is_empty()
    }
}

/// The whole client-side state, shared copy-on-write.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub user: Arc<User>,
    pub caches: Arc<AppCaches>,
    pub ledger: Arc<FetchingLedger>,
}

impl Snapshot {
    pub fn new(user: User) -> Self {
        Self {
            user: Arc::new(user),
            ..Self::default()
        }
    }
}

/// A reducer over one slice of the snapshot.
pub type SliceReducer = fn(&Arc<Snapshot>, &Action) -> Arc<Snapshot>;

/// Slice reducers, applied in order.
pub const SLICES: &[SliceReducer] = &[user_slice, caches_slice, ledger_slice];

/// Fold one action into the snapshot.
pub fn reduce(snapshot: &Arc<Snapshot>, action: &Action) -> Arc<Snapshot> {
    SLICES
        .iter()
        .fold(snapshot.clone(), |acc, slice| slice(&acc, action))
}

fn user_slice(snapshot: &Arc<Snapshot>, action: &Action) -> Arc<Snapshot> {
    let user = reduce_user(&snapshot.user, action);
    if Arc::ptr_eq(&user, &snapshot.user) {
        return snapshot.clone();
    }
    Arc::new(Snapshot {
        user,
        ..(**snapshot).clone()
    })
}

fn caches_slice(snapshot: &Arc<Snapshot>, action: &Action) -> Arc<Snapshot> {
    let caches = reduce_caches(&snapshot.caches, action);
    if Arc::ptr_eq(&caches, &snapshot.caches) {
        return snapshot.clone();
    }
    Arc::new(Snapshot {
        caches,
        ..(**snapshot).clone()
    })
}

fn ledger_slice(snapshot: &Arc<Snapshot>, action: &Action) -> Arc<Snapshot> {
    let ledger = ledger::reduce(&snapshot.ledger, action);
    if Arc::ptr_eq(&ledger, &snapshot.ledger) {
        return snapshot.clone();
    }
    Arc::new(Snapshot {
        ledger,
        ..(**snapshot).clone()
    })
}

/// User aggregate reducer.
pub fn reduce_user(user: &Arc<User>, action: &Action) -> Arc<User> {
    match action {
        Action::Async(action) => match action {
            AsyncAction::FetchUser(e) => merge_response(user, &e.outcome),
            AsyncAction::SaveUser(e) => merge_response(user, &e.outcome),
            AsyncAction::UpdateProject(e) => match &e.outcome {
                Outcome::Pending => Arc::new(increment(user.with_project(e.payload.clone()))),
                Outcome::Success(remote) => merge(user, &Arc::new(remote.clone())),
                Outcome::Error(_) => user.clone(),
            },
            AsyncAction::FetchJobGroup(_)
            | AsyncAction::FetchLaborStats(_)
            | AsyncAction::FetchAdviceTips(_)
            | AsyncAction::FetchAdviceContent(_) => user.clone(),
        },
        Action::UpdateProfile(profile) => {
            if user.profile == *profile {
                return user.clone();
            }
            Arc::new(increment(user.with_profile(profile.clone())))
        }
        Action::Logout => {
            if **user == User::default() {
                return user.clone();
            }
            Arc::new(User::default())
        }
        Action::ClearError | Action::FetchAbandoned { .. } => user.clone(),
    }
}

fn merge_response(user: &Arc<User>, outcome: &Outcome<User>) -> Arc<User> {
    match outcome {
        Outcome::Success(remote) => merge(user, &Arc::new(remote.clone())),
        Outcome::Pending | Outcome::Error(_) => user.clone(),
    }
}

/// Cache reducer. Only `success` writes entries; editing a project drops
/// that project's advice caches as soon as the edit is pending.
pub fn reduce_caches(caches: &Arc<AppCaches>, action: &Action) -> Arc<AppCaches> {
    match action {
        Action::Async(action) => match action {
            AsyncAction::FetchJobGroup(e) => match &e.outcome {
                Outcome::Success(group) => {
                    let next = caches
                        .job_groups
                        .set(CacheKey::new(&e.payload), group.clone());
                    replace(caches, &caches.job_groups, next, |c, v| c.job_groups = v)
                }
                _ => caches.clone(),
            },
            AsyncAction::FetchLaborStats(e) => match &e.outcome {
                Outcome::Success(stats) => {
                    let next = caches
                        .labor_stats
                        .set(e.payload.cache_key(), Some(stats.clone()));
                    replace(caches, &caches.labor_stats, next, |c, v| c.labor_stats = v)
                }
                _ => caches.clone(),
            },
            AsyncAction::FetchAdviceTips(e) => match &e.outcome {
                Outcome::Success(tips) => {
                    let next = caches.advice_tips.set_scoped(
                        e.payload.scope_key(),
                        e.payload.entry_key(),
                        Some(tips.clone()),
                    );
                    replace(caches, &caches.advice_tips, next, |c, v| c.advice_tips = v)
                }
                _ => caches.clone(),
            },
            AsyncAction::FetchAdviceContent(e) => match &e.outcome {
                Outcome::Success(content) => {
                    let next = caches.advice_content.set_scoped(
                        e.payload.scope_key(),
                        e.payload.entry_key(),
                        content.clone(),
                    );
                    replace(caches, &caches.advice_content, next, |c, v| {
                        c.advice_content = v
                    })
                }
                _ => caches.clone(),
            },
            AsyncAction::UpdateProject(e) => match &e.outcome {
                Outcome::Pending => drop_project(caches, &e.payload.project_id),
                _ => caches.clone(),
            },
            AsyncAction::FetchUser(_) | AsyncAction::SaveUser(_) => caches.clone(),
        },
        Action::Logout => {
            if caches.is_empty() {
                return caches.clone();
            }
            Arc::new(AppCaches::default())
        }
        Action::UpdateProfile(_) | Action::ClearError | Action::FetchAbandoned { .. } => {
            caches.clone()
        }
    }
}

fn drop_project(caches: &Arc<AppCaches>, project_id: &str) -> Arc<AppCaches> {
    let tips = caches.advice_tips.drop_scope(project_id);
    let content = caches.advice_content.drop_scope(project_id);
    if tips.same_as(&caches.advice_tips) && content.same_as(&caches.advice_content) {
        return caches.clone();
    }
    Arc::new(AppCaches {
        advice_tips: tips,
        advice_content: content,
        ..(**caches).clone()
    })
}

/// Swap one cache field, keeping the parent `Arc` when the cache is unchanged.
fn replace<V: Clone>(
    caches: &Arc<AppCaches>,
    current: &KeyedCache<V>,
    next: KeyedCache<V>,
    apply: impl FnOnce(&mut AppCaches, KeyedCache<V>),
) -> Arc<AppCaches> {
    if next.same_as(current) {
        return caches.clone();
    }
    let mut updated = (**caches).clone();
    apply(&mut updated, next);
    Arc::new(updated)
}
