//! Actions: immutable records of one state-transition attempt.
//!
//! # Overview
//!
//! An [`Action`] is either a plain synchronous intent (`UpdateProfile`,
//! `ClearError`, ...) or an [`AsyncAction`], which wraps an [`Envelope`] in
//! one of three phases:
//!
//! ```text
//! none ──► pending ──► success
//!                 └──► error
//! ```
//!
//! An envelope never re-enters `pending`: [`Envelope::succeed`] and
//! [`Envelope::fail`] consume a pending envelope and refuse a terminal one.
//!
//! # Closed Kinds
//!
//! Every business operation is a variant of [`ActionKind`] and a marker type
//! implementing [`AsyncOp`]. Adding a kind means adding a variant, and the
//! compiler then points at every reducer that must handle it.
//!
//! # Wire Shape
//!
//! [`Action::to_wire`] renders the JSON shape shared with other consumers:
//!
//! ```text
//! { kind, isAsync, dedupKey, ignoreFailure, payload, response? | error? }
//! ```
//!
//! and [`Phase::infer`] reads the phase back from the presence of `response`
//! or `error`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::{ActionError, SyncError};
use crate::model::{
    AdviceContent, AdviceKey, AdviceTip, JobGroup, LaborStats, LaborStatsKey, Profile, Project,
    User,
};

/// Discriminant of every business operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    FetchUser,
    SaveUser,
    UpdateProject,
    FetchJobGroup,
    FetchLaborStats,
    FetchAdviceTips,
    FetchAdviceContent,
    UpdateProfile,
    ClearError,
    Logout,
    FetchAbandoned,
}

impl ActionKind {
    /// Stable wire name, also the default dedup key.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::FetchUser => "fetch-user",
            ActionKind::SaveUser => "save-user",
            ActionKind::UpdateProject => "update-project",
            ActionKind::FetchJobGroup => "fetch-job-group",
            ActionKind::FetchLaborStats => "fetch-labor-stats",
            ActionKind::FetchAdviceTips => "fetch-advice-tips",
            ActionKind::FetchAdviceContent => "fetch-advice-content",
            ActionKind::UpdateProfile => "update-profile",
            ActionKind::ClearError => "clear-error",
            ActionKind::Logout => "logout",
            ActionKind::FetchAbandoned => "fetch-abandoned",
        }
    }

    /// Whether this kind participates in the async lifecycle.
    pub fn is_async(&self) -> bool {
        matches!(
            self,
            ActionKind::FetchUser
                | ActionKind::SaveUser
                | ActionKind::UpdateProject
                | ActionKind::FetchJobGroup
                | ActionKind::FetchLaborStats
                | ActionKind::FetchAdviceTips
                | ActionKind::FetchAdviceContent
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Synchronous intent, no lifecycle.
    None,
    Pending,
    Success,
    Error,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Success | Phase::Error)
    }

    /// Infer the phase of a wire-shaped action.
    ///
    /// Actions without `isAsync: true` are synchronous. Otherwise an `error`
    /// field means error, a `response` field means success (even when it is
    /// `null`), and neither means pending.
    pub fn infer(wire: &Value) -> Phase {
        if wire.get("isAsync").and_then(Value::as_bool) != Some(true) {
            return Phase::None;
        }
        if wire.get("error").is_some() {
            Phase::Error
        } else if wire.get("response").is_some() {
            Phase::Success
        } else {
            Phase::Pending
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::None => write!(f, "none"),
            Phase::Pending => write!(f, "pending"),
            Phase::Success => write!(f, "success"),
            Phase::Error => write!(f, "error"),
        }
    }
}

/// Identifier shared by the pending and terminal actions of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Phase-dependent data of an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<R> {
    Pending,
    Success(R),
    Error(ActionError),
}

/// One invocation of an async operation, in a given phase.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<P, R> {
    pub kind: ActionKind,
    pub request_id: RequestId,
    /// Key under which the fetching ledger tracks this request.
    pub dedup_key: String,
    /// A failure must not surface a user-visible error.
    pub ignore_failure: bool,
    pub payload: P,
    pub outcome: Outcome<R>,
}

impl<P, R> Envelope<P, R> {
    /// Create a pending envelope. `dedup_key` defaults to the kind's name.
    pub fn pending(
        kind: ActionKind,
        payload: P,
        dedup_key: Option<String>,
        ignore_failure: bool,
    ) -> Self {
        Self {
            kind,
            request_id: RequestId::new(),
            dedup_key: dedup_key.unwrap_or_else(|| kind.as_str().to_string()),
            ignore_failure,
            payload,
            outcome: Outcome::Pending,
        }
    }

    pub fn phase(&self) -> Phase {
        match self.outcome {
            Outcome::Pending => Phase::Pending,
            Outcome::Success(_) => Phase::Success,
            Outcome::Error(_) => Phase::Error,
        }
    }

    pub fn response(&self) -> Option<&R> {
        match &self.outcome {
            Outcome::Success(response) => Some(response),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ActionError> {
        match &self.outcome {
            Outcome::Error(error) => Some(error),
            _ => None,
        }
    }

    /// Complete a pending envelope with a response.
    pub fn succeed(self, response: R) -> Result<Self, SyncError> {
        self.transition(Outcome::Success(response))
    }

    /// Complete a pending envelope with an error.
    pub fn fail(self, error: ActionError) -> Result<Self, SyncError> {
        self.transition(Outcome::Error(error))
    }

    fn transition(self, outcome: Outcome<R>) -> Result<Self, SyncError> {
        let phase = self.phase();
        if phase != Phase::Pending {
            return Err(SyncError::InvalidTransition {
                kind: self.kind,
                phase,
            });
        }
        Ok(self.settle(outcome))
    }

    /// Replace the outcome without checking the current phase.
    pub(crate) fn settle(self, outcome: Outcome<R>) -> Self {
        Self { outcome, ..self }
    }
}

impl<P: Serialize, R: Serialize> Envelope<P, R> {
    /// Render the wire shape of this envelope.
    pub fn to_wire(&self) -> Result<Value, serde_json::Error> {
        let mut wire = Map::new();
        wire.insert("kind".into(), json!(self.kind));
        wire.insert("isAsync".into(), Value::Bool(true));
        wire.insert("dedupKey".into(), json!(self.dedup_key));
        wire.insert("ignoreFailure".into(), json!(self.ignore_failure));
        wire.insert("payload".into(), serde_json::to_value(&self.payload)?);
        match &self.outcome {
            Outcome::Pending => {}
            Outcome::Success(response) => {
                wire.insert("response".into(), serde_json::to_value(response)?);
            }
            Outcome::Error(error) => {
                wire.insert("error".into(), json!(error.message));
            }
        }
        Ok(Value::Object(wire))
    }
}

/// A business operation that goes through the async lifecycle.
///
/// Implemented by zero-sized marker types; `wrap` lifts a typed envelope into
/// the closed [`Action`] enum.
pub trait AsyncOp: Send + Sync + 'static {
    const KIND: ActionKind;

    type Payload: Clone + fmt::Debug + Serialize + Send + Sync + 'static;

    type Response: Clone + fmt::Debug + Serialize + Send + Sync + 'static;

    fn wrap(envelope: Envelope<Self::Payload, Self::Response>) -> Action;
}

macro_rules! async_ops {
    ($($(#[$doc:meta])* $op:ident { payload: $payload:ty, response: $response:ty })+) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy)]
            pub struct $op;

            impl AsyncOp for $op {
                const KIND: ActionKind = ActionKind::$op;
                type Payload = $payload;
                type Response = $response;

                fn wrap(envelope: Envelope<$payload, $response>) -> Action {
                    Action::Async(AsyncAction::$op(envelope))
                }
            }
        )+

        /// An action participating in the async lifecycle.
        #[derive(Debug, Clone, PartialEq)]
        pub enum AsyncAction {
            $($op(Envelope<$payload, $response>),)+
        }

        impl AsyncAction {
            pub fn kind(&self) -> ActionKind {
                match self {
                    $(AsyncAction::$op(e) => e.kind,)+
                }
            }

            pub fn request_id(&self) -> RequestId {
                match self {
                    $(AsyncAction::$op(e) => e.request_id,)+
                }
            }

            pub fn dedup_key(&self) -> &str {
                match self {
                    $(AsyncAction::$op(e) => &e.dedup_key,)+
                }
            }

            pub fn ignore_failure(&self) -> bool {
                match self {
                    $(AsyncAction::$op(e) => e.ignore_failure,)+
                }
            }

            pub fn phase(&self) -> Phase {
                match self {
                    $(AsyncAction::$op(e) => e.phase(),)+
                }
            }

            pub fn error(&self) -> Option<&ActionError> {
                match self {
                    $(AsyncAction::$op(e) => e.error(),)+
                }
            }

            pub fn to_wire(&self) -> Result<Value, serde_json::Error> {
                match self {
                    $(AsyncAction::$op(e) => e.to_wire(),)+
                }
            }
        }
    };
}

async_ops! {
    /// Load the user aggregate. Payload: user id.
    FetchUser { payload: String, response: User }
    /// Persist the local user aggregate.
    SaveUser { payload: User, response: User }
    /// Edit (or create) one project, applied optimistically.
    UpdateProject { payload: Project, response: User }
    /// Job group metadata. Payload: job group id.
    FetchJobGroup { payload: String, response: Option<JobGroup> }
    FetchLaborStats { payload: LaborStatsKey, response: LaborStats }
    FetchAdviceTips { payload: AdviceKey, response: Vec<AdviceTip> }
    FetchAdviceContent { payload: AdviceKey, response: Option<AdviceContent> }
}

/// Every transition attempt the snapshot reducer understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Async(AsyncAction),
    /// Local profile edit, applied with a revision increment.
    UpdateProfile(Profile),
    /// Dismiss the last error message.
    ClearError,
    /// Forget the user and every cache.
    Logout,
    /// A request's owner went away before it settled.
    FetchAbandoned { dedup_key: String },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Async(action) => action.kind(),
            Action::UpdateProfile(_) => ActionKind::UpdateProfile,
            Action::ClearError => ActionKind::ClearError,
            Action::Logout => ActionKind::Logout,
            Action::FetchAbandoned { .. } => ActionKind::FetchAbandoned,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Action::Async(action) => action.phase(),
            _ => Phase::None,
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Action::Async(_))
    }

    pub fn as_async(&self) -> Option<&AsyncAction> {
        match self {
            Action::Async(action) => Some(action),
            _ => None,
        }
    }

    pub fn to_wire(&self) -> Result<Value, serde_json::Error> {
        match self {
            Action::Async(action) => action.to_wire(),
            Action::UpdateProfile(profile) => Ok(json!({
                "kind": self.kind(),
                "payload": serde_json::to_value(profile)?,
            })),
            Action::FetchAbandoned { dedup_key } => Ok(json!({
                "kind": self.kind(),
                "payload": { "dedupKey": dedup_key },
            })),
            Action::ClearError | Action::Logout => Ok(json!({ "kind": self.kind() })),
        }
    }
}

impl From<AsyncAction> for Action {
    fn from(action: AsyncAction) -> Self {
        Action::Async(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats_envelope() -> Envelope<LaborStatsKey, LaborStats> {
        Envelope::pending(
            ActionKind::FetchLaborStats,
            LaborStatsKey::new("75", "job1"),
            Some("stats:75:job1".into()),
            false,
        )
    }

    #[test]
    fn test_dedup_key_defaults_to_kind() {
        let e: Envelope<(), ()> = Envelope::pending(ActionKind::SaveUser, (), None, false);
        assert_eq!(e.dedup_key, "save-user");
        assert_eq!(e.phase(), Phase::Pending);
    }

    #[test]
    fn test_pending_to_success_keeps_identity() {
        let pending = stats_envelope();
        let request_id = pending.request_id;

        let done = pending
            .succeed(LaborStats {
                count: 42,
                unemployment_days: None,
            })
            .unwrap();

        assert_eq!(done.phase(), Phase::Success);
        assert_eq!(done.request_id, request_id);
        assert_eq!(done.response().map(|s| s.count), Some(42));
    }

    #[test]
    fn test_terminal_envelope_cannot_transition_again() {
        let failed = stats_envelope().fail(ActionError::new("offline")).unwrap();

        let err = failed
            .clone()
            .succeed(LaborStats {
                count: 1,
                unemployment_days: None,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::InvalidTransition {
                kind: ActionKind::FetchLaborStats,
                phase: Phase::Error
            }
        ));
        assert!(failed.fail(ActionError::new("again")).is_err());
    }

    #[test]
    fn test_wire_shape_and_phase_inference() {
        let pending = stats_envelope();
        let wire = pending.to_wire().unwrap();
        assert_eq!(wire["kind"], "fetch-labor-stats");
        assert_eq!(wire["isAsync"], true);
        assert_eq!(wire["dedupKey"], "stats:75:job1");
        assert_eq!(wire["payload"]["regionId"], "75");
        assert!(wire.get("response").is_none());
        assert_eq!(Phase::infer(&wire), Phase::Pending);

        let success = pending
            .clone()
            .succeed(LaborStats {
                count: 42,
                unemployment_days: None,
            })
            .unwrap()
            .to_wire()
            .unwrap();
        assert_eq!(success["response"]["count"], 42);
        assert_eq!(Phase::infer(&success), Phase::Success);

        let error = pending
            .fail(ActionError::new("offline"))
            .unwrap()
            .to_wire()
            .unwrap();
        assert_eq!(error["error"], "offline");
        assert_eq!(Phase::infer(&error), Phase::Error);
    }

    #[test]
    fn test_null_response_is_still_success() {
        let done = FetchJobGroup::wrap(
            Envelope::pending(ActionKind::FetchJobGroup, "A1234".to_string(), None, true)
                .succeed(None)
                .unwrap(),
        );
        let wire = done.to_wire().unwrap();
        assert!(wire["response"].is_null());
        assert_eq!(Phase::infer(&wire), Phase::Success);
    }

    #[test]
    fn test_sync_actions_have_no_phase() {
        assert_eq!(Action::ClearError.phase(), Phase::None);
        assert!(!Action::Logout.is_async());

        let wire = Action::ClearError.to_wire().unwrap();
        assert_eq!(wire["kind"], "clear-error");
        assert_eq!(Phase::infer(&wire), Phase::None);
    }

    #[test]
    fn test_async_op_wrap_matches_kind() {
        let action = FetchLaborStats::wrap(stats_envelope());
        assert_eq!(action.kind(), ActionKind::FetchLaborStats);
        assert_eq!(action.as_async().unwrap().dedup_key(), "stats:75:job1");
        assert!(ActionKind::FetchLaborStats.is_async());
        assert!(!ActionKind::ClearError.is_async());
    }

    #[test]
    fn test_kind_serializes_to_wire_name() {
        for kind in [
            ActionKind::FetchUser,
            ActionKind::SaveUser,
            ActionKind::UpdateProject,
            ActionKind::FetchJobGroup,
            ActionKind::FetchLaborStats,
            ActionKind::FetchAdviceTips,
            ActionKind::FetchAdviceContent,
            ActionKind::UpdateProfile,
            ActionKind::ClearError,
            ActionKind::Logout,
            ActionKind::FetchAbandoned,
        ] {
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.as_str());
        }
    }
}
