//! Transport seam: how requests reach the remote service.
//!
//! The crate never speaks HTTP itself. A transport receives the action kind,
//! the JSON-encoded arguments, and the session credentials (when available),
//! and returns the JSON response body.

use async_trait::async_trait;
use serde_json::Value;

use crate::action::ActionKind;
use crate::session::Credentials;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Perform one request.
    ///
    /// `credentials` is `None` for anonymous calls to public endpoints.
    async fn request(
        &self,
        kind: ActionKind,
        args: Value,
        credentials: Option<Credentials>,
    ) -> anyhow::Result<Value>;
}
