//! Caller identity, passed explicitly into every evaluator and orchestrator call.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::audit::ClientMeta;
use crate::error::{CoreError, CoreResult};
use crate::ids::UserId;

/// Verified identity of the current caller, produced by an external
/// authentication step (bearer token, session, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: UserId,
    pub email: String,
    pub name: String,
}

/// Everything a single request carries into the core.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// `None` only for system work such as seeding.
    pub claims: Option<Claims>,
    pub client: ClientMeta,
    /// Mutations not committed by this instant are rolled back.
    pub deadline: Option<Instant>,
}

/// Display name recorded for actions without an authenticated caller.
pub const SYSTEM_ACTOR: &str = "system";

impl Claims {
    #[must_use]
    pub fn new(user_id: UserId, email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
            name: name.into(),
        }
    }
}

impl RequestContext {
    /// Context for an authenticated caller.
    #[must_use]
    pub fn new(claims: Claims) -> Self {
        Self {
            claims: Some(claims),
            ..Self::default()
        }
    }

    /// Context for internal work with no caller.
    #[must_use]
    pub fn system() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_client(mut self, client: ClientMeta) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Claims of the caller, or `Forbidden` when the request is anonymous.
    pub fn claims(&self) -> CoreResult<&Claims> {
        self.claims
            .as_ref()
            .ok_or_else(|| CoreError::forbidden("request carries no authenticated identity"))
    }

    /// `(actor id, actor display name)` as written to the audit trail.
    #[must_use]
    pub fn actor(&self) -> (Option<UserId>, String) {
        match &self.claims {
            Some(claims) => (Some(claims.user_id), claims.name.clone()),
            None => (None, SYSTEM_ACTOR.to_string()),
        }
    }
}
