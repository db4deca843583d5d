//! Endpoint guards that run in front of the orchestrators.
//!
//! The evaluator only answers "does this user hold resource:action". The
//! guard adds the self-service rule: a caller may read and edit their own
//! profile without any role, but status and role changes always need an
//! administrative permission.

use std::sync::Arc;

use opsdesk_core::{AuditAction, CoreResult, RequestContext, ResourceType, UserId};

use crate::authorization::AuthorizationEvaluator;
use crate::user_service::UpdateUser;

pub struct AccessGuard {
    evaluator: Arc<AuthorizationEvaluator>,
}

impl AccessGuard {
    #[must_use]
    pub fn new(evaluator: Arc<AuthorizationEvaluator>) -> Self {
        Self { evaluator }
    }

    /// Plain permission gate for everything without a self-service exception.
    pub async fn check(
        &self,
        ctx: &RequestContext,
        resource: &ResourceType,
        action: AuditAction,
    ) -> CoreResult<()> {
        let claims = ctx.claims()?;
        self.evaluator
            .require(claims, resource.as_str(), action.as_str())
            .await
    }

    pub async fn check_user_read(&self, ctx: &RequestContext, target: UserId) -> CoreResult<()> {
        if ctx.claims()?.user_id == target {
            return Ok(());
        }
        self.check(ctx, &ResourceType::User, AuditAction::Read).await
    }

    pub async fn check_user_update(
        &self,
        ctx: &RequestContext,
        target: UserId,
        change: &UpdateUser,
    ) -> CoreResult<()> {
        let is_self = ctx.claims()?.user_id == target;
        if is_self && !change.touches_elevated_fields() {
            return Ok(());
        }
        self.check(ctx, &ResourceType::User, AuditAction::Update).await
    }

    /// Own password only, unless the caller administers users.
    pub async fn check_password_change(
        &self,
        ctx: &RequestContext,
        target: UserId,
    ) -> CoreResult<()> {
        if ctx.claims()?.user_id == target {
            return Ok(());
        }
        self.check(ctx, &ResourceType::User, AuditAction::Update).await
    }

    /// Binding changes are elevated even on the caller's own account.
    pub async fn check_role_binding(&self, ctx: &RequestContext) -> CoreResult<()> {
        self.check(ctx, &ResourceType::User, AuditAction::Update).await
    }
}
