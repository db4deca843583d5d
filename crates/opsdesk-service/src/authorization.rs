//! Role-based authorization.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use opsdesk_core::{
    Claims, CoreError, CoreResult, PermissionKey, RoleBindingRepository, UserId, UserRepository,
};

/// Decides allow/deny from the union of permissions across a user's roles.
///
/// Holds no state between calls; role and permission changes are visible to
/// the next evaluation.
pub struct AuthorizationEvaluator {
    users: Arc<dyn UserRepository>,
    bindings: Arc<dyn RoleBindingRepository>,
}

impl AuthorizationEvaluator {
    #[must_use]
    pub fn new(users: Arc<dyn UserRepository>, bindings: Arc<dyn RoleBindingRepository>) -> Self {
        Self { users, bindings }
    }

    /// Sorted, de-duplicated `(resource, action)` pairs the user holds.
    ///
    /// Missing, deleted, inactive and pending users hold nothing.
    pub async fn effective_permissions(
        &self,
        user_id: UserId,
    ) -> CoreResult<BTreeSet<PermissionKey>> {
        let Some(user) = self.users.get(user_id).await? else {
            return Ok(BTreeSet::new());
        };
        if !user.is_enabled() {
            debug!(%user_id, status = user.status.as_str(), "user not enabled, no permissions");
            return Ok(BTreeSet::new());
        }

        let permissions = self.bindings.permissions_for_user(user_id).await?;
        Ok(permissions.iter().map(|p| p.key()).collect())
    }

    pub async fn authorize(&self, claims: &Claims, resource: &str, action: &str) -> CoreResult<bool> {
        let key = PermissionKey::new(resource, action);
        let allowed = self
            .effective_permissions(claims.user_id)
            .await?
            .contains(&key);
        debug!(user_id = %claims.user_id, permission = %key, allowed, "authorization decision");
        Ok(allowed)
    }

    /// Like [`authorize`](Self::authorize) but turns a deny into `Forbidden`.
    pub async fn require(&self, claims: &Claims, resource: &str, action: &str) -> CoreResult<()> {
        if self.authorize(claims, resource, action).await? {
            return Ok(());
        }
        let key = PermissionKey::new(resource, action);
        warn!(user_id = %claims.user_id, permission = %key, "request denied");
        Err(CoreError::forbidden(format!("missing permission {key}")))
    }

    /// Evaluation scope for one request; resolves the permission set at most once.
    #[must_use]
    pub fn context<'a>(&'a self, claims: &'a Claims) -> AuthorizationContext<'a> {
        AuthorizationContext {
            evaluator: self,
            claims,
            permissions: OnceCell::new(),
        }
    }
}

/// Per-request permission cache. Dropped with the request, so it never needs
/// invalidation.
pub struct AuthorizationContext<'a> {
    evaluator: &'a AuthorizationEvaluator,
    claims: &'a Claims,
    permissions: OnceCell<BTreeSet<PermissionKey>>,
}

impl<'a> AuthorizationContext<'a> {
    #[must_use]
    pub fn claims(&self) -> &Claims {
        self.claims
    }

    pub async fn permissions(&self) -> CoreResult<&BTreeSet<PermissionKey>> {
        self.permissions
            .get_or_try_init(|| self.evaluator.effective_permissions(self.claims.user_id))
            .await
    }

    pub async fn allows(&self, resource: &str, action: &str) -> CoreResult<bool> {
        Ok(self
            .permissions()
            .await?
            .contains(&PermissionKey::new(resource, action)))
    }

    pub async fn require(&self, resource: &str, action: &str) -> CoreResult<()> {
        if self.allows(resource, action).await? {
            return Ok(());
        }
        let key = PermissionKey::new(resource, action);
        warn!(user_id = %self.claims.user_id, permission = %key, "request denied");
        Err(CoreError::forbidden(format!("missing permission {key}")))
    }
}
