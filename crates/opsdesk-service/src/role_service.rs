//! Role registry orchestration.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::instrument;

use opsdesk_core::{
    Auditable, CoreError, CoreResult, EntityRef, MutationKind, Page, PageLimits, PageRequest,
    PermissionId, RequestContext, ResourceType, Role, RoleBindingRepository, RoleDetails, RoleId,
    RoleRepository, UserId,
};

use crate::audit::{best_effort_pre_image, AuditRecorder};

/// Input for [`RoleService::create_role`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateRole {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub permission_ids: Vec<PermissionId>,
}

/// Input for [`RoleService::update_role`]. `None` leaves a field unchanged.
///
/// `permission_ids`, when present, becomes the role's entire permission set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRole {
    pub name: Option<String>,
    pub description: Option<String>,
    pub permission_ids: Option<Vec<PermissionId>>,
}

pub struct RoleService {
    roles: Arc<dyn RoleRepository>,
    bindings: Arc<dyn RoleBindingRepository>,
    audit: Arc<AuditRecorder>,
    limits: PageLimits,
}

impl RoleService {
    #[must_use]
    pub fn new(
        roles: Arc<dyn RoleRepository>,
        bindings: Arc<dyn RoleBindingRepository>,
        audit: Arc<AuditRecorder>,
        limits: PageLimits,
    ) -> Self {
        Self {
            roles,
            bindings,
            audit,
            limits,
        }
    }

    /// Creates the role and binds its permissions in one transaction.
    ///
    /// Returns the stored row; [`get_role`](Self::get_role) gives the joined view.
    #[instrument(skip_all, fields(name = %input.name))]
    pub async fn create_role(&self, ctx: &RequestContext, input: CreateRole) -> CoreResult<Role> {
        let name = validate_name(&input.name)?;
        let permission_ids = input.permission_ids;
        let role = Role::new(name, input.description);
        let role_id = role.role_id;

        self.audit
            .mutate_observed(
                ctx,
                MutationKind::Create,
                None,
                async {
                    self.roles.create(&role, &permission_ids).await?;
                    Ok(role)
                },
                || role_image(self.roles.as_ref(), role_id),
            )
            .await
    }

    #[instrument(skip_all, fields(%role_id))]
    pub async fn update_role(
        &self,
        ctx: &RequestContext,
        role_id: RoleId,
        input: UpdateRole,
    ) -> CoreResult<Role> {
        let name = input.name.as_deref().map(validate_name).transpose()?;
        let before =
            best_effort_pre_image("role", &role_id.to_string(), self.roles.get_details(role_id).await)?;

        self.audit
            .mutate_observed(
                ctx,
                MutationKind::Update,
                before,
                async {
                    let mut role = self
                        .roles
                        .get(role_id)
                        .await?
                        .ok_or_else(|| CoreError::not_found("role", role_id.to_string()))?;
                    if let Some(name) = name {
                        role.name = name.to_string();
                    }
                    if input.description.is_some() {
                        role.description = input.description.clone();
                    }
                    role.touch();

                    self.roles
                        .update(&role, input.permission_ids.as_deref())
                        .await?;
                    Ok(role)
                },
                || role_image(self.roles.as_ref(), role_id),
            )
            .await
    }

    /// Fails with `Conflict` while any user still holds the role.
    #[instrument(skip_all, fields(%role_id))]
    pub async fn delete_role(&self, ctx: &RequestContext, role_id: RoleId) -> CoreResult<()> {
        let before =
            best_effort_pre_image("role", &role_id.to_string(), self.roles.get_details(role_id).await)?;

        self.audit
            .mutate(ctx, MutationKind::Delete, before, async {
                self.roles.delete(role_id).await?;
                Ok(EntityRef::new(ResourceType::Role, role_id.to_string()))
            })
            .await?;
        Ok(())
    }

    pub async fn get_role(&self, role_id: RoleId) -> CoreResult<RoleDetails> {
        self.details(role_id).await
    }

    pub async fn find_by_name(&self, name: &str) -> CoreResult<Option<Role>> {
        self.roles.get_by_name(name.trim()).await
    }

    pub async fn list_roles(
        &self,
        name_filter: Option<&str>,
        page: PageRequest,
    ) -> CoreResult<Page<Role>> {
        let filter = name_filter.map(str::trim).filter(|f| !f.is_empty());
        self.roles.list(filter, page.normalize(self.limits)).await
    }

    pub async fn roles_for_user(&self, user_id: UserId) -> CoreResult<Vec<Role>> {
        self.bindings.roles_for_user(user_id).await
    }

    async fn details(&self, role_id: RoleId) -> CoreResult<RoleDetails> {
        self.roles
            .get_details(role_id)
            .await?
            .ok_or_else(|| CoreError::not_found("role", role_id.to_string()))
    }
}

/// Joined image of a role for the audit trail, if the role is still there.
pub(crate) async fn role_image(
    roles: &dyn RoleRepository,
    role_id: RoleId,
) -> CoreResult<Option<JsonValue>> {
    Ok(roles.get_details(role_id).await?.map(|details| details.snapshot()))
}

fn validate_name(name: &str) -> CoreResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::bad_request("role name must not be empty"));
    }
    Ok(name)
}
