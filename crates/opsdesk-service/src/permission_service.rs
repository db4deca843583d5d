//! Permission catalog orchestration and bulk role-permission edits.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use opsdesk_core::{
    CoreError, CoreResult, EntityRef, MutationKind, Page, PageLimits, PageRequest, Permission,
    PermissionFilter, PermissionId, PermissionKey, PermissionRepository, RequestContext,
    ResourceType, RoleId, RoleRepository,
};

use crate::audit::{best_effort_pre_image, AuditRecorder};
use crate::role_service::role_image;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePermission {
    pub name: String,
    pub resource: String,
    pub action: String,
    pub description: Option<String>,
}

/// `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePermission {
    pub name: Option<String>,
    pub resource: Option<String>,
    pub action: Option<String>,
    pub description: Option<String>,
}

pub struct PermissionService {
    permissions: Arc<dyn PermissionRepository>,
    roles: Arc<dyn RoleRepository>,
    audit: Arc<AuditRecorder>,
    limits: PageLimits,
}

impl PermissionService {
    #[must_use]
    pub fn new(
        permissions: Arc<dyn PermissionRepository>,
        roles: Arc<dyn RoleRepository>,
        audit: Arc<AuditRecorder>,
        limits: PageLimits,
    ) -> Self {
        Self {
            permissions,
            roles,
            audit,
            limits,
        }
    }

    /// Fails with `AlreadyExists` when the name or the `(resource, action)`
    /// pair is taken.
    #[instrument(skip_all, fields(resource = %input.resource, action = %input.action))]
    pub async fn create_permission(
        &self,
        ctx: &RequestContext,
        input: CreatePermission,
    ) -> CoreResult<Permission> {
        let name = required("permission name", &input.name)?;
        let resource = required("resource", &input.resource)?;
        let action = required("action", &input.action)?;
        let permission = Permission::new(name, resource, action, input.description);

        self.audit
            .mutate(ctx, MutationKind::Create, None, async {
                self.permissions.create(&permission).await?;
                Ok(permission)
            })
            .await
    }

    #[instrument(skip_all, fields(%permission_id))]
    pub async fn update_permission(
        &self,
        ctx: &RequestContext,
        permission_id: PermissionId,
        input: UpdatePermission,
    ) -> CoreResult<Permission> {
        let name = input
            .name
            .as_deref()
            .map(|n| required("permission name", n))
            .transpose()?;
        let resource = input
            .resource
            .as_deref()
            .map(|r| required("resource", r))
            .transpose()?;
        let action = input
            .action
            .as_deref()
            .map(|a| required("action", a))
            .transpose()?;
        let before = best_effort_pre_image(
            "permission",
            &permission_id.to_string(),
            self.permissions.get(permission_id).await,
        )?;

        self.audit
            .mutate(ctx, MutationKind::Update, before, async {
                let mut permission = self
                    .permissions
                    .get(permission_id)
                    .await?
                    .ok_or_else(|| CoreError::not_found("permission", permission_id.to_string()))?;

                if let Some(name) = name {
                    permission.name = name.to_string();
                }
                let key = PermissionKey::new(
                    resource.unwrap_or(permission.resource.as_str()),
                    action.unwrap_or(permission.action.as_str()),
                );
                permission.resource = key.resource;
                permission.action = key.action;
                if input.description.is_some() {
                    permission.description = input.description.clone();
                }
                permission.touch();

                self.permissions.update(&permission).await?;
                Ok(permission)
            })
            .await
    }

    /// Deletes the permission and strips it from every role that held it.
    ///
    /// There is no guard against deleting a permission still in use.
    #[instrument(skip_all, fields(%permission_id))]
    pub async fn delete_permission(
        &self,
        ctx: &RequestContext,
        permission_id: PermissionId,
    ) -> CoreResult<()> {
        let before = best_effort_pre_image(
            "permission",
            &permission_id.to_string(),
            self.permissions.get(permission_id).await,
        )?;

        self.audit
            .mutate(ctx, MutationKind::Delete, before, async {
                let affected_roles = self.permissions.delete(permission_id).await?;
                if affected_roles > 0 {
                    warn!(%permission_id, affected_roles, "deleted permission was still bound to roles");
                }
                Ok(EntityRef::new(ResourceType::Permission, permission_id.to_string()))
            })
            .await?;
        Ok(())
    }

    pub async fn get_permission(&self, permission_id: PermissionId) -> CoreResult<Permission> {
        self.permissions
            .get(permission_id)
            .await?
            .ok_or_else(|| CoreError::not_found("permission", permission_id.to_string()))
    }

    pub async fn find_by_key(&self, resource: &str, action: &str) -> CoreResult<Option<Permission>> {
        self.permissions
            .get_by_key(&PermissionKey::new(resource, action))
            .await
    }

    pub async fn list_permissions(
        &self,
        filter: &PermissionFilter,
        page: PageRequest,
    ) -> CoreResult<Page<Permission>> {
        self.permissions
            .list(filter, page.normalize(self.limits))
            .await
    }

    /// Set-union on the role's permissions. Already-bound ids are no-ops.
    #[instrument(skip_all, fields(%role_id, count = permission_ids.len()))]
    pub async fn add_permissions_to_role(
        &self,
        ctx: &RequestContext,
        role_id: RoleId,
        permission_ids: &[PermissionId],
    ) -> CoreResult<()> {
        if permission_ids.is_empty() {
            return Err(CoreError::bad_request("permission id list must not be empty"));
        }
        let before =
            best_effort_pre_image("role", &role_id.to_string(), self.roles.get_details(role_id).await)?;

        self.audit
            .mutate_observed(
                ctx,
                MutationKind::Update,
                before,
                async {
                    self.roles.add_permissions(role_id, permission_ids).await?;
                    Ok(EntityRef::new(ResourceType::Role, role_id.to_string()))
                },
                || role_image(self.roles.as_ref(), role_id),
            )
            .await?;
        Ok(())
    }

    /// Set-difference on the role's permissions. Unbound ids are no-ops.
    #[instrument(skip_all, fields(%role_id, count = permission_ids.len()))]
    pub async fn remove_permissions_from_role(
        &self,
        ctx: &RequestContext,
        role_id: RoleId,
        permission_ids: &[PermissionId],
    ) -> CoreResult<()> {
        if permission_ids.is_empty() {
            return Err(CoreError::bad_request("permission id list must not be empty"));
        }
        let before =
            best_effort_pre_image("role", &role_id.to_string(), self.roles.get_details(role_id).await)?;

        self.audit
            .mutate_observed(
                ctx,
                MutationKind::Update,
                before,
                async {
                    self.roles.remove_permissions(role_id, permission_ids).await?;
                    Ok(EntityRef::new(ResourceType::Role, role_id.to_string()))
                },
                || role_image(self.roles.as_ref(), role_id),
            )
            .await?;
        Ok(())
    }
}

fn required<'a>(field: &str, value: &'a str) -> CoreResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CoreError::bad_request(format!("{field} must not be empty")));
    }
    Ok(value)
}
