//! Idempotent seeding of the built-in permission catalog and administrator role.

use std::collections::BTreeSet;

use tracing::{info, warn};

use opsdesk_core::{
    AuditAction, BindingMode, CoreResult, PermissionId, RequestContext, ResourceType,
};

use crate::app::OpsDesk;
use crate::permission_service::CreatePermission;
use crate::role_service::CreateRole;

pub const ADMIN_ROLE: &str = "administrator";

const CRUD: [AuditAction; 4] = [
    AuditAction::Create,
    AuditAction::Read,
    AuditAction::Update,
    AuditAction::Delete,
];

/// What a seeding run changed. All zero/false on a re-run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub permissions_created: usize,
    pub role_created: bool,
    pub permissions_granted: usize,
    pub admin_bound: bool,
}

/// Creates CRUD permissions for every built-in resource type, an
/// `administrator` role holding all of them, and binds that role to
/// `admin_email` when such a live account exists.
///
/// Everything is audited with the system actor.
pub async fn seed_catalog(app: &OpsDesk, admin_email: Option<&str>) -> CoreResult<SeedReport> {
    let ctx = RequestContext::system();
    let mut report = SeedReport::default();
    let mut catalog = BTreeSet::<PermissionId>::new();

    for resource in ResourceType::builtin() {
        for action in CRUD {
            let existing = app
                .permissions
                .find_by_key(resource.as_str(), action.as_str())
                .await?;
            let permission = match existing {
                Some(permission) => permission,
                None => {
                    report.permissions_created += 1;
                    app.permissions
                        .create_permission(
                            &ctx,
                            CreatePermission {
                                name: format!("{resource}:{}", action.as_str()),
                                resource: resource.as_str().to_string(),
                                action: action.as_str().to_string(),
                                description: Some(format!(
                                    "{} {} records",
                                    action.as_str().to_lowercase(),
                                    resource.as_str().to_lowercase()
                                )),
                            },
                        )
                        .await?
                }
            };
            catalog.insert(permission.permission_id);
        }
    }

    let role_id = match app.roles.find_by_name(ADMIN_ROLE).await? {
        Some(role) => {
            let details = app.roles.get_role(role.role_id).await?;
            let held: BTreeSet<PermissionId> = details.permission_ids().into_iter().collect();
            let missing: Vec<PermissionId> = catalog.difference(&held).copied().collect();
            if !missing.is_empty() {
                app.permissions
                    .add_permissions_to_role(&ctx, role.role_id, &missing)
                    .await?;
                report.permissions_granted = missing.len();
            }
            role.role_id
        }
        None => {
            let role = app
                .roles
                .create_role(
                    &ctx,
                    CreateRole {
                        name: ADMIN_ROLE.to_string(),
                        description: Some("Full access to every managed resource".to_string()),
                        permission_ids: catalog.iter().copied().collect(),
                    },
                )
                .await?;
            report.role_created = true;
            report.permissions_granted = catalog.len();
            role.role_id
        }
    };

    if let Some(email) = admin_email {
        match app.users.find_by_email(email).await? {
            Some(user) => {
                let bound = app.roles.roles_for_user(user.user_id).await?;
                if !bound.iter().any(|r| r.role_id == role_id) {
                    app.users
                        .assign_roles(&ctx, user.user_id, &[role_id], BindingMode::Merge)
                        .await?;
                    report.admin_bound = true;
                }
            }
            None => warn!(email, "bootstrap admin account not found, role left unbound"),
        }
    }

    info!(?report, "catalog seeded");
    Ok(report)
}
