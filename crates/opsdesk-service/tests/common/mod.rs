#![allow(dead_code)]

use std::time::Duration;

use opsdesk_core::{
    BindingMode, Claims, Permission, PermissionId, RequestContext, RoleDetails, UserDetails,
};
use opsdesk_metadata::{create_sqlite_pool, run_migrations};
use opsdesk_service::{
    seed_catalog, Config, CreatePermission, CreateRole, CreateUser, OpsDesk, ADMIN_ROLE,
};
use sqlx::SqlitePool;
use tempfile::TempDir;

pub const PASSWORD: &str = "correct horse battery";

pub struct TestApp {
    _dir: TempDir,
    pub pool: SqlitePool,
    pub app: OpsDesk,
}

pub async fn setup() -> TestApp {
    setup_with_pool_size(4).await
}

pub async fn setup_with_pool_size(max_connections: u32) -> TestApp {
    let dir = tempfile::tempdir().expect("temp dir");
    let database_url = format!("sqlite://{}", dir.path().join("opsdesk.db").display());
    let pool = create_sqlite_pool(&database_url, max_connections, Duration::from_secs(5))
        .await
        .expect("failed to create pool");
    run_migrations(&pool).await.expect("failed migrations");

    let app = OpsDesk::from_pool(pool.clone(), &Config::default());
    TestApp {
        _dir: dir,
        pool,
        app,
    }
}

pub fn system() -> RequestContext {
    RequestContext::system()
}

pub fn as_user(user: &UserDetails) -> RequestContext {
    RequestContext::new(Claims::new(
        user.user.user_id,
        user.user.email.clone(),
        user.user.name.clone(),
    ))
}

pub async fn permission(t: &TestApp, resource: &str, action: &str) -> Permission {
    t.app
        .permissions
        .create_permission(
            &system(),
            CreatePermission {
                name: format!("{resource} {action}"),
                resource: resource.to_string(),
                action: action.to_string(),
                description: None,
            },
        )
        .await
        .expect("create permission")
}

pub async fn role(t: &TestApp, name: &str, permission_ids: &[PermissionId]) -> RoleDetails {
    let role = t
        .app
        .roles
        .create_role(
            &system(),
            CreateRole {
                name: name.to_string(),
                description: None,
                permission_ids: permission_ids.to_vec(),
            },
        )
        .await
        .expect("create role");
    t.app.roles.get_role(role.role_id).await.expect("get role")
}

pub async fn user(t: &TestApp, name: &str, email: &str) -> UserDetails {
    let user = t
        .app
        .users
        .create_user(
            &system(),
            CreateUser {
                name: name.to_string(),
                email: email.to_string(),
                password: PASSWORD.to_string(),
                status: None,
                role_ids: vec![],
            },
        )
        .await
        .expect("create user");
    t.app.users.get_user(user.user_id).await.expect("get user")
}

/// A live account holding the seeded administrator role.
pub async fn admin(t: &TestApp) -> UserDetails {
    let admin = user(t, "Admin", "admin@example.com").await;
    seed_catalog(&t.app, Some("admin@example.com"))
        .await
        .expect("seed catalog");
    let role = t
        .app
        .roles
        .find_by_name(ADMIN_ROLE)
        .await
        .expect("lookup")
        .expect("administrator role");
    t.app
        .users
        .assign_roles(&system(), admin.user.user_id, &[role.role_id], BindingMode::Merge)
        .await
        .expect("bind admin");
    t.app.users.get_user(admin.user.user_id).await.expect("get admin")
}
