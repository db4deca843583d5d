use std::time::Duration;

use chrono::Utc;
use opsdesk_core::{
    AuditAction, AuditLogEntry, AuditLogRepository, AuditQuery, BindingMode, CoreError,
    PageRequest, Permission, PermissionFilter, PermissionKey, PermissionRepository,
    ResourceType, Role, RoleBindingRepository, RoleRepository, User, UserFilter,
    UserRepository, UserStatus, GENESIS_HASH,
};
use opsdesk_metadata::{
    create_sqlite_pool, run_migrations, SqliteAuditLogRepository, SqlitePermissionRepository,
    SqliteRoleBindingRepository, SqliteRoleRepository, SqliteUserRepository,
};
use serde_json::json;
use sqlx::SqlitePool;
use tempfile::TempDir;

struct TestContext {
    _dir: TempDir,
    pool: SqlitePool,
    users: SqliteUserRepository,
    roles: SqliteRoleRepository,
    permissions: SqlitePermissionRepository,
    bindings: SqliteRoleBindingRepository,
    audit_logs: SqliteAuditLogRepository,
}

async fn setup_context() -> TestContext {
    let dir = tempfile::tempdir().expect("temp dir");
    let database_url = format!("sqlite://{}", dir.path().join("metadata.db").display());
    let pool = create_sqlite_pool(&database_url, 4, Duration::from_secs(5))
        .await
        .expect("failed to create pool");
    run_migrations(&pool).await.expect("failed migrations");

    TestContext {
        _dir: dir,
        users: SqliteUserRepository::new(pool.clone()),
        roles: SqliteRoleRepository::new(pool.clone()),
        permissions: SqlitePermissionRepository::new(pool.clone()),
        bindings: SqliteRoleBindingRepository::new(pool.clone()),
        audit_logs: SqliteAuditLogRepository::new(pool.clone()),
        pool,
    }
}

async fn permission(ctx: &TestContext, resource: &str, action: &str) -> Permission {
    let permission = Permission::new(format!("{resource} {action}"), resource, action, None);
    ctx.permissions
        .create(&permission)
        .await
        .expect("create permission");
    permission
}

async fn user(ctx: &TestContext, email: &str) -> User {
    let user = User::new("Test User", email, "hash", UserStatus::Active);
    ctx.users.create(&user, &[]).await.expect("create user");
    user
}

fn all() -> PageRequest {
    PageRequest::new(1, 100)
}

// ==== Permission Catalog Tests ====

#[tokio::test]
async fn duplicate_resource_action_pair_is_rejected() {
    let ctx = setup_context().await;
    permission(&ctx, "asset", "read").await;

    let clash = Permission::new("Another name", "ASSET", "Read", None);
    let err = ctx.permissions.create(&clash).await.unwrap_err();
    assert!(matches!(err, CoreError::AlreadyExists { entity: "permission", ref id } if id == "asset:read"));
}

#[tokio::test]
async fn duplicate_permission_name_is_rejected() {
    let ctx = setup_context().await;
    let first = permission(&ctx, "asset", "read").await;

    let clash = Permission::new(first.name.to_uppercase(), "asset", "write", None);
    let err = ctx.permissions.create(&clash).await.unwrap_err();
    assert!(matches!(err, CoreError::AlreadyExists { .. }));
}

#[tokio::test]
async fn permission_lookup_by_key_and_filtered_list() {
    let ctx = setup_context().await;
    permission(&ctx, "asset", "read").await;
    permission(&ctx, "asset", "write").await;
    permission(&ctx, "role", "delete").await;

    let found = ctx
        .permissions
        .get_by_key(&PermissionKey::new("ASSET", "WRITE"))
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(found.action, "write");

    let filter = PermissionFilter {
        resource: Some("asset".to_string()),
        name: None,
    };
    let page = ctx.permissions.list(&filter, all()).await.expect("list");
    assert_eq!(page.total, 2);
    assert_eq!(page.items.len(), 2);
}

#[tokio::test]
async fn deleting_permission_reports_affected_roles() {
    let ctx = setup_context().await;
    let p = permission(&ctx, "asset", "read").await;
    let role_a = Role::new("a", None);
    let role_b = Role::new("b", None);
    ctx.roles.create(&role_a, &[p.permission_id]).await.expect("role a");
    ctx.roles.create(&role_b, &[p.permission_id]).await.expect("role b");

    let affected = ctx.permissions.delete(p.permission_id).await.expect("delete");
    assert_eq!(affected, 2);

    let details = ctx
        .roles
        .get_details(role_a.role_id)
        .await
        .expect("details")
        .expect("role present");
    assert!(details.permissions.is_empty());

    let err = ctx.permissions.delete(p.permission_id).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
}

// ==== Role Registry Tests ====

#[tokio::test]
async fn create_role_with_unknown_permission_leaves_nothing_behind() {
    let ctx = setup_context().await;
    let p = permission(&ctx, "asset", "read").await;
    let ghost = Permission::new("ghost", "ghost", "read", None);

    let role = Role::new("ops", None);
    let err = ctx
        .roles
        .create(&role, &[p.permission_id, ghost.permission_id])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { entity: "permission", .. }));
    assert!(ctx.roles.get(role.role_id).await.expect("get").is_none());
}

#[tokio::test]
async fn role_names_are_unique_ignoring_case() {
    let ctx = setup_context().await;
    ctx.roles.create(&Role::new("Ops", None), &[]).await.expect("first");

    let err = ctx.roles.create(&Role::new("ops", None), &[]).await.unwrap_err();
    assert!(matches!(err, CoreError::AlreadyExists { entity: "role", .. }));
}

#[tokio::test]
async fn update_role_replaces_permission_set() {
    let ctx = setup_context().await;
    let p1 = permission(&ctx, "asset", "read").await;
    let p2 = permission(&ctx, "asset", "write").await;
    let p3 = permission(&ctx, "asset", "delete").await;

    let mut role = Role::new("ops", None);
    ctx.roles
        .create(&role, &[p1.permission_id, p2.permission_id])
        .await
        .expect("create");

    role.touch();
    ctx.roles
        .update(&role, Some(&[p2.permission_id, p3.permission_id]))
        .await
        .expect("update");

    let details = ctx.roles.get_details(role.role_id).await.expect("get").expect("present");
    let mut ids = details.permission_ids();
    ids.sort();
    let mut expected = vec![p2.permission_id, p3.permission_id];
    expected.sort();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn update_role_without_permission_ids_keeps_set() {
    let ctx = setup_context().await;
    let p1 = permission(&ctx, "asset", "read").await;
    let mut role = Role::new("ops", None);
    ctx.roles.create(&role, &[p1.permission_id]).await.expect("create");

    role.description = Some("operators".to_string());
    ctx.roles.update(&role, None).await.expect("update");

    let details = ctx.roles.get_details(role.role_id).await.expect("get").expect("present");
    assert_eq!(details.permissions.len(), 1);
    assert_eq!(details.role.description.as_deref(), Some("operators"));
}

#[tokio::test]
async fn bound_role_cannot_be_deleted() {
    let ctx = setup_context().await;
    let role = Role::new("ops", None);
    ctx.roles.create(&role, &[]).await.expect("create role");
    let u = user(&ctx, "ops@example.com").await;
    ctx.bindings
        .assign(u.user_id, &[role.role_id], BindingMode::Merge)
        .await
        .expect("assign");

    let err = ctx.roles.delete(role.role_id).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict { .. }));

    ctx.bindings.remove(u.user_id, &[role.role_id]).await.expect("unbind");
    ctx.roles.delete(role.role_id).await.expect("delete");
    assert!(ctx.roles.get(role.role_id).await.expect("get").is_none());
}

#[tokio::test]
async fn list_roles_filters_case_insensitively_in_creation_order() {
    let ctx = setup_context().await;
    for name in ["Ops-East", "billing", "ops-west", "100%_ops"] {
        ctx.roles.create(&Role::new(name, None), &[]).await.expect("create");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let page = ctx.roles.list(Some("OPS"), all()).await.expect("list");
    let names: Vec<_> = page.items.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(page.total, 3);
    assert_eq!(names, vec!["Ops-East", "ops-west", "100%_ops"]);

    let literal = ctx.roles.list(Some("%_"), all()).await.expect("list");
    assert_eq!(literal.total, 1);

    let second = ctx.roles.list(None, PageRequest::new(2, 3)).await.expect("page 2");
    assert_eq!(second.total, 4);
    assert_eq!(second.items.len(), 1);
}

#[tokio::test]
async fn add_and_remove_permissions_are_idempotent() {
    let ctx = setup_context().await;
    let p1 = permission(&ctx, "asset", "read").await;
    let p2 = permission(&ctx, "asset", "write").await;
    let role = Role::new("ops", None);
    ctx.roles.create(&role, &[p1.permission_id]).await.expect("create");

    ctx.roles
        .add_permissions(role.role_id, &[p1.permission_id, p2.permission_id])
        .await
        .expect("add");
    ctx.roles
        .add_permissions(role.role_id, &[p2.permission_id])
        .await
        .expect("add again");
    let details = ctx.roles.get_details(role.role_id).await.expect("get").expect("present");
    assert_eq!(details.permissions.len(), 2);

    ctx.roles
        .remove_permissions(role.role_id, &[p1.permission_id])
        .await
        .expect("remove");
    ctx.roles
        .remove_permissions(role.role_id, &[p1.permission_id])
        .await
        .expect("remove again");
    let details = ctx.roles.get_details(role.role_id).await.expect("get").expect("present");
    assert_eq!(details.permission_ids(), vec![p2.permission_id]);
}

// ==== Identity Store and Binding Tests ====

#[tokio::test]
async fn live_email_is_unique_but_reusable_after_delete() {
    let ctx = setup_context().await;
    let first = user(&ctx, "dana@example.com").await;

    let clash = User::new("Dana Two", "DANA@example.com", "hash", UserStatus::Active);
    let err = ctx.users.create(&clash, &[]).await.unwrap_err();
    assert!(matches!(err, CoreError::AlreadyExists { entity: "user", .. }));

    ctx.users.soft_delete(first.user_id, Utc::now()).await.expect("delete");
    ctx.users.create(&clash, &[]).await.expect("email free again");
}

#[tokio::test]
async fn soft_delete_hides_user_and_drops_bindings() {
    let ctx = setup_context().await;
    let role = Role::new("ops", None);
    ctx.roles.create(&role, &[]).await.expect("role");
    let u = User::new("Lee", "lee@example.com", "hash", UserStatus::Active);
    ctx.users.create(&u, &[role.role_id]).await.expect("user");

    ctx.users.soft_delete(u.user_id, Utc::now()).await.expect("delete");

    assert!(ctx.users.get(u.user_id).await.expect("get").is_none());
    assert!(ctx.users.get_by_email("lee@example.com").await.expect("get").is_none());
    assert_eq!(ctx.roles.get_details(role.role_id).await.expect("d").expect("r").user_count, 0);

    let raw: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&ctx.pool)
        .await
        .expect("count");
    assert_eq!(raw, 1, "tombstoned row is kept");

    let err = ctx.users.soft_delete(u.user_id, Utc::now()).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
    let err = ctx
        .bindings
        .assign(u.user_id, &[role.role_id], BindingMode::Merge)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { entity: "user", .. }));
}

#[tokio::test]
async fn merge_and_replace_binding_modes() {
    let ctx = setup_context().await;
    let a = Role::new("a", None);
    let b = Role::new("b", None);
    let c = Role::new("c", None);
    for role in [&a, &b, &c] {
        ctx.roles.create(role, &[]).await.expect("role");
    }
    let u = user(&ctx, "kim@example.com").await;

    ctx.bindings.assign(u.user_id, &[a.role_id], BindingMode::Merge).await.expect("merge a");
    ctx.bindings.assign(u.user_id, &[b.role_id], BindingMode::Merge).await.expect("merge b");
    let mut held = ctx.bindings.role_ids_for_user(u.user_id).await.expect("held");
    held.sort();
    let mut expected = vec![a.role_id, b.role_id];
    expected.sort();
    assert_eq!(held, expected);

    ctx.bindings.assign(u.user_id, &[c.role_id], BindingMode::Replace).await.expect("replace");
    assert_eq!(ctx.bindings.role_ids_for_user(u.user_id).await.expect("held"), vec![c.role_id]);
}

#[tokio::test]
async fn assigning_unknown_role_changes_nothing() {
    let ctx = setup_context().await;
    let a = Role::new("a", None);
    ctx.roles.create(&a, &[]).await.expect("role");
    let ghost = Role::new("ghost", None);
    let u = user(&ctx, "kim@example.com").await;

    let err = ctx
        .bindings
        .assign(u.user_id, &[a.role_id, ghost.role_id], BindingMode::Merge)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { entity: "role", .. }));
    assert!(ctx.bindings.role_ids_for_user(u.user_id).await.expect("held").is_empty());
}

#[tokio::test]
async fn removing_unheld_role_is_success() {
    let ctx = setup_context().await;
    let a = Role::new("a", None);
    ctx.roles.create(&a, &[]).await.expect("role");
    let u = user(&ctx, "kim@example.com").await;

    ctx.bindings.remove(u.user_id, &[a.role_id]).await.expect("no-op remove");
}

#[tokio::test]
async fn permissions_for_user_is_union_over_roles() {
    let ctx = setup_context().await;
    let read = permission(&ctx, "asset", "read").await;
    let write = permission(&ctx, "asset", "write").await;
    permission(&ctx, "asset", "delete").await;
    let a = Role::new("a", None);
    let b = Role::new("b", None);
    ctx.roles.create(&a, &[read.permission_id]).await.expect("a");
    ctx.roles.create(&b, &[read.permission_id, write.permission_id]).await.expect("b");
    let u = User::new("Ada", "ada@example.com", "hash", UserStatus::Active);
    ctx.users.create(&u, &[a.role_id, b.role_id]).await.expect("user");

    let perms = ctx.bindings.permissions_for_user(u.user_id).await.expect("perms");
    let keys: Vec<String> = perms.iter().map(|p| p.key().to_string()).collect();
    assert_eq!(keys, vec!["asset:read", "asset:write"]);

    let roles = ctx.bindings.roles_for_user(u.user_id).await.expect("roles");
    assert_eq!(roles.len(), 2);
}

#[tokio::test]
async fn login_stamp_and_password_writes_leave_status_alone() {
    let ctx = setup_context().await;
    let u = user(&ctx, "ada@example.com").await;

    let mut disabled = u.clone();
    disabled.transition_to(UserStatus::Inactive);
    ctx.users.update(&disabled, None).await.expect("deactivate");

    let at = Utc::now();
    ctx.users.record_login(u.user_id, at).await.expect("login stamp");
    ctx.users
        .set_password_hash(u.user_id, "new-hash", at)
        .await
        .expect("password");

    let stored = ctx.users.get(u.user_id).await.expect("get").expect("present");
    assert_eq!(stored.status, UserStatus::Inactive);
    assert_eq!(stored.password_hash, "new-hash");
    assert_eq!(
        stored.last_login_at.map(|t| t.timestamp_millis()),
        Some(at.timestamp_millis())
    );

    // A profile write carries a stale hash but must not put it back.
    disabled.name = "Ada L.".to_string();
    ctx.users.update(&disabled, None).await.expect("rename");
    let stored = ctx.users.get(u.user_id).await.expect("get").expect("present");
    assert_eq!(stored.password_hash, "new-hash");
    assert!(stored.last_login_at.is_some());
}

#[tokio::test]
async fn narrow_user_writes_skip_deleted_accounts() {
    let ctx = setup_context().await;
    let u = user(&ctx, "gone@example.com").await;
    ctx.users.soft_delete(u.user_id, Utc::now()).await.expect("delete");

    let login = ctx.users.record_login(u.user_id, Utc::now()).await.unwrap_err();
    let password = ctx
        .users
        .set_password_hash(u.user_id, "x", Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(login, CoreError::NotFound { entity: "user", .. }));
    assert!(matches!(password, CoreError::NotFound { entity: "user", .. }));
}

#[tokio::test]
async fn user_update_with_role_ids_is_full_replace() {
    let ctx = setup_context().await;
    let a = Role::new("a", None);
    let b = Role::new("b", None);
    ctx.roles.create(&a, &[]).await.expect("a");
    ctx.roles.create(&b, &[]).await.expect("b");
    let mut u = User::new("Ada", "ada@example.com", "hash", UserStatus::Pending);
    ctx.users.create(&u, &[a.role_id]).await.expect("user");

    u.transition_to(UserStatus::Active);
    ctx.users.update(&u, Some(&[b.role_id])).await.expect("update");

    let stored = ctx.users.get(u.user_id).await.expect("get").expect("present");
    assert_eq!(stored.status, UserStatus::Active);
    assert_eq!(ctx.bindings.role_ids_for_user(u.user_id).await.expect("roles"), vec![b.role_id]);

    let filter = UserFilter {
        search: Some("ADA@".to_string()),
        status: Some(UserStatus::Active),
    };
    assert_eq!(ctx.users.list(&filter, all()).await.expect("list").total, 1);
}

// ==== Audit Log Tests ====

fn entry(resource_id: &str, action: AuditAction) -> AuditLogEntry {
    AuditLogEntry::new(None, "system", action, ResourceType::Role, resource_id)
        .with_details(json!({ "name": resource_id }))
}

#[tokio::test]
async fn appended_entries_form_a_chain() {
    let ctx = setup_context().await;
    let first = ctx.audit_logs.append(entry("r1", AuditAction::Create)).await.expect("first");
    let second = ctx.audit_logs.append(entry("r1", AuditAction::Update)).await.expect("second");

    assert_eq!(first.sequence, 1);
    assert_eq!(first.prev_hash, GENESIS_HASH);
    assert_eq!(second.sequence, 2);
    assert_eq!(second.prev_hash, first.entry_hash);

    let stored = ctx.audit_logs.list_from(1, 10).await.expect("list");
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(AuditLogEntry::is_intact));
    assert_eq!(stored[0], first);
}

#[tokio::test]
async fn float_details_survive_storage_with_the_chain_intact() {
    let ctx = setup_context().await;
    let readings: Vec<f64> = (1..=64)
        .map(|i| f64::from(i).sqrt() * 1e-7 + 1.0 / f64::from(i) + 0.1 * f64::from(i))
        .chain([0.1 + 0.2, f64::MIN_POSITIVE, f64::EPSILON, 1e300 / 7.0])
        .collect();

    for (i, reading) in readings.iter().enumerate() {
        let details = json!({ "load": reading, "samples": [reading / 3.0, reading * 7.1] });
        let entry = AuditLogEntry::new(
            None,
            "system",
            AuditAction::Update,
            ResourceType::Asset,
            format!("a{i}"),
        )
        .with_details(details);
        ctx.audit_logs.append(entry).await.expect("append");
    }

    let stored = ctx.audit_logs.list_from(1, 100).await.expect("list");
    assert_eq!(stored.len(), readings.len());
    for (entry, reading) in stored.iter().zip(&readings) {
        assert!(entry.is_intact(), "sequence {} no longer hashes", entry.sequence);
        assert_eq!(entry.details["load"].as_f64(), Some(*reading));
    }
}

#[tokio::test]
async fn audit_rows_cannot_be_updated_or_deleted() {
    let ctx = setup_context().await;
    ctx.audit_logs.append(entry("r1", AuditAction::Create)).await.expect("append");

    let update = sqlx::query("UPDATE audit_logs SET actor_name = 'mallory'")
        .execute(&ctx.pool)
        .await;
    assert!(update.is_err());
    let delete = sqlx::query("DELETE FROM audit_logs").execute(&ctx.pool).await;
    assert!(delete.is_err());
}

#[tokio::test]
async fn audit_query_filters_and_paginates() {
    let ctx = setup_context().await;
    ctx.audit_logs.append(entry("r1", AuditAction::Create)).await.expect("1");
    ctx.audit_logs.append(entry("r1", AuditAction::Update)).await.expect("2");
    ctx.audit_logs.append(entry("r2", AuditAction::Create)).await.expect("3");
    ctx.audit_logs
        .append(AuditLogEntry::new(None, "system", AuditAction::Login, ResourceType::User, "u1"))
        .await
        .expect("4");

    let by_resource = AuditQuery {
        resource_type: Some(ResourceType::Role),
        resource_id: Some("r1".to_string()),
        ..AuditQuery::default()
    };
    let page = ctx.audit_logs.query(&by_resource, all()).await.expect("query");
    assert_eq!(page.total, 2);
    assert_eq!(page.items[0].action, AuditAction::Update, "newest first");

    let creates = AuditQuery {
        action: Some(AuditAction::Create),
        ..AuditQuery::default()
    };
    let page = ctx
        .audit_logs
        .query(&creates, PageRequest::new(1, 1))
        .await
        .expect("query");
    assert_eq!(page.total, 2);
    assert_eq!(page.items.len(), 1);

    let future = AuditQuery {
        from: Some(Utc::now() + chrono::Duration::hours(1)),
        ..AuditQuery::default()
    };
    assert_eq!(ctx.audit_logs.query(&future, all()).await.expect("query").total, 0);
}
