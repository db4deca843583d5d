//! Set operations on the `user_roles` and `role_permissions` join tables.
//!
//! Every helper runs on a caller-owned connection so it composes into the
//! caller's transaction. Adds use `INSERT OR IGNORE` and removes are plain
//! deletes, which makes both idempotent.

use std::collections::BTreeSet;

use sqlx::{query, SqliteConnection};

use opsdesk_core::{CoreError, CoreResult, PermissionId, RoleId, UserId};

use crate::util::{id_column, storage_error};

pub(crate) async fn ensure_user_live(conn: &mut SqliteConnection, user_id: UserId) -> CoreResult<()> {
    let found = query("SELECT 1 FROM users WHERE user_id = ?1 AND deleted_at IS NULL")
        .bind(user_id.to_bytes().to_vec())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| storage_error("user", e))?;
    match found {
        Some(_) => Ok(()),
        None => Err(CoreError::not_found("user", user_id.to_string())),
    }
}

pub(crate) async fn ensure_role_exists(conn: &mut SqliteConnection, role_id: RoleId) -> CoreResult<()> {
    ensure_roles_exist(conn, &[role_id]).await
}

pub(crate) async fn ensure_roles_exist(conn: &mut SqliteConnection, role_ids: &[RoleId]) -> CoreResult<()> {
    for role_id in role_ids {
        let found = query("SELECT 1 FROM roles WHERE role_id = ?1")
            .bind(role_id.to_bytes().to_vec())
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| storage_error("role", e))?;
        if found.is_none() {
            return Err(CoreError::not_found("role", role_id.to_string()));
        }
    }
    Ok(())
}

pub(crate) async fn ensure_permissions_exist(
    conn: &mut SqliteConnection,
    permission_ids: &[PermissionId],
) -> CoreResult<()> {
    for permission_id in permission_ids {
        let found = query("SELECT 1 FROM permissions WHERE permission_id = ?1")
            .bind(permission_id.to_bytes().to_vec())
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| storage_error("permission", e))?;
        if found.is_none() {
            return Err(CoreError::not_found("permission", permission_id.to_string()));
        }
    }
    Ok(())
}

pub(crate) async fn bind_roles(
    conn: &mut SqliteConnection,
    user_id: UserId,
    role_ids: &[RoleId],
) -> CoreResult<()> {
    for role_id in role_ids {
        query("INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?1, ?2)")
            .bind(user_id.to_bytes().to_vec())
            .bind(role_id.to_bytes().to_vec())
            .execute(&mut *conn)
            .await
            .map_err(|e| storage_error("user role", e))?;
    }
    Ok(())
}

pub(crate) async fn unbind_roles(
    conn: &mut SqliteConnection,
    user_id: UserId,
    role_ids: &[RoleId],
) -> CoreResult<()> {
    for role_id in role_ids {
        query("DELETE FROM user_roles WHERE user_id = ?1 AND role_id = ?2")
            .bind(user_id.to_bytes().to_vec())
            .bind(role_id.to_bytes().to_vec())
            .execute(&mut *conn)
            .await
            .map_err(|e| storage_error("user role", e))?;
    }
    Ok(())
}

pub(crate) async fn bound_role_ids(conn: &mut SqliteConnection, user_id: UserId) -> CoreResult<Vec<RoleId>> {
    let rows = query("SELECT role_id FROM user_roles WHERE user_id = ?1 ORDER BY role_id")
        .bind(user_id.to_bytes().to_vec())
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| storage_error("user role", e))?;
    rows.iter()
        .map(|row| id_column(row, "role_id", RoleId::from_bytes))
        .collect()
}

/// Makes `role_ids` the user's exact role set by diffing against what is bound.
pub(crate) async fn replace_roles(
    conn: &mut SqliteConnection,
    user_id: UserId,
    role_ids: &[RoleId],
) -> CoreResult<()> {
    let current: BTreeSet<RoleId> = bound_role_ids(conn, user_id).await?.into_iter().collect();
    let wanted: BTreeSet<RoleId> = role_ids.iter().copied().collect();

    let stale: Vec<RoleId> = current.difference(&wanted).copied().collect();
    let fresh: Vec<RoleId> = wanted.difference(&current).copied().collect();
    unbind_roles(conn, user_id, &stale).await?;
    bind_roles(conn, user_id, &fresh).await
}

pub(crate) async fn bind_permissions(
    conn: &mut SqliteConnection,
    role_id: RoleId,
    permission_ids: &[PermissionId],
) -> CoreResult<()> {
    for permission_id in permission_ids {
        query("INSERT OR IGNORE INTO role_permissions (role_id, permission_id) VALUES (?1, ?2)")
            .bind(role_id.to_bytes().to_vec())
            .bind(permission_id.to_bytes().to_vec())
            .execute(&mut *conn)
            .await
            .map_err(|e| storage_error("role permission", e))?;
    }
    Ok(())
}

pub(crate) async fn unbind_permissions(
    conn: &mut SqliteConnection,
    role_id: RoleId,
    permission_ids: &[PermissionId],
) -> CoreResult<()> {
    for permission_id in permission_ids {
        query("DELETE FROM role_permissions WHERE role_id = ?1 AND permission_id = ?2")
            .bind(role_id.to_bytes().to_vec())
            .bind(permission_id.to_bytes().to_vec())
            .execute(&mut *conn)
            .await
            .map_err(|e| storage_error("role permission", e))?;
    }
    Ok(())
}

/// Makes `permission_ids` the role's exact permission set.
pub(crate) async fn replace_permissions(
    conn: &mut SqliteConnection,
    role_id: RoleId,
    permission_ids: &[PermissionId],
) -> CoreResult<()> {
    let rows = query("SELECT permission_id FROM role_permissions WHERE role_id = ?1")
        .bind(role_id.to_bytes().to_vec())
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| storage_error("role permission", e))?;
    let current = rows
        .iter()
        .map(|row| id_column(row, "permission_id", PermissionId::from_bytes))
        .collect::<CoreResult<BTreeSet<_>>>()?;
    let wanted: BTreeSet<PermissionId> = permission_ids.iter().copied().collect();

    let stale: Vec<PermissionId> = current.difference(&wanted).copied().collect();
    let fresh: Vec<PermissionId> = wanted.difference(&current).copied().collect();
    unbind_permissions(conn, role_id, &stale).await?;
    bind_permissions(conn, role_id, &fresh).await
}
