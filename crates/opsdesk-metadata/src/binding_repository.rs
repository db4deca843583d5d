//! SQLite implementation of the user-role binding.

use async_trait::async_trait;
use sqlx::{query, SqlitePool};

use opsdesk_core::{
    BindingMode, CoreResult, Permission, Role, RoleBindingRepository, RoleId, UserId,
};

use crate::associations::{
    bind_roles, bound_role_ids, ensure_roles_exist, ensure_user_live, replace_roles, unbind_roles,
};
use crate::permission_repository::parse_permission_row;
use crate::role_repository::parse_role_row;
use crate::util::{begin, commit, storage_error};

/// SQLite implementation of the user-role binding.
pub struct SqliteRoleBindingRepository {
    pool: SqlitePool,
}

impl SqliteRoleBindingRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleBindingRepository for SqliteRoleBindingRepository {
    async fn assign(
        &self,
        user_id: UserId,
        role_ids: &[RoleId],
        mode: BindingMode,
    ) -> CoreResult<()> {
        let mut tx = begin(&self.pool).await?;
        ensure_user_live(&mut *tx, user_id).await?;
        ensure_roles_exist(&mut *tx, role_ids).await?;
        match mode {
            BindingMode::Merge => bind_roles(&mut *tx, user_id, role_ids).await?,
            BindingMode::Replace => replace_roles(&mut *tx, user_id, role_ids).await?,
        }
        commit(tx).await
    }

    async fn remove(&self, user_id: UserId, role_ids: &[RoleId]) -> CoreResult<()> {
        let mut tx = begin(&self.pool).await?;
        ensure_user_live(&mut *tx, user_id).await?;
        unbind_roles(&mut *tx, user_id, role_ids).await?;
        commit(tx).await
    }

    async fn role_ids_for_user(&self, user_id: UserId) -> CoreResult<Vec<RoleId>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| storage_error("user role", e))?;
        bound_role_ids(&mut *conn, user_id).await
    }

    async fn roles_for_user(&self, user_id: UserId) -> CoreResult<Vec<Role>> {
        let rows = query(
            "SELECT r.role_id, r.name, r.description, r.created_at, r.updated_at
             FROM roles r
             JOIN user_roles ur ON ur.role_id = r.role_id
             WHERE ur.user_id = ?1
             ORDER BY r.created_at ASC, r.role_id ASC",
        )
        .bind(user_id.to_bytes().to_vec())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("user role", e))?;

        rows.iter().map(parse_role_row).collect()
    }

    async fn permissions_for_user(&self, user_id: UserId) -> CoreResult<Vec<Permission>> {
        let rows = query(
            "SELECT DISTINCT p.permission_id, p.name, p.resource, p.action, p.description, p.created_at, p.updated_at
             FROM permissions p
             JOIN role_permissions rp ON rp.permission_id = p.permission_id
             JOIN user_roles ur ON ur.role_id = rp.role_id
             WHERE ur.user_id = ?1
             ORDER BY p.resource ASC, p.action ASC",
        )
        .bind(user_id.to_bytes().to_vec())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("user role", e))?;

        rows.iter().map(parse_permission_row).collect()
    }
}
