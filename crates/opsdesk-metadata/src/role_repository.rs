//! SQLite implementation of the role registry.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{query, query_scalar, QueryBuilder, Sqlite, SqlitePool};

use opsdesk_core::audit::format_timestamp;
use opsdesk_core::{
    CoreError, CoreResult, Page, PageRequest, PermissionId, Role, RoleDetails, RoleId,
    RoleRepository,
};

use crate::associations::{
    bind_permissions, ensure_permissions_exist, ensure_role_exists, replace_permissions,
    unbind_permissions,
};
use crate::permission_repository::parse_permission_row;
use crate::util::{
    begin, column, commit, count, id_column, like_pattern, map_sqlx_error, storage_error,
    timestamp_column,
};

const ROLE_COLUMNS: &str = "role_id, name, description, created_at, updated_at";

/// SQLite implementation of the role registry.
pub struct SqliteRoleRepository {
    pool: SqlitePool,
}

impl SqliteRoleRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn user_count(&self, role_id: RoleId) -> CoreResult<u64> {
        let total: i64 = query_scalar(
            "SELECT COUNT(*) FROM user_roles ur
             JOIN users u ON u.user_id = ur.user_id
             WHERE ur.role_id = ?1 AND u.deleted_at IS NULL",
        )
        .bind(role_id.to_bytes().to_vec())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_error("role", e))?;
        Ok(count(total))
    }
}

#[async_trait]
impl RoleRepository for SqliteRoleRepository {
    async fn create(&self, role: &Role, permission_ids: &[PermissionId]) -> CoreResult<()> {
        let mut tx = begin(&self.pool).await?;

        query(
            "INSERT INTO roles (role_id, name, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(role.role_id.to_bytes().to_vec())
        .bind(&role.name)
        .bind(&role.description)
        .bind(format_timestamp(role.created_at))
        .bind(format_timestamp(role.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("role", role.name.clone(), e))?;

        ensure_permissions_exist(&mut *tx, permission_ids).await?;
        bind_permissions(&mut *tx, role.role_id, permission_ids).await?;

        commit(tx).await
    }

    async fn get(&self, role_id: RoleId) -> CoreResult<Option<Role>> {
        let row = query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE role_id = ?1"))
            .bind(role_id.to_bytes().to_vec())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("role", e))?;

        row.map(|r| parse_role_row(&r)).transpose()
    }

    async fn get_by_name(&self, name: &str) -> CoreResult<Option<Role>> {
        let row = query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE name = ?1"))
            .bind(name.trim())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("role", e))?;

        row.map(|r| parse_role_row(&r)).transpose()
    }

    async fn get_details(&self, role_id: RoleId) -> CoreResult<Option<RoleDetails>> {
        let Some(role) = self.get(role_id).await? else {
            return Ok(None);
        };

        let rows = query(
            "SELECT p.permission_id, p.name, p.resource, p.action, p.description, p.created_at, p.updated_at
             FROM permissions p
             JOIN role_permissions rp ON rp.permission_id = p.permission_id
             WHERE rp.role_id = ?1
             ORDER BY p.resource ASC, p.action ASC",
        )
        .bind(role_id.to_bytes().to_vec())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("role", e))?;
        let permissions = rows.iter().map(parse_permission_row).collect::<CoreResult<_>>()?;
        let user_count = self.user_count(role_id).await?;

        Ok(Some(RoleDetails {
            role,
            permissions,
            user_count,
        }))
    }

    async fn list(&self, name_filter: Option<&str>, page: PageRequest) -> CoreResult<Page<Role>> {
        let pattern = name_filter
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(like_pattern);

        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM roles");
        let mut list_query = QueryBuilder::<Sqlite>::new(format!("SELECT {ROLE_COLUMNS} FROM roles"));
        if let Some(pattern) = pattern {
            count_query
                .push(" WHERE name LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\'");
            list_query
                .push(" WHERE name LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\'");
        }
        list_query
            .push(" ORDER BY created_at ASC, role_id ASC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());

        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_error("role", e))?;
        let rows = list_query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("role", e))?;

        let items = rows.iter().map(parse_role_row).collect::<CoreResult<_>>()?;
        Ok(Page::new(items, count(total), page))
    }

    async fn update(
        &self,
        role: &Role,
        permission_ids: Option<&[PermissionId]>,
    ) -> CoreResult<()> {
        let mut tx = begin(&self.pool).await?;

        let result = query("UPDATE roles SET name = ?1, description = ?2, updated_at = ?3 WHERE role_id = ?4")
            .bind(&role.name)
            .bind(&role.description)
            .bind(format_timestamp(role.updated_at))
            .bind(role.role_id.to_bytes().to_vec())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("role", role.name.clone(), e))?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("role", role.role_id.to_string()));
        }

        if let Some(permission_ids) = permission_ids {
            ensure_permissions_exist(&mut *tx, permission_ids).await?;
            replace_permissions(&mut *tx, role.role_id, permission_ids).await?;
        }

        commit(tx).await
    }

    async fn delete(&self, role_id: RoleId) -> CoreResult<()> {
        let id = role_id.to_bytes().to_vec();
        let mut tx = begin(&self.pool).await?;

        ensure_role_exists(&mut *tx, role_id).await?;
        let holders: i64 = query_scalar("SELECT COUNT(*) FROM user_roles WHERE role_id = ?1")
            .bind(id.clone())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| storage_error("role", e))?;
        if holders > 0 {
            return Err(CoreError::conflict(format!(
                "role `{role_id}` is still assigned to {holders} user(s)"
            )));
        }

        query("DELETE FROM roles WHERE role_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| match map_sqlx_error("role", role_id.to_string(), e) {
                CoreError::NotFound { .. } => {
                    CoreError::conflict(format!("role `{role_id}` is still assigned to users"))
                }
                other => other,
            })?;

        commit(tx).await
    }

    async fn add_permissions(
        &self,
        role_id: RoleId,
        permission_ids: &[PermissionId],
    ) -> CoreResult<()> {
        let mut tx = begin(&self.pool).await?;
        ensure_role_exists(&mut *tx, role_id).await?;
        ensure_permissions_exist(&mut *tx, permission_ids).await?;
        bind_permissions(&mut *tx, role_id, permission_ids).await?;
        touch_role(&mut *tx, role_id).await?;
        commit(tx).await
    }

    async fn remove_permissions(
        &self,
        role_id: RoleId,
        permission_ids: &[PermissionId],
    ) -> CoreResult<()> {
        let mut tx = begin(&self.pool).await?;
        ensure_role_exists(&mut *tx, role_id).await?;
        ensure_permissions_exist(&mut *tx, permission_ids).await?;
        unbind_permissions(&mut *tx, role_id, permission_ids).await?;
        touch_role(&mut *tx, role_id).await?;
        commit(tx).await
    }
}

async fn touch_role(conn: &mut sqlx::SqliteConnection, role_id: RoleId) -> CoreResult<()> {
    query("UPDATE roles SET updated_at = ?1 WHERE role_id = ?2")
        .bind(format_timestamp(chrono::Utc::now()))
        .bind(role_id.to_bytes().to_vec())
        .execute(conn)
        .await
        .map_err(|e| storage_error("role", e))?;
    Ok(())
}

pub(crate) fn parse_role_row(row: &SqliteRow) -> CoreResult<Role> {
    Ok(Role {
        role_id: id_column(row, "role_id", RoleId::from_bytes)?,
        name: column(row, "name")?,
        description: column(row, "description")?,
        created_at: timestamp_column(row, "created_at")?,
        updated_at: timestamp_column(row, "updated_at")?,
    })
}
