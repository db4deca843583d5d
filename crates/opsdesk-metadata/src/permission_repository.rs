//! SQLite implementation of the permission catalog.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{query, QueryBuilder, Sqlite, SqlitePool};

use opsdesk_core::audit::format_timestamp;
use opsdesk_core::{
    CoreError, CoreResult, Page, PageRequest, Permission, PermissionFilter, PermissionId,
    PermissionKey, PermissionRepository,
};

use crate::util::{
    begin, column, commit, count, id_column, is_unique_violation_on, like_pattern,
    storage_error, timestamp_column,
};

const PERMISSION_COLUMNS: &str =
    "permission_id, name, resource, action, description, created_at, updated_at";

/// SQLite implementation of the permission catalog.
pub struct SqlitePermissionRepository {
    pool: SqlitePool,
}

impl SqlitePermissionRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PermissionRepository for SqlitePermissionRepository {
    async fn create(&self, permission: &Permission) -> CoreResult<()> {
        query(
            "INSERT INTO permissions (permission_id, name, resource, action, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(permission.permission_id.to_bytes().to_vec())
        .bind(&permission.name)
        .bind(&permission.resource)
        .bind(&permission.action)
        .bind(&permission.description)
        .bind(format_timestamp(permission.created_at))
        .bind(format_timestamp(permission.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| map_permission_error(permission, e))?;

        Ok(())
    }

    async fn get(&self, permission_id: PermissionId) -> CoreResult<Option<Permission>> {
        let row = query(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE permission_id = ?1"
        ))
        .bind(permission_id.to_bytes().to_vec())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("permission", e))?;

        row.map(|r| parse_permission_row(&r)).transpose()
    }

    async fn get_by_key(&self, key: &PermissionKey) -> CoreResult<Option<Permission>> {
        let row = query(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE resource = ?1 AND action = ?2"
        ))
        .bind(&key.resource)
        .bind(&key.action)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("permission", e))?;

        row.map(|r| parse_permission_row(&r)).transpose()
    }

    async fn list(
        &self,
        filter: &PermissionFilter,
        page: PageRequest,
    ) -> CoreResult<Page<Permission>> {
        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM permissions WHERE 1 = 1");
        push_filters(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_error("permission", e))?;

        let mut list_query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE 1 = 1"
        ));
        push_filters(&mut list_query, filter);
        list_query
            .push(" ORDER BY resource ASC, action ASC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = list_query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("permission", e))?;

        let items = rows.iter().map(parse_permission_row).collect::<CoreResult<_>>()?;
        Ok(Page::new(items, count(total), page))
    }

    async fn update(&self, permission: &Permission) -> CoreResult<()> {
        let result = query(
            "UPDATE permissions SET name = ?1, resource = ?2, action = ?3, description = ?4, updated_at = ?5
             WHERE permission_id = ?6",
        )
        .bind(&permission.name)
        .bind(&permission.resource)
        .bind(&permission.action)
        .bind(&permission.description)
        .bind(format_timestamp(permission.updated_at))
        .bind(permission.permission_id.to_bytes().to_vec())
        .execute(&self.pool)
        .await
        .map_err(|e| map_permission_error(permission, e))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(
                "permission",
                permission.permission_id.to_string(),
            ));
        }
        Ok(())
    }

    async fn delete(&self, permission_id: PermissionId) -> CoreResult<u64> {
        let id = permission_id.to_bytes().to_vec();
        let mut tx = begin(&self.pool).await?;

        let bound: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM role_permissions WHERE permission_id = ?1")
            .bind(id.clone())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| storage_error("permission", e))?;

        let result = query("DELETE FROM permissions WHERE permission_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_error("permission", e))?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("permission", permission_id.to_string()));
        }

        commit(tx).await?;
        Ok(count(bound))
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &PermissionFilter) {
    if let Some(resource) = filter.resource.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        builder.push(" AND resource = ").push_bind(resource.to_lowercase());
    }
    if let Some(name) = filter.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        builder
            .push(" AND name LIKE ")
            .push_bind(like_pattern(name))
            .push(" ESCAPE '\\'");
    }
}

fn map_permission_error(permission: &Permission, err: sqlx::Error) -> CoreError {
    if is_unique_violation_on(&err, "permissions.name") {
        CoreError::already_exists("permission", permission.name.clone())
    } else if is_unique_violation_on(&err, "permissions.resource") {
        CoreError::already_exists("permission", permission.key().to_string())
    } else {
        storage_error("permission", err)
    }
}

pub(crate) fn parse_permission_row(row: &SqliteRow) -> CoreResult<Permission> {
    Ok(Permission {
        permission_id: id_column(row, "permission_id", PermissionId::from_bytes)?,
        name: column(row, "name")?,
        resource: column(row, "resource")?,
        action: column(row, "action")?,
        description: column(row, "description")?,
        created_at: timestamp_column(row, "created_at")?,
        updated_at: timestamp_column(row, "updated_at")?,
    })
}
