//! SQLite implementation of the identity store.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{query, Executor, QueryBuilder, Sqlite, SqlitePool};

use opsdesk_core::audit::format_timestamp;
use opsdesk_core::user::normalize_email;
use opsdesk_core::{
    CoreError, CoreResult, Page, PageRequest, RoleId, User, UserFilter, UserId, UserRepository,
    UserStatus,
};

use crate::associations::{bind_roles, ensure_roles_exist, replace_roles};
use crate::util::{
    begin, column, commit, count, id_column, like_pattern, map_sqlx_error,
    optional_timestamp_column, storage_error, timestamp_column,
};

const USER_COLUMNS: &str =
    "user_id, name, email, password_hash, status, created_at, updated_at, last_login_at, deleted_at";

/// SQLite implementation of the user repository.
pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    /// Creates a new SQLite user repository.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a user row using the provided executor (for transaction support).
    async fn insert_with_executor<'e, E>(user: &User, executor: E) -> CoreResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        query(
            "INSERT INTO users (user_id, name, email, password_hash, status, created_at, updated_at, last_login_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(user.user_id.to_bytes().to_vec())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.status.as_str())
        .bind(format_timestamp(user.created_at))
        .bind(format_timestamp(user.updated_at))
        .bind(user.last_login_at.map(format_timestamp))
        .bind(user.deleted_at.map(format_timestamp))
        .execute(executor)
        .await
        .map_err(|e| map_sqlx_error("user", user.email.clone(), e))?;

        Ok(())
    }

    /// Update the profile columns of a live user row using the provided executor.
    ///
    /// `password_hash` and `last_login_at` belong to their own statements.
    async fn update_with_executor<'e, E>(user: &User, executor: E) -> CoreResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = query(
            "UPDATE users SET name = ?1, email = ?2, status = ?3, updated_at = ?4
             WHERE user_id = ?5 AND deleted_at IS NULL",
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.status.as_str())
        .bind(format_timestamp(user.updated_at))
        .bind(user.user_id.to_bytes().to_vec())
        .execute(executor)
        .await
        .map_err(|e| map_sqlx_error("user", user.email.clone(), e))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("user", user.user_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create(&self, user: &User, role_ids: &[RoleId]) -> CoreResult<()> {
        let mut tx = begin(&self.pool).await?;
        ensure_roles_exist(&mut *tx, role_ids).await?;
        Self::insert_with_executor(user, &mut *tx).await?;
        bind_roles(&mut *tx, user.user_id, role_ids).await?;
        commit(tx).await
    }

    async fn get(&self, user_id: UserId) -> CoreResult<Option<User>> {
        let row = query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1 AND deleted_at IS NULL"
        ))
        .bind(user_id.to_bytes().to_vec())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("user", e))?;

        row.map(|r| parse_user_row(&r)).transpose()
    }

    async fn get_by_email(&self, email: &str) -> CoreResult<Option<User>> {
        let row = query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ?1 AND deleted_at IS NULL"
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("user", e))?;

        row.map(|r| parse_user_row(&r)).transpose()
    }

    async fn list(&self, filter: &UserFilter, page: PageRequest) -> CoreResult<Page<User>> {
        let mut count_query =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM users WHERE deleted_at IS NULL");
        push_filters(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_error("user", e))?;

        let mut list_query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL"
        ));
        push_filters(&mut list_query, filter);
        list_query
            .push(" ORDER BY created_at ASC, user_id ASC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = list_query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("user", e))?;

        let items = rows.iter().map(parse_user_row).collect::<CoreResult<_>>()?;
        Ok(Page::new(items, count(total), page))
    }

    async fn update(&self, user: &User, role_ids: Option<&[RoleId]>) -> CoreResult<()> {
        let mut tx = begin(&self.pool).await?;
        Self::update_with_executor(user, &mut *tx).await?;
        if let Some(role_ids) = role_ids {
            ensure_roles_exist(&mut *tx, role_ids).await?;
            replace_roles(&mut *tx, user.user_id, role_ids).await?;
        }
        commit(tx).await
    }

    async fn record_login(&self, user_id: UserId, at: DateTime<Utc>) -> CoreResult<()> {
        let stamp = format_timestamp(at);
        let result = query(
            "UPDATE users SET last_login_at = ?1, updated_at = ?1 WHERE user_id = ?2 AND deleted_at IS NULL",
        )
        .bind(stamp)
        .bind(user_id.to_bytes().to_vec())
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("user", e))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("user", user_id.to_string()));
        }
        Ok(())
    }

    async fn set_password_hash(
        &self,
        user_id: UserId,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let result = query(
            "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE user_id = ?3 AND deleted_at IS NULL",
        )
        .bind(password_hash)
        .bind(format_timestamp(at))
        .bind(user_id.to_bytes().to_vec())
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("user", e))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("user", user_id.to_string()));
        }
        Ok(())
    }

    async fn soft_delete(&self, user_id: UserId, deleted_at: DateTime<Utc>) -> CoreResult<()> {
        let id = user_id.to_bytes().to_vec();
        let stamp = format_timestamp(deleted_at);
        let mut tx = begin(&self.pool).await?;

        let result = query(
            "UPDATE users SET deleted_at = ?1, updated_at = ?1 WHERE user_id = ?2 AND deleted_at IS NULL",
        )
        .bind(&stamp)
        .bind(id.clone())
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_error("user", e))?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("user", user_id.to_string()));
        }

        query("DELETE FROM user_roles WHERE user_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_error("user role", e))?;

        commit(tx).await
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &UserFilter) {
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = like_pattern(search);
        builder
            .push(" AND (name LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR email LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
}

/// Parse a user row from SQLite.
fn parse_user_row(row: &SqliteRow) -> CoreResult<User> {
    let status: String = column(row, "status")?;

    Ok(User {
        user_id: id_column(row, "user_id", UserId::from_bytes)?,
        name: column(row, "name")?,
        email: column(row, "email")?,
        password_hash: column(row, "password_hash")?,
        status: UserStatus::from_str(&status).map_err(CoreError::internal)?,
        created_at: timestamp_column(row, "created_at")?,
        updated_at: timestamp_column(row, "updated_at")?,
        last_login_at: optional_timestamp_column(row, "last_login_at")?,
        deleted_at: optional_timestamp_column(row, "deleted_at")?,
    })
}
