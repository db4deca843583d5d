//! SQLite implementation of the audit log sink.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{query, QueryBuilder, Sqlite, SqlitePool};

use opsdesk_core::audit::format_timestamp;
use opsdesk_core::{
    AuditAction, AuditLogEntry, AuditLogId, AuditLogRepository, AuditQuery, CoreError,
    CoreResult, Page, PageRequest, ResourceType, UserId, GENESIS_HASH,
};

use crate::util::{begin, column, commit, count, id_column, storage_error, timestamp_column};

const AUDIT_COLUMNS: &str = "sequence, audit_log_id, actor_id, actor_name, action, resource_type, resource_id, details, ip_address, user_agent, created_at, prev_hash, entry_hash";

/// SQLite implementation of the audit log repository.
///
/// There is no update or delete path; the schema rejects both with triggers.
pub struct SqliteAuditLogRepository {
    pool: SqlitePool,
}

impl SqliteAuditLogRepository {
    /// Creates a new SQLite audit log repository.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLogRepository for SqliteAuditLogRepository {
    async fn append(&self, entry: AuditLogEntry) -> CoreResult<AuditLogEntry> {
        let mut tx = begin(&self.pool).await?;

        let tail = query("SELECT sequence, entry_hash FROM audit_logs ORDER BY sequence DESC LIMIT 1")
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| storage_error("audit log", e))?;
        let (sequence, prev_hash) = match tail {
            Some(row) => {
                let last: i64 = column(&row, "sequence")?;
                let hash: String = column(&row, "entry_hash")?;
                (count(last) + 1, hash)
            }
            None => (1, GENESIS_HASH.to_string()),
        };
        let entry = entry.seal(sequence, prev_hash);

        query(
            "INSERT INTO audit_logs (sequence, audit_log_id, actor_id, actor_name, action, resource_type, resource_id, details, ip_address, user_agent, created_at, prev_hash, entry_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(sequence as i64)
        .bind(entry.audit_log_id.to_bytes().to_vec())
        .bind(entry.actor_id.map(|id| id.to_bytes().to_vec()))
        .bind(&entry.actor_name)
        .bind(entry.action.as_str())
        .bind(entry.resource_type.as_str())
        .bind(&entry.resource_id)
        .bind(entry.details.to_string())
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(format_timestamp(entry.created_at))
        .bind(&entry.prev_hash)
        .bind(&entry.entry_hash)
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_error("audit log", e))?;

        commit(tx).await?;
        Ok(entry)
    }

    async fn query(
        &self,
        filter: &AuditQuery,
        page: PageRequest,
    ) -> CoreResult<Page<AuditLogEntry>> {
        let mut count_query =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM audit_logs WHERE 1 = 1");
        push_filters(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_error("audit log", e))?;

        let mut list_query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {AUDIT_COLUMNS} FROM audit_logs WHERE 1 = 1"));
        push_filters(&mut list_query, filter);
        list_query
            .push(" ORDER BY sequence DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = list_query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("audit log", e))?;

        let items = rows.iter().map(parse_audit_log_row).collect::<CoreResult<_>>()?;
        Ok(Page::new(items, count(total), page))
    }

    async fn list_from(&self, from_sequence: u64, limit: u32) -> CoreResult<Vec<AuditLogEntry>> {
        let rows = query(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_logs WHERE sequence >= ?1 ORDER BY sequence ASC LIMIT ?2"
        ))
        .bind(from_sequence as i64)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("audit log", e))?;

        rows.iter().map(parse_audit_log_row).collect()
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &AuditQuery) {
    if let Some(actor_id) = filter.actor_id {
        builder
            .push(" AND actor_id = ")
            .push_bind(actor_id.to_bytes().to_vec());
    }
    if let Some(action) = filter.action {
        builder.push(" AND action = ").push_bind(action.as_str());
    }
    if let Some(resource_type) = &filter.resource_type {
        builder
            .push(" AND resource_type = ")
            .push_bind(resource_type.as_str().to_string());
    }
    if let Some(resource_id) = &filter.resource_id {
        builder.push(" AND resource_id = ").push_bind(resource_id.clone());
    }
    if let Some(from) = filter.from {
        builder.push(" AND created_at >= ").push_bind(format_timestamp(from));
    }
    if let Some(to) = filter.to {
        builder.push(" AND created_at < ").push_bind(format_timestamp(to));
    }
}

/// Parse an audit log row from SQLite.
fn parse_audit_log_row(row: &SqliteRow) -> CoreResult<AuditLogEntry> {
    let sequence: i64 = column(row, "sequence")?;
    let actor_id: Option<Vec<u8>> = column(row, "actor_id")?;
    let action: String = column(row, "action")?;
    let resource_type: String = column(row, "resource_type")?;
    let details: String = column(row, "details")?;

    Ok(AuditLogEntry {
        audit_log_id: id_column(row, "audit_log_id", AuditLogId::from_bytes)?,
        sequence: count(sequence),
        actor_id: actor_id
            .map(|bytes| UserId::from_bytes(&bytes))
            .transpose()
            .map_err(|e| CoreError::internal(format!("corrupt id in `actor_id`: {e}")))?,
        actor_name: column(row, "actor_name")?,
        action: AuditAction::from_str(&action).map_err(CoreError::internal)?,
        resource_type: ResourceType::from(resource_type),
        resource_id: column(row, "resource_id")?,
        details: serde_json::from_str(&details)
            .map_err(|e| CoreError::internal(format!("corrupt audit details: {e}")))?,
        ip_address: column(row, "ip_address")?,
        user_agent: column(row, "user_agent")?,
        created_at: timestamp_column(row, "created_at")?,
        prev_hash: column(row, "prev_hash")?,
        entry_hash: column(row, "entry_hash")?,
    })
}
