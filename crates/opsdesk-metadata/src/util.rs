use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::migrate::MigrateError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use opsdesk_core::{CoreError, CoreResult};

use crate::MIGRATOR;

/// Creates a SQLite connection pool configured for metadata workloads.
pub async fn create_sqlite_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<SqlitePool, sqlx::Error> {
    let options = database_url
        .parse::<SqliteConnectOptions>()?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(acquire_timeout)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect_with(options)
        .await
}

/// Runs all outstanding migrations against the provided connection pool.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

pub(crate) async fn begin(pool: &SqlitePool) -> CoreResult<Transaction<'static, Sqlite>> {
    pool.begin().await.map_err(|err| storage_error("transaction", err))
}

pub(crate) async fn commit(tx: Transaction<'static, Sqlite>) -> CoreResult<()> {
    tx.commit().await.map_err(|err| storage_error("transaction", err))
}

/// Maps constraint failures to taxonomy kinds; everything else becomes `Internal`.
pub(crate) fn map_sqlx_error(entity: &'static str, id: impl Into<String>, err: sqlx::Error) -> CoreError {
    let message = match &err {
        sqlx::Error::Database(db_err) => db_err.message().to_string(),
        _ => String::new(),
    };
    if message.contains("UNIQUE constraint failed") {
        CoreError::already_exists(entity, id)
    } else if message.contains("FOREIGN KEY constraint failed") {
        CoreError::not_found(entity, id)
    } else {
        storage_error(entity, err)
    }
}

/// True when `err` is a UNIQUE failure naming `column` (e.g. `permissions.name`).
pub(crate) fn is_unique_violation_on(err: &sqlx::Error, column: &str) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err.message().contains("UNIQUE constraint failed") && db_err.message().contains(column)
    )
}

/// Logs the full driver error and returns a message free of SQL detail.
pub(crate) fn storage_error(entity: &'static str, err: sqlx::Error) -> CoreError {
    tracing::error!(entity, error = %err, "metadata storage failure");
    CoreError::internal(format!("storage failure while accessing {entity}"))
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> CoreResult<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|e| CoreError::internal(format!("corrupt column `{name}`: {e}")))
}

pub(crate) fn id_column<T>(
    row: &SqliteRow,
    name: &str,
    from_bytes: fn(&[u8]) -> Result<T, uuid::Error>,
) -> CoreResult<T> {
    let bytes: Vec<u8> = column(row, name)?;
    from_bytes(&bytes).map_err(|e| CoreError::internal(format!("corrupt id in `{name}`: {e}")))
}

pub(crate) fn timestamp_column(row: &SqliteRow, name: &str) -> CoreResult<DateTime<Utc>> {
    let text: String = column(row, name)?;
    parse_timestamp(name, &text)
}

pub(crate) fn optional_timestamp_column(
    row: &SqliteRow,
    name: &str,
) -> CoreResult<Option<DateTime<Utc>>> {
    let text: Option<String> = column(row, name)?;
    text.map(|t| parse_timestamp(name, &t)).transpose()
}

fn parse_timestamp(name: &str, text: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::internal(format!("corrupt timestamp in `{name}`: {e}")))
}

/// `%term%` with LIKE wildcards in `term` escaped by a backslash.
pub(crate) fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// Converts a row count from SQLite's signed integer.
pub(crate) fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
