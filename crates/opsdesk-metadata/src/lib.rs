//! SQLite metadata adapters for the OpsDesk access-control and audit core.

mod associations;
mod audit_repository;
mod binding_repository;
pub mod password;
mod permission_repository;
mod role_repository;
mod user_repository;
mod util;

pub use audit_repository::SqliteAuditLogRepository;
pub use binding_repository::SqliteRoleBindingRepository;
pub use password::Argon2Hasher;
pub use permission_repository::SqlitePermissionRepository;
pub use role_repository::SqliteRoleRepository;
pub use user_repository::SqliteUserRepository;
pub use util::{create_sqlite_pool, run_migrations};

/// Embedded SQL migrations for the metadata database.
pub const MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
