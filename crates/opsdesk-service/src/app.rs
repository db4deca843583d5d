//! Wiring of repositories, evaluator, recorder and orchestrators.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{error, info};

use opsdesk_core::{CoreError, CoreResult};
use opsdesk_metadata::{
    create_sqlite_pool, run_migrations, Argon2Hasher, SqliteAuditLogRepository,
    SqlitePermissionRepository, SqliteRoleBindingRepository, SqliteRoleRepository,
    SqliteUserRepository,
};

use crate::access::AccessGuard;
use crate::audit::AuditRecorder;
use crate::authorization::AuthorizationEvaluator;
use crate::config::Config;
use crate::permission_service::PermissionService;
use crate::role_service::RoleService;
use crate::user_service::UserService;

/// Everything the outer request layer calls into.
pub struct OpsDesk {
    pub roles: RoleService,
    pub permissions: PermissionService,
    pub users: UserService,
    pub evaluator: Arc<AuthorizationEvaluator>,
    pub guard: AccessGuard,
    pub audit: Arc<AuditRecorder>,
}

impl OpsDesk {
    /// Builds the service graph on an already migrated pool.
    #[must_use]
    pub fn from_pool(pool: SqlitePool, config: &Config) -> Self {
        let limits = config.page_limits();

        let users = Arc::new(SqliteUserRepository::new(pool.clone()));
        let roles = Arc::new(SqliteRoleRepository::new(pool.clone()));
        let permissions = Arc::new(SqlitePermissionRepository::new(pool.clone()));
        let bindings = Arc::new(SqliteRoleBindingRepository::new(pool.clone()));
        let audit_log = Arc::new(SqliteAuditLogRepository::new(pool));

        let audit = Arc::new(AuditRecorder::new(
            audit_log,
            config.operation_timeout(),
            limits,
        ));
        let evaluator = Arc::new(AuthorizationEvaluator::new(users.clone(), bindings.clone()));

        Self {
            roles: RoleService::new(roles.clone(), bindings.clone(), audit.clone(), limits),
            permissions: PermissionService::new(permissions, roles, audit.clone(), limits),
            users: UserService::new(
                users,
                bindings,
                Arc::new(Argon2Hasher),
                audit.clone(),
                limits,
            ),
            guard: AccessGuard::new(evaluator.clone()),
            evaluator,
            audit,
        }
    }

    /// Opens the configured database, applies migrations and wires everything.
    pub async fn connect(config: &Config) -> CoreResult<Self> {
        let pool = create_sqlite_pool(
            &config.database.url,
            config.database.max_connections,
            config.connection_timeout(),
        )
        .await
        .map_err(|err| {
            error!(url = %config.database.url, error = %err, "failed to open metadata database");
            CoreError::internal("failed to open metadata database")
        })?;

        run_migrations(&pool).await.map_err(|err| {
            error!(error = %err, "failed to apply metadata migrations");
            CoreError::internal("failed to apply metadata migrations")
        })?;

        info!(url = %config.database.url, "metadata database ready");
        Ok(Self::from_pool(pool, config))
    }
}
