//! Authorization, audit and mutation orchestration for OpsDesk.
//!
//! Outer request handlers build a [`RequestContext`](opsdesk_core::RequestContext)
//! from the verified caller, pass it through [`AccessGuard`] or
//! [`AuthorizationEvaluator`], and then call one of the orchestrators. Every
//! orchestrator mutation is funneled through the [`AuditRecorder`] pipeline.

pub mod access;
pub mod app;
pub mod audit;
pub mod authorization;
pub mod bootstrap;
pub mod config;
pub mod permission_service;
pub mod role_service;
pub mod telemetry;
pub mod user_service;

pub use access::AccessGuard;
pub use app::OpsDesk;
pub use audit::AuditRecorder;
pub use authorization::{AuthorizationContext, AuthorizationEvaluator};
pub use bootstrap::{seed_catalog, SeedReport, ADMIN_ROLE};
pub use config::{Config, ConfigError};
pub use permission_service::{CreatePermission, PermissionService, UpdatePermission};
pub use role_service::{CreateRole, RoleService, UpdateRole};
pub use telemetry::init_tracing;
pub use user_service::{CreateUser, UpdateUser, UserService};
