//! Core domain types and traits for the OpsDesk access-control and audit layer.

pub mod audit;
pub mod auth;
pub mod error;
pub mod ids;
pub mod page;
pub mod permission;
pub mod role;
pub mod traits;
pub mod user;

pub use audit::{
    AuditAction, AuditLogEntry, AuditQuery, Auditable, ChainVerification, ClientMeta, EntityRef,
    MutationKind, ResourceType, GENESIS_HASH,
};
pub use auth::{Claims, RequestContext, SYSTEM_ACTOR};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use ids::{AuditLogId, PermissionId, RoleId, UserId};
pub use page::{Page, PageLimits, PageRequest};
pub use permission::{Permission, PermissionKey};
pub use role::{Role, RoleDetails};
pub use traits::{
    AuditLogRepository, BindingMode, PasswordHasher, PermissionFilter, PermissionRepository,
    RoleBindingRepository, RoleRepository, UserFilter, UserRepository,
};
pub use user::{User, UserDetails, UserStatus};
