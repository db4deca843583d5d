use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::audit::{AuditLogEntry, AuditQuery};
use crate::error::CoreResult;
use crate::ids::{PermissionId, RoleId, UserId};
use crate::page::{Page, PageRequest};
use crate::permission::{Permission, PermissionKey};
use crate::role::{Role, RoleDetails};
use crate::user::{User, UserStatus};

/// How a set of role ids is applied to a user's existing bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingMode {
    /// Union with the roles the user already holds.
    Merge,
    /// The given set becomes the user's entire role set.
    Replace,
}

/// Filters for listing users.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFilter {
    /// Case-insensitive substring of name or email.
    pub search: Option<String>,
    pub status: Option<UserStatus>,
}

/// Filters for listing permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionFilter {
    pub resource: Option<String>,
    /// Case-insensitive substring of the name.
    pub name: Option<String>,
}

/// Identity store. Tombstoned users are invisible to every read.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Inserts the user and binds `role_ids` in one transaction.
    async fn create(&self, user: &User, role_ids: &[RoleId]) -> CoreResult<()>;

    async fn get(&self, user_id: UserId) -> CoreResult<Option<User>>;

    /// Looks up a live user by normalized email.
    async fn get_by_email(&self, email: &str) -> CoreResult<Option<User>>;

    /// Lists live users ordered by creation time.
    async fn list(&self, filter: &UserFilter, page: PageRequest) -> CoreResult<Page<User>>;

    /// Writes name, email, status and `updated_at`; when `role_ids` is given,
    /// replaces the role set in the same transaction.
    async fn update(&self, user: &User, role_ids: Option<&[RoleId]>) -> CoreResult<()>;

    /// Stamps `last_login_at` on a live user. No other column is written.
    async fn record_login(&self, user_id: UserId, at: DateTime<Utc>) -> CoreResult<()>;

    /// Replaces the password hash of a live user. No other column is written.
    async fn set_password_hash(
        &self,
        user_id: UserId,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> CoreResult<()>;

    /// Sets the tombstone and drops the user's role bindings.
    async fn soft_delete(&self, user_id: UserId, deleted_at: DateTime<Utc>) -> CoreResult<()>;
}

/// User-role association.
#[async_trait]
pub trait RoleBindingRepository: Send + Sync {
    /// Binds roles to a live user. Already-present pairs are left as is.
    async fn assign(&self, user_id: UserId, role_ids: &[RoleId], mode: BindingMode)
        -> CoreResult<()>;

    /// Unbinds roles. Pairs that do not exist are ignored.
    async fn remove(&self, user_id: UserId, role_ids: &[RoleId]) -> CoreResult<()>;

    async fn role_ids_for_user(&self, user_id: UserId) -> CoreResult<Vec<RoleId>>;

    async fn roles_for_user(&self, user_id: UserId) -> CoreResult<Vec<Role>>;

    /// Distinct permissions reachable through any of the user's roles.
    async fn permissions_for_user(&self, user_id: UserId) -> CoreResult<Vec<Permission>>;
}

/// Role registry, including the role-permission association.
#[async_trait]
pub trait RoleRepository: Send + Sync {
    /// Inserts the role and its permission bindings in one transaction.
    async fn create(&self, role: &Role, permission_ids: &[PermissionId]) -> CoreResult<()>;

    async fn get(&self, role_id: RoleId) -> CoreResult<Option<Role>>;

    async fn get_by_name(&self, name: &str) -> CoreResult<Option<Role>>;

    /// Role with resolved permissions and current user count.
    async fn get_details(&self, role_id: RoleId) -> CoreResult<Option<RoleDetails>>;

    /// Case-insensitive partial name match, ordered by creation time.
    async fn list(&self, name_filter: Option<&str>, page: PageRequest) -> CoreResult<Page<Role>>;

    /// Updates the row and, when `permission_ids` is given, replaces the set atomically.
    async fn update(&self, role: &Role, permission_ids: Option<&[PermissionId]>)
        -> CoreResult<()>;

    /// Removes the role. Fails with `Conflict` while any user holds it.
    async fn delete(&self, role_id: RoleId) -> CoreResult<()>;

    async fn add_permissions(&self, role_id: RoleId, permission_ids: &[PermissionId])
        -> CoreResult<()>;

    async fn remove_permissions(
        &self,
        role_id: RoleId,
        permission_ids: &[PermissionId],
    ) -> CoreResult<()>;
}

/// Permission catalog.
#[async_trait]
pub trait PermissionRepository: Send + Sync {
    async fn create(&self, permission: &Permission) -> CoreResult<()>;

    async fn get(&self, permission_id: PermissionId) -> CoreResult<Option<Permission>>;

    async fn get_by_key(&self, key: &PermissionKey) -> CoreResult<Option<Permission>>;

    async fn list(
        &self,
        filter: &PermissionFilter,
        page: PageRequest,
    ) -> CoreResult<Page<Permission>>;

    async fn update(&self, permission: &Permission) -> CoreResult<()>;

    /// Deletes the permission and its role bindings.
    ///
    /// Returns how many roles lost the permission.
    async fn delete(&self, permission_id: PermissionId) -> CoreResult<u64>;
}

/// Append-only audit sink.
#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    /// Seals `entry` onto the tail of the chain and stores it.
    async fn append(&self, entry: AuditLogEntry) -> CoreResult<AuditLogEntry>;

    /// Newest first.
    async fn query(&self, filter: &AuditQuery, page: PageRequest)
        -> CoreResult<Page<AuditLogEntry>>;

    /// Entries with `sequence >= from_sequence` in ascending order.
    async fn list_from(&self, from_sequence: u64, limit: u32) -> CoreResult<Vec<AuditLogEntry>>;
}

/// Opaque credential hashing capability.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> CoreResult<String>;

    fn verify(&self, password: &str, hash: &str) -> CoreResult<bool>;
}
