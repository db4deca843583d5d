//! Roles group permissions and are bound to users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::audit::{snapshot_of, Auditable, ResourceType};
use crate::ids::{PermissionId, RoleId};
use crate::permission::Permission;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub role_id: RoleId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A role joined with its permissions and the number of users holding it.
///
/// Computed at read time; nothing here is stored on the role row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDetails {
    #[serde(flatten)]
    pub role: Role,
    pub permissions: Vec<Permission>,
    pub user_count: u64,
}

impl Role {
    #[must_use]
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            role_id: RoleId::new(),
            name: name.into().trim().to_string(),
            description,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl RoleDetails {
    #[must_use]
    pub fn permission_ids(&self) -> Vec<PermissionId> {
        self.permissions.iter().map(|p| p.permission_id).collect()
    }
}

impl Auditable for Role {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Role
    }

    fn resource_id(&self) -> String {
        self.role_id.to_string()
    }

    fn snapshot(&self) -> JsonValue {
        snapshot_of(self)
    }
}

impl Auditable for RoleDetails {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Role
    }

    fn resource_id(&self) -> String {
        self.role.role_id.to_string()
    }

    fn snapshot(&self) -> JsonValue {
        snapshot_of(self)
    }
}
