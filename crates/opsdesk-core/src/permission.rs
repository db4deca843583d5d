//! Permission catalog entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use crate::audit::{snapshot_of, Auditable, ResourceType};
use crate::ids::PermissionId;

/// A named grant for one (resource, action) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub permission_id: PermissionId,
    pub name: String,
    pub resource: String,
    pub action: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The two-part key identifying a protected operation.
///
/// Both halves are stored lowercase so `ROLE:DELETE` and `role:delete`
/// name the same operation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PermissionKey {
    pub resource: String,
    pub action: String,
}

impl Permission {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        resource: &str,
        action: &str,
        description: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let key = PermissionKey::new(resource, action);
        Self {
            permission_id: PermissionId::new(),
            name: name.into().trim().to_string(),
            resource: key.resource,
            action: key.action,
            description,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn key(&self) -> PermissionKey {
        PermissionKey::new(&self.resource, &self.action)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl PermissionKey {
    #[must_use]
    pub fn new(resource: &str, action: &str) -> Self {
        Self {
            resource: resource.trim().to_lowercase(),
            action: action.trim().to_lowercase(),
        }
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

impl Auditable for Permission {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Permission
    }

    fn resource_id(&self) -> String {
        self.permission_id.to_string()
    }

    fn snapshot(&self) -> JsonValue {
        snapshot_of(self)
    }
}
