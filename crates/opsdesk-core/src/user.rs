//! Operator accounts and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

use crate::audit::{snapshot_of, Auditable, ResourceType};
use crate::ids::{RoleId, UserId};

/// An operator account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub name: String,
    pub email: String,
    /// Argon2 PHC string. Never serialized into snapshots.
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
    /// Tombstone. A deleted row stays so audit history keeps its meaning.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Can authenticate and holds the permissions of its roles.
    Active,
    /// Disabled by an administrator.
    Inactive,
    /// Created but not yet activated.
    Pending,
}

/// A user together with the ids of the roles bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDetails {
    #[serde(flatten)]
    pub user: User,
    pub role_ids: Vec<RoleId>,
}

impl User {
    /// Creates a new user; `email` is normalized.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        email: &str,
        password_hash: impl Into<String>,
        status: UserStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id: UserId::new(),
            name: name.into(),
            email: normalize_email(email),
            password_hash: password_hash.into(),
            status,
            created_at: now,
            updated_at: now,
            last_login_at: None,
            deleted_at: None,
        }
    }

    /// Update the last login timestamp. `updated_at` moves with it.
    pub fn record_login(&mut self) {
        let now = Utc::now();
        self.last_login_at = Some(now);
        self.updated_at = now;
    }

    /// Transition to a new status.
    pub fn transition_to(&mut self, status: UserStatus) {
        self.status = status;
        self.touch();
    }

    /// Update the updated_at timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Only live, active accounts may log in or hold permissions.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.status == UserStatus::Active && !self.is_deleted()
    }
}

impl UserStatus {
    /// Convert status to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Pending => "pending",
        }
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UserStatus::Active),
            "inactive" => Ok(UserStatus::Inactive),
            "pending" => Ok(UserStatus::Pending),
            _ => Err(format!("invalid user status: {s}")),
        }
    }
}

impl Auditable for User {
    fn resource_type(&self) -> ResourceType {
        ResourceType::User
    }

    fn resource_id(&self) -> String {
        self.user_id.to_string()
    }

    fn snapshot(&self) -> JsonValue {
        snapshot_of(self)
    }
}

impl Auditable for UserDetails {
    fn resource_type(&self) -> ResourceType {
        ResourceType::User
    }

    fn resource_id(&self) -> String {
        self.user.user_id.to_string()
    }

    fn snapshot(&self) -> JsonValue {
        snapshot_of(self)
    }
}

/// Lowercases and trims an email address.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_normalizes_email() {
        let user = User::new("Dana", "  Dana@Example.COM ", "hash", UserStatus::Active);
        assert_eq!(user.email, "dana@example.com");
        assert!(user.is_enabled());
    }

    #[test]
    fn inactive_or_deleted_users_are_disabled() {
        let mut user = User::new("Lee", "lee@example.com", "hash", UserStatus::Active);
        user.transition_to(UserStatus::Inactive);
        assert!(!user.is_enabled());

        user.transition_to(UserStatus::Active);
        user.deleted_at = Some(Utc::now());
        assert!(!user.is_enabled());
    }

    #[test]
    fn snapshot_never_contains_password_hash() {
        let user = User::new("Kim", "kim@example.com", "$argon2id$secret", UserStatus::Pending);
        let details = UserDetails {
            user,
            role_ids: vec![RoleId::new()],
        };
        assert!(details.user.snapshot().get("password_hash").is_none());
        let snapshot = details.snapshot();
        assert!(snapshot.get("password_hash").is_none());
        assert_eq!(snapshot["status"], "pending");
        assert_eq!(snapshot["role_ids"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [UserStatus::Active, UserStatus::Inactive, UserStatus::Pending] {
            assert_eq!(UserStatus::from_str(status.as_str()), Ok(status));
        }
        assert!(UserStatus::from_str("suspended").is_err());
    }
}
