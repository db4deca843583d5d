//! Append-only audit trail with a SHA-256 hash chain.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use crate::ids::{AuditLogId, UserId};

/// `prev_hash` of the first entry in the chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Audit log entry. Write-once: there is no update path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub audit_log_id: AuditLogId,
    /// Position in the chain, assigned on append (1-based).
    pub sequence: u64,
    /// `None` for system actions such as catalog seeding.
    pub actor_id: Option<UserId>,
    /// Denormalized at write time so history survives actor deletion.
    pub actor_name: String,
    pub action: AuditAction,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub details: JsonValue,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub prev_hash: String,
    pub entry_hash: String,
}

/// Action verb recorded in the trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Create,
    Read,
    Update,
    Delete,
    Login,
    Logout,
}

/// Resource type tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceType {
    User,
    Role,
    Permission,
    Business,
    Environment,
    Asset,
    Service,
    ServiceInstance,
    /// Tag introduced by an outer layer.
    Other(String),
}

/// Client network metadata attached to an audit record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// The shape of a state change, which fixes the verb and the `details` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// `details` is the created entity.
    Create,
    /// `details` is `{ "before": .., "after": .. }`.
    Update,
    /// `details` is the deleted snapshot.
    Delete,
}

/// Filters for browsing the audit trail. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditQuery {
    pub actor_id: Option<UserId>,
    pub action: Option<AuditAction>,
    pub resource_type: Option<ResourceType>,
    pub resource_id: Option<String>,
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub to: Option<DateTime<Utc>>,
}

/// Outcome of walking the hash chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainVerification {
    Intact { entries: u64 },
    Broken { sequence: u64, reason: String },
}

/// Anything a mutation can produce and the audit trail can describe.
pub trait Auditable {
    fn resource_type(&self) -> ResourceType;

    fn resource_id(&self) -> String;

    /// JSON image of the entity. Must not contain credentials.
    fn snapshot(&self) -> JsonValue;
}

/// Identity of a committed entity when no fuller image is at hand, such as
/// the target of a delete or of an association edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub resource_type: ResourceType,
    pub resource_id: String,
}

impl EntityRef {
    #[must_use]
    pub fn new(resource_type: ResourceType, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type,
            resource_id: resource_id.into(),
        }
    }
}

impl Auditable for EntityRef {
    fn resource_type(&self) -> ResourceType {
        self.resource_type.clone()
    }

    fn resource_id(&self) -> String {
        self.resource_id.clone()
    }

    fn snapshot(&self) -> JsonValue {
        serde_json::json!({ "id": self.resource_id })
    }
}

/// Serializes a value for a snapshot, falling back to `null`.
pub fn snapshot_of<T: Serialize>(value: &T) -> JsonValue {
    serde_json::to_value(value).unwrap_or(JsonValue::Null)
}

impl AuditLogEntry {
    /// Creates an unsealed entry. `sequence` and the hashes are set by [`seal`](Self::seal).
    #[must_use]
    pub fn new(
        actor_id: Option<UserId>,
        actor_name: impl Into<String>,
        action: AuditAction,
        resource_type: ResourceType,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            audit_log_id: AuditLogId::new(),
            sequence: 0,
            actor_id,
            actor_name: actor_name.into(),
            action,
            resource_type,
            resource_id: resource_id.into(),
            details: JsonValue::Null,
            ip_address: None,
            user_agent: None,
            created_at: Utc::now().trunc_subsecs(3),
            prev_hash: String::new(),
            entry_hash: String::new(),
        }
    }

    /// Attach the structured details payload.
    #[must_use]
    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = details;
        self
    }

    /// Attach client IP address and user agent.
    #[must_use]
    pub fn with_client(mut self, client: &ClientMeta) -> Self {
        self.ip_address = client.ip_address.clone();
        self.user_agent = client.user_agent.clone();
        self
    }

    /// Places the entry at `sequence` after an entry whose hash is `prev_hash`.
    #[must_use]
    pub fn seal(mut self, sequence: u64, prev_hash: impl Into<String>) -> Self {
        self.sequence = sequence;
        self.prev_hash = prev_hash.into();
        self.entry_hash = self.compute_hash();
        self
    }

    /// SHA-256 over a length-prefixed encoding of every recorded field.
    #[must_use]
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sequence.to_be_bytes());
        hasher.update(self.audit_log_id.to_bytes());
        match self.actor_id {
            Some(id) => {
                hasher.update([1]);
                hasher.update(id.to_bytes());
            }
            None => hasher.update([0]),
        }
        write_field(&mut hasher, &self.actor_name);
        write_field(&mut hasher, self.action.as_str());
        write_field(&mut hasher, self.resource_type.as_str());
        write_field(&mut hasher, &self.resource_id);
        write_field(&mut hasher, &self.details.to_string());
        write_optional(&mut hasher, self.ip_address.as_deref());
        write_optional(&mut hasher, self.user_agent.as_deref());
        write_field(&mut hasher, &format_timestamp(self.created_at));
        write_field(&mut hasher, &self.prev_hash);
        hex::encode(hasher.finalize())
    }

    /// Whether the stored hash matches the recorded fields.
    #[must_use]
    pub fn is_intact(&self) -> bool {
        self.entry_hash == self.compute_hash()
    }
}

fn write_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

fn write_optional(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update([1]);
            write_field(hasher, v);
        }
        None => hasher.update([0]),
    }
}

/// Millisecond RFC 3339, the form timestamps are stored and hashed in.
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Walks entries in ascending sequence order starting right after `expected_prev`.
///
/// Returns the number of entries checked, or the first broken position.
pub fn verify_links<'a>(
    entries: impl IntoIterator<Item = &'a AuditLogEntry>,
    mut expected_sequence: u64,
    expected_prev: &str,
) -> Result<(u64, String), ChainVerification> {
    let mut prev = expected_prev.to_string();
    let mut checked = 0u64;
    for entry in entries {
        if entry.sequence != expected_sequence {
            return Err(ChainVerification::Broken {
                sequence: expected_sequence,
                reason: format!("expected sequence {expected_sequence}, found {}", entry.sequence),
            });
        }
        if entry.prev_hash != prev {
            return Err(ChainVerification::Broken {
                sequence: entry.sequence,
                reason: "prev_hash does not match the preceding entry".to_string(),
            });
        }
        if !entry.is_intact() {
            return Err(ChainVerification::Broken {
                sequence: entry.sequence,
                reason: "entry_hash does not match recorded fields".to_string(),
            });
        }
        prev = entry.entry_hash.clone();
        expected_sequence += 1;
        checked += 1;
    }
    Ok((checked, prev))
}

impl AuditAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Read => "READ",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
        }
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(AuditAction::Create),
            "READ" => Ok(AuditAction::Read),
            "UPDATE" => Ok(AuditAction::Update),
            "DELETE" => Ok(AuditAction::Delete),
            "LOGIN" => Ok(AuditAction::Login),
            "LOGOUT" => Ok(AuditAction::Logout),
            _ => Err(format!("invalid audit action: {s}")),
        }
    }
}

impl From<MutationKind> for AuditAction {
    fn from(kind: MutationKind) -> Self {
        match kind {
            MutationKind::Create => AuditAction::Create,
            MutationKind::Update => AuditAction::Update,
            MutationKind::Delete => AuditAction::Delete,
        }
    }
}

impl ResourceType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            ResourceType::User => "USER",
            ResourceType::Role => "ROLE",
            ResourceType::Permission => "PERMISSION",
            ResourceType::Business => "BUSINESS",
            ResourceType::Environment => "ENVIRONMENT",
            ResourceType::Asset => "ASSET",
            ResourceType::Service => "SERVICE",
            ResourceType::ServiceInstance => "SERVICE_INSTANCE",
            ResourceType::Other(tag) => tag,
        }
    }

    /// The built-in tags, in catalog order.
    #[must_use]
    pub fn builtin() -> [ResourceType; 8] {
        [
            ResourceType::User,
            ResourceType::Role,
            ResourceType::Permission,
            ResourceType::Business,
            ResourceType::Environment,
            ResourceType::Asset,
            ResourceType::Service,
            ResourceType::ServiceInstance,
        ]
    }
}

impl From<&str> for ResourceType {
    fn from(tag: &str) -> Self {
        match tag.trim().to_uppercase().as_str() {
            "USER" => ResourceType::User,
            "ROLE" => ResourceType::Role,
            "PERMISSION" => ResourceType::Permission,
            "BUSINESS" => ResourceType::Business,
            "ENVIRONMENT" => ResourceType::Environment,
            "ASSET" => ResourceType::Asset,
            "SERVICE" => ResourceType::Service,
            "SERVICE_INSTANCE" => ResourceType::ServiceInstance,
            other => ResourceType::Other(other.to_string()),
        }
    }
}

impl From<String> for ResourceType {
    fn from(tag: String) -> Self {
        ResourceType::from(tag.as_str())
    }
}

impl From<ResourceType> for String {
    fn from(value: ResourceType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain(len: u64) -> Vec<AuditLogEntry> {
        let mut prev = GENESIS_HASH.to_string();
        (1..=len)
            .map(|sequence| {
                let entry = AuditLogEntry::new(
                    Some(UserId::new()),
                    "Ada",
                    AuditAction::Update,
                    ResourceType::Role,
                    format!("role-{sequence}"),
                )
                .with_details(json!({ "before": null, "after": { "name": "ops" } }))
                .seal(sequence, prev.clone());
                prev = entry.entry_hash.clone();
                entry
            })
            .collect()
    }

    #[test]
    fn sealed_entry_is_intact() {
        let entries = chain(1);
        assert!(entries[0].is_intact());
        assert_eq!(entries[0].prev_hash, GENESIS_HASH);
        assert_eq!(entries[0].entry_hash.len(), 64);
    }

    #[test]
    fn edited_details_break_the_hash() {
        let mut entries = chain(3);
        entries[1].details = json!({ "after": { "name": "root" } });
        let result = verify_links(&entries, 1, GENESIS_HASH);
        assert!(matches!(result, Err(ChainVerification::Broken { sequence: 2, .. })));
    }

    #[test]
    fn removed_entry_breaks_the_sequence() {
        let mut entries = chain(3);
        entries.remove(1);
        let result = verify_links(&entries, 1, GENESIS_HASH);
        assert!(matches!(result, Err(ChainVerification::Broken { sequence: 2, .. })));
    }

    #[test]
    fn intact_chain_reports_count_and_tail() {
        let entries = chain(4);
        let (checked, tail) = verify_links(&entries, 1, GENESIS_HASH).expect("intact");
        assert_eq!(checked, 4);
        assert_eq!(tail, entries[3].entry_hash);
    }

    #[test]
    fn resource_type_tags_are_case_insensitive() {
        assert_eq!(ResourceType::from("service_instance"), ResourceType::ServiceInstance);
        assert_eq!(ResourceType::from("ticket"), ResourceType::Other("TICKET".to_string()));
        assert_eq!(ResourceType::Other("TICKET".to_string()).as_str(), "TICKET");
    }

    #[test]
    fn resource_type_serializes_as_tag() {
        let value = serde_json::to_value(ResourceType::ServiceInstance).expect("serialize");
        assert_eq!(value, json!("SERVICE_INSTANCE"));
    }
}
