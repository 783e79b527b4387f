use {
    chrono::{DateTime, Utc},
    uuid::Uuid,
};

pub mod action {
    pub const CREATED: &str = "created";
    pub const STATUS_CHANGED: &str = "status_changed";
    pub const EVENT_RECEIVED: &str = "event_received";
    pub const SUPERSEDED: &str = "superseded";
    pub const EXPIRED: &str = "expired";
    pub const ENTITLEMENT_CHANGED: &str = "entitlement_changed";
    pub const INVARIANT_VIOLATION: &str = "invariant_violation";
}

pub struct NewAuditEntry {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub event_key: Option<String>,
    pub action: String,
    pub actor: String,
    pub detail: serde_json::Value,
}

/// Who is mutating, on behalf of which ledger key, and at what instant.
/// Threaded through one transaction so every audit row it writes agrees.
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub event_key: Option<String>,
    pub actor: String,
    pub now: DateTime<Utc>,
}

impl AuditContext {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            event_key: None,
            actor: actor.into(),
            now: Utc::now(),
        }
    }

    pub fn with_event_key(mut self, key: impl Into<String>) -> Self {
        self.event_key = Some(key.into());
        self
    }

    pub fn entry(
        &self,
        entity_type: &str,
        entity_id: impl Into<String>,
        action: &str,
        detail: serde_json::Value,
    ) -> NewAuditEntry {
        NewAuditEntry {
            id: Uuid::now_v7(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.into(),
            event_key: self.event_key.clone(),
            action: action.to_string(),
            actor: self.actor.clone(),
            detail,
        }
    }
}
