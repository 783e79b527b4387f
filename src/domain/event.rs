use {
    super::id::{EventId, GatewaySubscriptionId, PaymentId},
    super::money::{BillingMethod, Money},
    super::payment::{PaymentCommand, PaymentStatus},
    super::subscription::SubscriptionStatus,
    chrono::{DateTime, Utc},
    derive_more::Display,
    secrecy::SecretString,
    serde::Deserialize,
    sha2::{Digest, Sha256},
};

/// Closed set of gateway event types we act on. Anything else deserializes
/// to `Unknown` and is dropped after logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display)]
pub enum EventType {
    #[serde(rename = "PAYMENT_CREATED")]
    #[display("PAYMENT_CREATED")]
    PaymentCreated,

    #[serde(rename = "PAYMENT_CONFIRMED")]
    #[display("PAYMENT_CONFIRMED")]
    PaymentConfirmed,

    #[serde(rename = "PAYMENT_RECEIVED")]
    #[display("PAYMENT_RECEIVED")]
    PaymentReceived,

    #[serde(rename = "PAYMENT_OVERDUE")]
    #[display("PAYMENT_OVERDUE")]
    PaymentOverdue,

    #[serde(rename = "PAYMENT_DELETED")]
    #[display("PAYMENT_DELETED")]
    PaymentDeleted,

    #[serde(rename = "PAYMENT_RESTORED")]
    #[display("PAYMENT_RESTORED")]
    PaymentRestored,

    #[serde(rename = "PAYMENT_REFUNDED")]
    #[display("PAYMENT_REFUNDED")]
    PaymentRefunded,

    #[serde(rename = "SUBSCRIPTION_CREATED")]
    #[display("SUBSCRIPTION_CREATED")]
    SubscriptionCreated,

    #[serde(rename = "SUBSCRIPTION_UPDATED")]
    #[display("SUBSCRIPTION_UPDATED")]
    SubscriptionUpdated,

    #[serde(rename = "SUBSCRIPTION_DELETED")]
    #[display("SUBSCRIPTION_DELETED")]
    SubscriptionDeleted,

    #[serde(other)]
    #[display("UNKNOWN")]
    Unknown,
}

impl EventType {
    pub fn entity_kind(&self) -> Option<EntityKind> {
        use EventType::*;
        match self {
            PaymentCreated | PaymentConfirmed | PaymentReceived | PaymentOverdue
            | PaymentDeleted | PaymentRestored | PaymentRefunded => Some(EntityKind::Payment),
            SubscriptionCreated | SubscriptionUpdated | SubscriptionDeleted => {
                Some(EntityKind::Subscription)
            }
            Unknown => None,
        }
    }

    pub fn payment_command(&self) -> Option<PaymentCommand> {
        use EventType::*;
        match self {
            PaymentCreated => Some(PaymentCommand::MoveTo(PaymentStatus::Created)),
            PaymentConfirmed => Some(PaymentCommand::MoveTo(PaymentStatus::Confirmed)),
            PaymentReceived => Some(PaymentCommand::MoveTo(PaymentStatus::Received)),
            PaymentOverdue => Some(PaymentCommand::MoveTo(PaymentStatus::Overdue)),
            PaymentDeleted => Some(PaymentCommand::MoveTo(PaymentStatus::Deleted)),
            PaymentRefunded => Some(PaymentCommand::MoveTo(PaymentStatus::Refunded)),
            PaymentRestored => Some(PaymentCommand::Restore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum EntityKind {
    #[display("payment")]
    Payment,
    #[display("subscription")]
    Subscription,
}

/// Payment facts carried by a payment event.
#[derive(Debug)]
pub struct PaymentFacts {
    pub id: PaymentId,
    pub money: Money,
    pub method: BillingMethod,
    pub declared_status: Option<PaymentStatus>,
    pub gateway_subscription_id: Option<GatewaySubscriptionId>,
    pub external_reference: Option<String>,
    pub card_token: Option<SecretString>,
}

/// Subscription facts carried by a subscription event.
#[derive(Debug, Clone)]
pub struct SubscriptionFacts {
    pub gateway_id: GatewaySubscriptionId,
    pub declared_status: Option<SubscriptionStatus>,
    pub external_reference: Option<String>,
}

#[derive(Debug)]
pub enum EventSubject {
    Payment(PaymentFacts),
    Subscription(SubscriptionFacts),
}

/// Canonical form of one webhook delivery.
#[derive(Debug)]
pub struct InboundEvent {
    pub event_id: Option<EventId>,
    pub event_type: EventType,
    pub occurred_at: DateTime<Utc>,
    pub subject: EventSubject,
    pub raw: serde_json::Value,
}

impl InboundEvent {
    pub fn entity_kind(&self) -> EntityKind {
        match self.subject {
            EventSubject::Payment(_) => EntityKind::Payment,
            EventSubject::Subscription(_) => EntityKind::Subscription,
        }
    }

    pub fn entity_id(&self) -> &str {
        match &self.subject {
            EventSubject::Payment(p) => p.id.as_str(),
            EventSubject::Subscription(s) => s.gateway_id.as_str(),
        }
    }

    /// Ledger key: the gateway's event id when it sent one, otherwise a hash
    /// of (entity, event type, entity version before this event).
    pub fn idempotency_key(&self, pre_event_version: i64) -> String {
        match &self.event_id {
            Some(id) => id.as_str().to_string(),
            None => derived_key(self.entity_id(), self.event_type, pre_event_version),
        }
    }
}

pub fn derived_key(entity_id: &str, event_type: EventType, version: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity_id.as_bytes());
    hasher.update(b"|");
    hasher.update(event_type.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(version.to_be_bytes());
    format!("derived:{}", hex::encode(hasher.finalize()))
}

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    /// New record inserted.
    Created(String),
    /// Existing record moved along its graph.
    Updated(String),
    /// Event restates the current status.
    Unchanged(String),
    /// Late delivery. Recorded in the ledger, status kept.
    OutOfOrder(String),
    /// Transition not allowed, logged as anomaly.
    Anomaly(String),
    /// Event was already applied (duplicate delivery).
    Duplicate,
    /// Subscription event for a subscription we never opened.
    Unlinked(String),
}

impl ProcessResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Updated(_) => "updated",
            Self::Unchanged(_) => "unchanged",
            Self::OutOfOrder(_) => "out_of_order",
            Self::Anomaly(_) => "anomaly",
            Self::Duplicate => "duplicate",
            Self::Unlinked(_) => "unlinked",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_key_depends_on_version() {
        let a = derived_key("pay_1", EventType::PaymentConfirmed, 0);
        let b = derived_key("pay_1", EventType::PaymentConfirmed, 1);
        assert_ne!(a, b);
        assert_eq!(a, derived_key("pay_1", EventType::PaymentConfirmed, 0));
        assert!(a.starts_with("derived:"));
    }

    #[test]
    fn unknown_event_type_has_no_entity() {
        let t: EventType = serde_json::from_str("\"PAYMENT_CHARGEBACK_REQUESTED\"").unwrap();
        assert_eq!(t, EventType::Unknown);
        assert_eq!(t.entity_kind(), None);
    }
}
