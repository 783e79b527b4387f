use {
    super::error::PipelineError,
    super::id::{GatewaySubscriptionId, PaymentId, SubscriptionId},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub const ALL: [SubscriptionStatus; 4] =
        [Self::Pending, Self::Active, Self::Cancelled, Self::Expired];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }

    pub fn can_transition_to(&self, target: &SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, target),
            (Pending, Active)
                | (Pending, Cancelled)
                | (Pending, Expired)
                | (Active, Cancelled)
                | (Active, Expired)
        )
    }

    /// Status carried by `SUBSCRIPTION_UPDATED`.
    pub fn from_gateway(status: &str) -> Option<Self> {
        match status {
            "ACTIVE" => Some(Self::Active),
            "EXPIRED" => Some(Self::Expired),
            "INACTIVE" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for SubscriptionStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            other => Err(PipelineError::Validation(format!(
                "unknown subscription status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    Advance {
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    },
    SameStatus,
    OutOfOrder {
        current: SubscriptionStatus,
        incoming: SubscriptionStatus,
    },
    Rejected {
        current: SubscriptionStatus,
        incoming: SubscriptionStatus,
    },
}

/// Pure state merge for one subscription. `current` must already be the
/// effective status (expiry applied).
pub fn decide(current: SubscriptionStatus, target: SubscriptionStatus) -> SubscriptionAction {
    use SubscriptionStatus::*;
    if current == target {
        return SubscriptionAction::SameStatus;
    }
    if current.can_transition_to(&target) {
        return SubscriptionAction::Advance {
            from: current,
            to: target,
        };
    }
    match (current, target) {
        // SUBSCRIPTION_CREATED delivered after the confirming payment.
        (Active, Pending) => SubscriptionAction::OutOfOrder {
            current,
            incoming: target,
        },
        // Late news about a subscription that already ended.
        (Cancelled | Expired, Pending) => SubscriptionAction::OutOfOrder {
            current,
            incoming: target,
        },
        _ => SubscriptionAction::Rejected {
            current,
            incoming: target,
        },
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionRecord {
    pub id: SubscriptionId,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub member_type_id: Uuid,
    pub status: SubscriptionStatus,
    pub status_reason: Option<String>,
    pub gateway_subscription_id: Option<GatewaySubscriptionId>,
    pub activated_by_payment_id: Option<PaymentId>,
    pub started_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// Stored status with the expiry timestamp applied: a live subscription
    /// whose expiry has passed reads as `expired` without any event.
    pub fn effective_status(&self, now: DateTime<Utc>) -> SubscriptionStatus {
        effective_status(self.status, self.expires_at, now)
    }

    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) != self.status
    }
}

pub fn effective_status(
    stored: SubscriptionStatus,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> SubscriptionStatus {
    match (stored, expires_at) {
        (SubscriptionStatus::Pending | SubscriptionStatus::Active, Some(at)) if at <= now => {
            SubscriptionStatus::Expired
        }
        (status, _) => status,
    }
}

/// Checkout request: creates a pending subscription.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub member_type_id: Uuid,
    pub gateway_subscription_id: Option<GatewaySubscriptionId>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// What a refund does to the subscription its payment activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefundPolicy {
    /// Cancel the subscription when it was activated by the refunded payment.
    #[default]
    CancelSubscription,
    /// Leave the subscription alone; ops handle refunds by hand.
    KeepSubscription,
}

impl RefundPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CancelSubscription => "cancel_subscription",
            Self::KeepSubscription => "keep_subscription",
        }
    }
}

impl TryFrom<&str> for RefundPolicy {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "cancel_subscription" => Ok(Self::CancelSubscription),
            "keep_subscription" => Ok(Self::KeepSubscription),
            other => Err(PipelineError::Validation(format!(
                "unknown refund policy: {other}"
            ))),
        }
    }
}

/// Why a subscription left `active`.
pub mod reason {
    pub const SUPERSEDED: &str = "superseded";
    pub const REFUNDED: &str = "refunded";
    pub const GATEWAY_DELETED: &str = "gateway_deleted";
    pub const GATEWAY_INACTIVE: &str = "gateway_inactive";
    pub const EXPIRED: &str = "expired";
}
