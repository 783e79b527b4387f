use {
    super::error::PipelineError,
    super::id::{PaymentId, SubscriptionId},
    super::money::{BillingMethod, Money},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Created,
    Overdue,
    Confirmed,
    Received,
    Refunded,
    Deleted,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 6] = [
        Self::Created,
        Self::Overdue,
        Self::Confirmed,
        Self::Received,
        Self::Refunded,
        Self::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Overdue => "overdue",
            Self::Confirmed => "confirmed",
            Self::Received => "received",
            Self::Refunded => "refunded",
            Self::Deleted => "deleted",
        }
    }

    /// Lifecycle rank: higher means further along. An incoming status with a
    /// lower rank than the current one is a late delivery, never a regression.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Overdue => 1,
            Self::Confirmed => 2,
            Self::Received => 3,
            Self::Refunded => 4,
            Self::Deleted => 5,
        }
    }

    /// Funds have been (or are being) settled for this payment.
    pub fn is_funded(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Received)
    }

    pub fn can_transition_to(&self, target: &PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, target),
            // forward path
            (Created, Confirmed)
                | (Created, Overdue)
                | (Created, Received)
                | (Overdue, Confirmed)
                | (Overdue, Received)
                | (Confirmed, Received)
            // compensating side-transitions
                | (Confirmed | Overdue | Received | Deleted, Refunded)
                | (Created | Overdue | Confirmed | Received | Refunded, Deleted)
        )
    }

    /// Status the gateway reports inside the payment object. Only used to seed
    /// a record created lazily by a restore.
    pub fn from_gateway(status: &str) -> Option<Self> {
        match status {
            "PENDING" | "AWAITING_RISK_ANALYSIS" => Some(Self::Created),
            "CONFIRMED" => Some(Self::Confirmed),
            "RECEIVED" | "RECEIVED_IN_CASH" => Some(Self::Received),
            "OVERDUE" => Some(Self::Overdue),
            "REFUNDED" => Some(Self::Refunded),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for PaymentStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "created" => Ok(Self::Created),
            "overdue" => Ok(Self::Overdue),
            "confirmed" => Ok(Self::Confirmed),
            "received" => Ok(Self::Received),
            "refunded" => Ok(Self::Refunded),
            "deleted" => Ok(Self::Deleted),
            other => Err(PipelineError::Validation(format!(
                "unknown payment status: {other}"
            ))),
        }
    }
}

/// What a payment event asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentCommand {
    MoveTo(PaymentStatus),
    Restore,
}

/// The slice of a stored payment the transition table looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentState {
    pub status: PaymentStatus,
    pub status_before_delete: Option<PaymentStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentAction {
    /// No record yet: create it at `status`.
    Create { status: PaymentStatus },
    /// Move along the graph. `shadow` is the new value of the
    /// pre-deletion shadow field.
    Advance {
        from: PaymentStatus,
        to: PaymentStatus,
        shadow: Option<PaymentStatus>,
    },
    SameStatus,
    /// Late delivery of an earlier lifecycle step. Recorded, status kept.
    OutOfOrder {
        current: PaymentStatus,
        incoming: PaymentStatus,
    },
    /// Not on the graph and not a late delivery.
    Rejected {
        current: PaymentStatus,
        incoming: PaymentStatus,
    },
}

/// Pure state merge of (current state, event) for one payment.
pub fn decide(
    current: Option<PaymentState>,
    command: PaymentCommand,
    declared: Option<PaymentStatus>,
) -> PaymentAction {
    let Some(state) = current else {
        let status = match command {
            PaymentCommand::MoveTo(status) => status,
            PaymentCommand::Restore => declared.unwrap_or(PaymentStatus::Created),
        };
        return PaymentAction::Create { status };
    };

    match command {
        PaymentCommand::Restore if state.status == PaymentStatus::Deleted => {
            PaymentAction::Advance {
                from: PaymentStatus::Deleted,
                to: state
                    .status_before_delete
                    .or(declared)
                    .unwrap_or(PaymentStatus::Created),
                shadow: None,
            }
        }
        // A restore for a payment that is not deleted: the delete is still in
        // flight or never happened.
        PaymentCommand::Restore => PaymentAction::OutOfOrder {
            current: state.status,
            incoming: state.status,
        },
        PaymentCommand::MoveTo(target) if target == state.status => PaymentAction::SameStatus,
        PaymentCommand::MoveTo(target) if state.status.can_transition_to(&target) => {
            // The shadow only means something while the payment is deleted.
            let shadow = (target == PaymentStatus::Deleted).then_some(state.status);
            PaymentAction::Advance {
                from: state.status,
                to: target,
                shadow,
            }
        }
        PaymentCommand::MoveTo(target) if target.rank() < state.status.rank() => {
            PaymentAction::OutOfOrder {
                current: state.status,
                incoming: target,
            }
        }
        PaymentCommand::MoveTo(target) => PaymentAction::Rejected {
            current: state.status,
            incoming: target,
        },
    }
}

/// Full payment record from DB (for reads).
#[derive(Debug, Clone, Serialize)]
pub struct PaymentRecord {
    pub id: PaymentId,
    pub user_id: Option<Uuid>,
    pub subscription_id: Option<SubscriptionId>,
    pub money: Money,
    pub method: BillingMethod,
    pub status: PaymentStatus,
    pub status_before_delete: Option<PaymentStatus>,
    pub last_event_type: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn state(&self) -> PaymentState {
        PaymentState {
            status: self.status,
            status_before_delete: self.status_before_delete,
        }
    }

    /// Still waiting for the member to pay.
    pub fn is_awaiting_funds(&self) -> bool {
        matches!(self.status, PaymentStatus::Created | PaymentStatus::Overdue)
    }
}

/// For INSERT.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub id: PaymentId,
    pub user_id: Option<Uuid>,
    pub subscription_id: Option<SubscriptionId>,
    pub money: Money,
    pub method: BillingMethod,
    pub status: PaymentStatus,
    pub status_before_delete: Option<PaymentStatus>,
    pub card_token_sealed: Option<String>,
    pub last_event_type: String,
}
