use {
    super::id::SubscriptionId,
    super::subscription::{SubscriptionStatus, effective_status},
    chrono::{DateTime, Utc},
    serde::Serialize,
    uuid::Uuid,
};

/// The membership a user is currently granted. `None` fields mean the
/// baseline "no paid entitlement" state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitlementState {
    pub user_id: Uuid,
    pub member_type_id: Option<Uuid>,
    pub subscription_id: Option<SubscriptionId>,
}

impl EntitlementState {
    pub fn baseline(user_id: Uuid) -> Self {
        Self {
            user_id,
            member_type_id: None,
            subscription_id: None,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.subscription_id.is_some()
    }
}

/// One subscription of the user as the reconciler sees it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub subscription_id: SubscriptionId,
    pub member_type_id: Uuid,
    pub privilege: i32,
    pub status: SubscriptionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// More than one active subscription for the same member type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    pub member_type_id: Uuid,
    pub subscription_ids: Vec<SubscriptionId>,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub state: EntitlementState,
    pub violations: Vec<InvariantViolation>,
}

/// Recompute entitlement from the user's subscriptions. Picks the active one
/// with the most privileged member type, then the most recent start, then
/// the greatest id, so the winner is deterministic even when the
/// single-active invariant has been broken.
pub fn select(user_id: Uuid, candidates: &[Candidate], now: DateTime<Utc>) -> Selection {
    let active: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| effective_status(c.status, c.expires_at, now) == SubscriptionStatus::Active)
        .collect();

    let mut violations: Vec<InvariantViolation> = Vec::new();
    for c in &active {
        let same_type: Vec<SubscriptionId> = active
            .iter()
            .filter(|o| o.member_type_id == c.member_type_id)
            .map(|o| o.subscription_id.clone())
            .collect();
        let already = violations.iter().any(|v| v.member_type_id == c.member_type_id);
        if same_type.len() > 1 && !already {
            violations.push(InvariantViolation {
                member_type_id: c.member_type_id,
                subscription_ids: same_type,
            });
        }
    }

    let winner = active.into_iter().max_by(|a, b| {
        a.privilege
            .cmp(&b.privilege)
            .then(a.started_at.cmp(&b.started_at))
            .then(a.subscription_id.as_str().cmp(b.subscription_id.as_str()))
    });

    let state = match winner {
        Some(c) => EntitlementState {
            user_id,
            member_type_id: Some(c.member_type_id),
            subscription_id: Some(c.subscription_id.clone()),
        },
        None => EntitlementState::baseline(user_id),
    };

    Selection { state, violations }
}
