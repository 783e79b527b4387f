use {
    super::entitlement::reconcile_in_tx,
    crate::domain::audit::{AuditContext, action},
    crate::domain::error::PipelineError,
    crate::domain::id::{PaymentId, SubscriptionId},
    crate::domain::subscription::{
        NewSubscription, SubscriptionAction, SubscriptionRecord, SubscriptionStatus, decide,
        reason,
    },
    crate::infra::postgres::{
        audit_repo::insert_audit_entry,
        subscription_repo::{self, InsertSubscription},
    },
};

/// Apply one subscription transition. Caller must hold the owner's
/// `user:<id>` lock.
///
/// Activation cancels every other active subscription of the same
/// (user, member type) as `superseded` before it flips this one, and any
/// mutation recomputes the user's entitlement before returning.
pub async fn transition_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: &SubscriptionId,
    target: SubscriptionStatus,
    status_reason: Option<&str>,
    activated_by: Option<&PaymentId>,
    ctx: &AuditContext,
) -> Result<SubscriptionAction, PipelineError> {
    let record = subscription_repo::find_for_update(tx, id)
        .await?
        .ok_or_else(|| PipelineError::Validation(format!("subscription {id} not found")))?;

    let lapsed = record.is_lapsed(ctx.now);
    let decision = decide(record.effective_status(ctx.now), target);

    match decision {
        SubscriptionAction::Advance { from, to } => {
            if to == SubscriptionStatus::Active {
                supersede_others(tx, &record, ctx).await?;
            }
            subscription_repo::update_status(tx, id, to, status_reason, activated_by).await?;
            tracing::info!(subscription_id = %id, %from, %to, "subscription status changed");
            let audit = ctx.entry(
                "subscription",
                id.as_str(),
                action::STATUS_CHANGED,
                serde_json::json!({
                    "from": from,
                    "to": to,
                    "reason": status_reason,
                    "activated_by": activated_by,
                }),
            );
            insert_audit_entry(tx, &audit).await?;
            reconcile_in_tx(tx, record.user_id, ctx).await?;
        }
        SubscriptionAction::SameStatus => {}
        SubscriptionAction::OutOfOrder { current, incoming } => {
            tracing::info!(subscription_id = %id, %current, %incoming, "late subscription event, status kept");
            let audit = ctx.entry(
                "subscription",
                id.as_str(),
                action::EVENT_RECEIVED,
                serde_json::json!({ "stale": true, "current": current, "incoming": incoming }),
            );
            insert_audit_entry(tx, &audit).await?;
        }
        SubscriptionAction::Rejected { current, incoming } => {
            tracing::warn!(subscription_id = %id, %current, %incoming, "subscription transition not allowed");
            let audit = ctx.entry(
                "subscription",
                id.as_str(),
                action::EVENT_RECEIVED,
                serde_json::json!({ "anomaly": true, "current": current, "incoming": incoming }),
            );
            insert_audit_entry(tx, &audit).await?;
        }
    }

    // Surface the expiry we evaluated on read even when nothing else changed.
    if lapsed && !matches!(decision, SubscriptionAction::Advance { .. }) {
        reconcile_in_tx(tx, record.user_id, ctx).await?;
    }

    Ok(decision)
}

async fn supersede_others(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    incoming: &SubscriptionRecord,
    ctx: &AuditContext,
) -> Result<(), PipelineError> {
    let others = subscription_repo::list_active_for_pair(
        tx,
        incoming.user_id,
        incoming.member_type_id,
        &incoming.id,
    )
    .await?;

    for other in others {
        subscription_repo::update_status(
            tx,
            &other.id,
            SubscriptionStatus::Cancelled,
            Some(reason::SUPERSEDED),
            None,
        )
        .await?;
        tracing::info!(
            subscription_id = %other.id,
            superseded_by = %incoming.id,
            "active subscription superseded"
        );
        let audit = ctx.entry(
            "subscription",
            other.id.as_str(),
            action::SUPERSEDED,
            serde_json::json!({
                "from": other.status,
                "to": SubscriptionStatus::Cancelled,
                "superseded_by": incoming.id,
            }),
        );
        insert_audit_entry(tx, &audit).await?;
    }

    Ok(())
}

/// Insert a pending subscription. Caller must hold the owner's user lock.
pub async fn open_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    new: &NewSubscription,
    ctx: &AuditContext,
) -> Result<SubscriptionId, PipelineError> {
    if let Some(gateway_id) = &new.gateway_subscription_id {
        if subscription_repo::find_by_gateway_id(&mut **tx, gateway_id)
            .await?
            .is_some()
        {
            return Err(PipelineError::Validation(format!(
                "subscription {gateway_id} already exists"
            )));
        }
    }

    let id = match &new.gateway_subscription_id {
        Some(gateway_id) => SubscriptionId::from_gateway(gateway_id),
        None => SubscriptionId::mint_local(),
    };

    subscription_repo::insert(
        tx,
        &InsertSubscription {
            id: &id,
            user_id: new.user_id,
            plan_id: new.plan_id,
            member_type_id: new.member_type_id,
            status: SubscriptionStatus::Pending,
            gateway_subscription_id: new.gateway_subscription_id.as_ref(),
            started_at: None,
            expires_at: new.expires_at,
        },
    )
    .await?;

    let audit = ctx.entry(
        "subscription",
        id.as_str(),
        action::CREATED,
        serde_json::json!({
            "status": SubscriptionStatus::Pending,
            "user_id": new.user_id,
            "plan_id": new.plan_id,
            "member_type_id": new.member_type_id,
            "gateway_subscription_id": new.gateway_subscription_id,
            "expires_at": new.expires_at,
        }),
    );
    insert_audit_entry(tx, &audit).await?;

    Ok(id)
}
