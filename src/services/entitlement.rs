use {
    crate::domain::audit::{AuditContext, action},
    crate::domain::entitlement::{EntitlementState, select},
    crate::domain::error::PipelineError,
    crate::infra::postgres::{audit_repo::insert_audit_entry, entitlement_repo, subscription_repo},
    uuid::Uuid,
};

/// Recompute the user's entitlement from their subscriptions and persist it.
///
/// Caller must hold the `user:<id>` lock. Lapsed subscriptions are
/// materialized as `expired` first, so the stored entitlement never points at
/// a subscription that is not active.
pub async fn reconcile_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    ctx: &AuditContext,
) -> Result<EntitlementState, PipelineError> {
    let expired = subscription_repo::expire_lapsed(tx, user_id, ctx.now).await?;
    for id in &expired {
        tracing::info!(subscription_id = %id, %user_id, "subscription expired");
        let audit = ctx.entry(
            "subscription",
            id.as_str(),
            action::EXPIRED,
            serde_json::json!({ "to": "expired", "reason": "expired" }),
        );
        insert_audit_entry(tx, &audit).await?;
    }

    let candidates = entitlement_repo::candidates(tx, user_id).await?;
    let selection = select(user_id, &candidates, ctx.now);

    for violation in &selection.violations {
        let ids: Vec<&str> = violation.subscription_ids.iter().map(|id| id.as_str()).collect();
        tracing::error!(
            target: "alert",
            %user_id,
            member_type_id = %violation.member_type_id,
            subscriptions = ?ids,
            "more than one active subscription for the same member type"
        );
        let audit = ctx.entry(
            "user",
            user_id.to_string(),
            action::INVARIANT_VIOLATION,
            serde_json::json!({
                "member_type_id": violation.member_type_id,
                "subscription_ids": ids,
                "winner": selection.state.subscription_id,
            }),
        );
        insert_audit_entry(tx, &audit).await?;
    }

    let previous = entitlement_repo::get(&mut **tx, user_id).await?;
    if previous != selection.state {
        entitlement_repo::upsert(tx, &selection.state).await?;
        tracing::info!(
            %user_id,
            member_type_id = ?selection.state.member_type_id,
            subscription_id = ?selection.state.subscription_id,
            "entitlement changed"
        );
        let audit = ctx.entry(
            "user",
            user_id.to_string(),
            action::ENTITLEMENT_CHANGED,
            serde_json::json!({
                "from": { "member_type_id": previous.member_type_id, "subscription_id": previous.subscription_id },
                "to": { "member_type_id": selection.state.member_type_id, "subscription_id": selection.state.subscription_id },
            }),
        );
        insert_audit_entry(tx, &audit).await?;
    }

    Ok(selection.state)
}
