use {
    super::{entitlement::reconcile_in_tx, subscription},
    crate::domain::{
        audit::{AuditContext, action},
        entitlement::EntitlementState,
        error::PipelineError,
        event::{EventSubject, EventType, InboundEvent, PaymentFacts, ProcessResult,
            SubscriptionFacts},
        id::{PaymentId, SubscriptionId, user_lock_key},
        payment::{self, NewPayment, PaymentAction, PaymentRecord, PaymentStatus},
        subscription::{
            NewSubscription, RefundPolicy, SubscriptionAction, SubscriptionRecord,
            SubscriptionStatus, reason,
        },
    },
    crate::infra::{
        crypto::SecretSealer,
        postgres::{
            audit_repo::insert_audit_entry, entitlement_repo, ledger_repo, locks, payment_repo,
            subscription_repo,
        },
    },
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    std::{future::Future, sync::Arc, time::Duration},
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerSettings {
    pub refund_policy: RefundPolicy,
    /// Bound on one transactional store call, locks and commit included.
    pub store_timeout: Duration,
    /// Postgres `lock_timeout` for every transaction.
    pub lock_timeout: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            refund_policy: RefundPolicy::default(),
            store_timeout: Duration::from_secs(5),
            lock_timeout: Duration::from_secs(3),
        }
    }
}

/// Applies normalized gateway events and membership operations to the store.
///
/// Every public operation is one transaction bounded by `store_timeout`.
/// Locks are always taken entity first (`payment:` / `subscription:`), then
/// `user:`, then subscription rows, so two operations never wait on each
/// other in opposite order.
#[derive(Clone)]
pub struct Reconciler {
    pool: PgPool,
    sealer: Arc<SecretSealer>,
    settings: ReconcilerSettings,
}

impl Reconciler {
    pub fn new(pool: PgPool, sealer: Arc<SecretSealer>, settings: ReconcilerSettings) -> Self {
        Self {
            pool,
            sealer,
            settings,
        }
    }

    /// Dropping the future on timeout drops the open transaction, which
    /// rolls it back.
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, PipelineError>>,
    ) -> Result<T, PipelineError> {
        match tokio::time::timeout(self.settings.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::StoreTimeout(self.settings.store_timeout)),
        }
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, PipelineError> {
        let mut tx = self.pool.begin().await?;
        locks::set_lock_timeout(&mut tx, self.settings.lock_timeout).await?;
        Ok(tx)
    }

    /// Ledger check, state merge, cascades and entitlement, all in one
    /// transaction.
    #[tracing::instrument(
        name = "reconcile",
        skip_all,
        fields(
            event_type = %event.event_type,
            entity_id = %event.entity_id(),
            event_key = tracing::field::Empty,
        )
    )]
    pub async fn apply(
        &self,
        event: &InboundEvent,
        actor: &str,
    ) -> Result<ProcessResult, PipelineError> {
        self.bounded(async {
            match &event.subject {
                EventSubject::Payment(facts) => self.apply_payment(event, facts, actor).await,
                EventSubject::Subscription(facts) => {
                    self.apply_subscription(event, facts, actor).await
                }
            }
        })
        .await
    }

    async fn apply_payment(
        &self,
        event: &InboundEvent,
        facts: &PaymentFacts,
        actor: &str,
    ) -> Result<ProcessResult, PipelineError> {
        let command = event.event_type.payment_command().ok_or_else(|| {
            PipelineError::Malformed(format!("{} is not a payment event", event.event_type))
        })?;

        let mut tx = self.begin().await?;
        locks::lock(&mut tx, &facts.id.lock_key()).await?;

        let existing = payment_repo::find(&mut *tx, &facts.id).await?;
        let key = event.idempotency_key(existing.as_ref().map_or(0, |p| p.version));
        tracing::Span::current().record("event_key", key.as_str());

        let recorded = ledger_repo::record(&mut tx, &key, event).await?;
        if !recorded {
            tx.commit().await?;
            tracing::info!("duplicate event, already applied");
            return Ok(ProcessResult::Duplicate);
        }

        let ctx = AuditContext::new(actor).with_event_key(key.as_str());
        let link = resolve_payment_link(&mut tx, existing.as_ref(), facts).await?;
        let sealed_token = facts
            .card_token
            .as_ref()
            .map(|token| self.sealer.seal(token))
            .transpose()?;

        let decision = payment::decide(
            existing.as_ref().map(PaymentRecord::state),
            command,
            facts.declared_status,
        );

        let result = match decision {
            PaymentAction::Create { status } => {
                let new = NewPayment {
                    id: facts.id.clone(),
                    user_id: link.as_ref().map(|s| s.user_id),
                    subscription_id: link.as_ref().map(|s| s.id.clone()),
                    money: facts.money.clone(),
                    method: facts.method,
                    status,
                    // A payment first seen as deleted still needs somewhere
                    // to be restored to.
                    status_before_delete: (status == PaymentStatus::Deleted)
                        .then(|| facts.declared_status.unwrap_or(PaymentStatus::Created)),
                    card_token_sealed: sealed_token.clone(),
                    last_event_type: event.event_type.to_string(),
                };
                payment_repo::insert(&mut tx, &new).await?;
                tracing::info!(payment_id = %facts.id, %status, "payment created");

                let audit = ctx.entry(
                    "payment",
                    facts.id.as_str(),
                    action::CREATED,
                    serde_json::json!({
                        "status": status,
                        "amount": facts.money.amount().cents(),
                        "currency": facts.money.currency(),
                        "method": facts.method,
                        "subscription_id": new.subscription_id,
                    }),
                );
                insert_audit_entry(&mut tx, &audit).await?;

                self.cascade(&mut tx, &facts.id, status, link.as_ref(), &ctx)
                    .await?;
                ProcessResult::Created(facts.id.to_string())
            }
            PaymentAction::Advance { from, to, shadow } => {
                payment_repo::update_status(
                    &mut tx,
                    &facts.id,
                    to,
                    shadow,
                    &event.event_type.to_string(),
                )
                .await?;
                tracing::info!(payment_id = %facts.id, %from, %to, "payment status changed");

                let audit = ctx.entry(
                    "payment",
                    facts.id.as_str(),
                    action::STATUS_CHANGED,
                    serde_json::json!({ "from": from, "to": to }),
                );
                insert_audit_entry(&mut tx, &audit).await?;

                self.cascade(&mut tx, &facts.id, to, link.as_ref(), &ctx)
                    .await?;
                ProcessResult::Updated(facts.id.to_string())
            }
            PaymentAction::SameStatus => ProcessResult::Unchanged(facts.id.to_string()),
            PaymentAction::OutOfOrder { current, incoming } => {
                tracing::info!(
                    payment_id = %facts.id,
                    %current,
                    %incoming,
                    "late payment event, status kept"
                );
                let audit = ctx.entry(
                    "payment",
                    facts.id.as_str(),
                    action::EVENT_RECEIVED,
                    serde_json::json!({
                        "stale": true,
                        "current": current,
                        "incoming": incoming,
                        "event_type": event.event_type.to_string(),
                    }),
                );
                insert_audit_entry(&mut tx, &audit).await?;
                ProcessResult::OutOfOrder(facts.id.to_string())
            }
            PaymentAction::Rejected { current, incoming } => {
                tracing::warn!(
                    payment_id = %facts.id,
                    %current,
                    %incoming,
                    "payment transition not allowed"
                );
                let audit = ctx.entry(
                    "payment",
                    facts.id.as_str(),
                    action::EVENT_RECEIVED,
                    serde_json::json!({
                        "anomaly": true,
                        "current": current,
                        "incoming": incoming,
                        "event_type": event.event_type.to_string(),
                    }),
                );
                insert_audit_entry(&mut tx, &audit).await?;
                ProcessResult::Anomaly(facts.id.to_string())
            }
        };

        if existing.is_some() {
            if let Some(sub) = &link {
                payment_repo::link_subscription(&mut tx, &facts.id, &sub.id, sub.user_id).await?;
            }
            if let Some(sealed) = &sealed_token {
                payment_repo::attach_card_token(&mut tx, &facts.id, sealed).await?;
            }
        }

        ledger_repo::set_outcome(&mut tx, &key, result.as_str()).await?;
        tx.commit().await?;
        Ok(result)
    }

    /// Subscription side effects of a payment reaching `to`.
    async fn cascade(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        payment_id: &PaymentId,
        to: PaymentStatus,
        link: Option<&SubscriptionRecord>,
        ctx: &AuditContext,
    ) -> Result<(), PipelineError> {
        let Some(linked) = link else {
            return Ok(());
        };
        let activates = to.is_funded();
        let cancels = to == PaymentStatus::Refunded
            && self.settings.refund_policy == RefundPolicy::CancelSubscription;
        if !activates && !cancels {
            return Ok(());
        }

        locks::lock(tx, &user_lock_key(linked.user_id)).await?;
        let Some(sub) = subscription_repo::find_for_update(tx, &linked.id).await? else {
            return Ok(());
        };
        let status = sub.effective_status(ctx.now);

        if activates {
            match status {
                // First payment of a plan activates it. Renewals of an
                // already active subscription change nothing here.
                SubscriptionStatus::Pending => {
                    subscription::transition_in_tx(
                        tx,
                        &sub.id,
                        SubscriptionStatus::Active,
                        None,
                        Some(payment_id),
                        ctx,
                    )
                    .await?;
                }
                SubscriptionStatus::Active => {}
                SubscriptionStatus::Cancelled | SubscriptionStatus::Expired => {
                    tracing::warn!(
                        %payment_id,
                        subscription_id = %sub.id,
                        %status,
                        "payment funded for a subscription that already ended"
                    );
                    if sub.is_lapsed(ctx.now) {
                        reconcile_in_tx(tx, sub.user_id, ctx).await?;
                    }
                }
            }
        } else if status == SubscriptionStatus::Active
            && sub.activated_by_payment_id.as_ref() == Some(payment_id)
        {
            subscription::transition_in_tx(
                tx,
                &sub.id,
                SubscriptionStatus::Cancelled,
                Some(reason::REFUNDED),
                None,
                ctx,
            )
            .await?;
        } else {
            tracing::info!(
                %payment_id,
                subscription_id = %sub.id,
                "refund leaves subscription untouched"
            );
        }

        Ok(())
    }

    async fn apply_subscription(
        &self,
        event: &InboundEvent,
        facts: &SubscriptionFacts,
        actor: &str,
    ) -> Result<ProcessResult, PipelineError> {
        let mut tx = self.begin().await?;
        locks::lock(&mut tx, &facts.gateway_id.lock_key()).await?;

        let Some(found) = resolve_subscription(&mut tx, facts).await? else {
            let key = event.idempotency_key(0);
            tracing::Span::current().record("event_key", key.as_str());
            let recorded = ledger_repo::record(&mut tx, &key, event).await?;
            if !recorded {
                tx.commit().await?;
                return Ok(ProcessResult::Duplicate);
            }
            tracing::info!(
                gateway_subscription_id = %facts.gateway_id,
                "subscription event for a subscription we never opened"
            );
            let result = ProcessResult::Unlinked(facts.gateway_id.to_string());
            ledger_repo::set_outcome(&mut tx, &key, result.as_str()).await?;
            tx.commit().await?;
            return Ok(result);
        };

        locks::lock(&mut tx, &user_lock_key(found.user_id)).await?;
        let record = subscription_repo::find_for_update(&mut tx, &found.id)
            .await?
            .ok_or_else(|| PipelineError::Validation(format!("subscription {} vanished", found.id)))?;

        let key = event.idempotency_key(record.version);
        tracing::Span::current().record("event_key", key.as_str());
        let recorded = ledger_repo::record(&mut tx, &key, event).await?;
        if !recorded {
            tx.commit().await?;
            tracing::info!("duplicate event, already applied");
            return Ok(ProcessResult::Duplicate);
        }

        if record.gateway_subscription_id.is_none() {
            subscription_repo::link_gateway_id(&mut tx, &record.id, &facts.gateway_id).await?;
        }

        let ctx = AuditContext::new(actor).with_event_key(key.as_str());
        let (target, status_reason) = match event.event_type {
            EventType::SubscriptionCreated => (Some(SubscriptionStatus::Pending), None),
            EventType::SubscriptionUpdated => match facts.declared_status {
                Some(SubscriptionStatus::Active) => (Some(SubscriptionStatus::Active), None),
                Some(SubscriptionStatus::Expired) => {
                    (Some(SubscriptionStatus::Expired), Some(reason::EXPIRED))
                }
                Some(SubscriptionStatus::Cancelled) => {
                    (Some(SubscriptionStatus::Cancelled), Some(reason::GATEWAY_INACTIVE))
                }
                Some(SubscriptionStatus::Pending) | None => (None, None),
            },
            EventType::SubscriptionDeleted => {
                (Some(SubscriptionStatus::Cancelled), Some(reason::GATEWAY_DELETED))
            }
            other => {
                return Err(PipelineError::Malformed(format!(
                    "{other} is not a subscription event"
                )));
            }
        };

        let id = record.id.to_string();
        let result = match target {
            None => ProcessResult::Unchanged(id),
            Some(target) => {
                match subscription::transition_in_tx(
                    &mut tx,
                    &record.id,
                    target,
                    status_reason,
                    None,
                    &ctx,
                )
                .await?
                {
                    SubscriptionAction::Advance { .. } => ProcessResult::Updated(id),
                    SubscriptionAction::SameStatus => ProcessResult::Unchanged(id),
                    SubscriptionAction::OutOfOrder { .. } => ProcessResult::OutOfOrder(id),
                    SubscriptionAction::Rejected { .. } => ProcessResult::Anomaly(id),
                }
            }
        };

        ledger_repo::set_outcome(&mut tx, &key, result.as_str()).await?;
        tx.commit().await?;
        Ok(result)
    }

    /// Create a pending subscription at checkout.
    pub async fn open_checkout(
        &self,
        new: &NewSubscription,
        actor: &str,
    ) -> Result<SubscriptionRecord, PipelineError> {
        self.bounded(async {
            let mut tx = self.begin().await?;
            if let Some(gateway_id) = &new.gateway_subscription_id {
                locks::lock(&mut tx, &gateway_id.lock_key()).await?;
            }
            locks::lock(&mut tx, &user_lock_key(new.user_id)).await?;

            let ctx = AuditContext::new(actor);
            let id = subscription::open_in_tx(&mut tx, new, &ctx).await?;
            let record = subscription_repo::find(&mut *tx, &id).await?;
            tx.commit().await?;
            record.ok_or_else(|| PipelineError::Validation(format!("subscription {id} not found")))
        })
        .await
    }

    /// Grant a gateway-less membership, active right away.
    pub async fn grant_manual(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        member_type_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
        actor: &str,
    ) -> Result<SubscriptionRecord, PipelineError> {
        self.bounded(async {
            let mut tx = self.begin().await?;
            locks::lock(&mut tx, &user_lock_key(user_id)).await?;

            let ctx = AuditContext::new(actor);
            let new = NewSubscription {
                user_id,
                plan_id,
                member_type_id,
                gateway_subscription_id: None,
                expires_at,
            };
            let id = subscription::open_in_tx(&mut tx, &new, &ctx).await?;
            subscription::transition_in_tx(
                &mut tx,
                &id,
                SubscriptionStatus::Active,
                None,
                None,
                &ctx,
            )
            .await?;

            let record = subscription_repo::find(&mut *tx, &id).await?;
            tx.commit().await?;
            record.ok_or_else(|| PipelineError::Validation(format!("subscription {id} not found")))
        })
        .await
    }

    /// Lazy read path: materializes expiry and recomputes entitlement under
    /// the user lock.
    pub async fn current_entitlement(
        &self,
        user_id: Uuid,
        actor: &str,
    ) -> Result<EntitlementState, PipelineError> {
        self.bounded(async {
            let mut tx = self.begin().await?;
            locks::lock(&mut tx, &user_lock_key(user_id)).await?;
            let state = reconcile_in_tx(&mut tx, user_id, &AuditContext::new(actor)).await?;
            tx.commit().await?;
            Ok(state)
        })
        .await
    }

    /// Stored entitlement without recomputation.
    pub async fn stored_entitlement(&self, user_id: Uuid) -> Result<EntitlementState, PipelineError> {
        self.bounded(entitlement_repo::get(&self.pool, user_id)).await
    }

    /// Subscription with its effective status: a live subscription past its
    /// expiry reads as `expired` even before anything is written.
    pub async fn get_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Option<SubscriptionRecord>, PipelineError> {
        let record = self.bounded(subscription_repo::find(&self.pool, id)).await?;
        let now = Utc::now();
        Ok(record.map(|mut r| {
            r.status = r.effective_status(now);
            r
        }))
    }

    pub async fn get_payment(&self, id: &PaymentId) -> Result<Option<PaymentRecord>, PipelineError> {
        self.bounded(payment_repo::find(&self.pool, id)).await
    }

    /// Materialize expiry for up to `limit` users with lapsed subscriptions.
    /// Returns how many users were reconciled.
    pub async fn sweep_expired(&self, limit: i64, actor: &str) -> Result<usize, PipelineError> {
        let users = self
            .bounded(subscription_repo::users_with_lapsed(&self.pool, Utc::now(), limit))
            .await?;
        for user_id in &users {
            self.current_entitlement(*user_id, actor).await?;
        }
        Ok(users.len())
    }

    /// Drop ledger rows older than `retention`.
    pub async fn prune_ledger(&self, retention: chrono::Duration) -> Result<u64, PipelineError> {
        self.bounded(ledger_repo::prune(&self.pool, Utc::now() - retention))
            .await
    }
}

/// Subscription a payment belongs to: the stored link first, then the
/// gateway subscription id, then our own id carried as external reference.
async fn resolve_payment_link(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    existing: Option<&PaymentRecord>,
    facts: &PaymentFacts,
) -> Result<Option<SubscriptionRecord>, PipelineError> {
    if let Some(id) = existing.and_then(|p| p.subscription_id.as_ref()) {
        if let Some(found) = subscription_repo::find(&mut **tx, id).await? {
            return Ok(Some(found));
        }
    }

    if let Some(gateway_id) = &facts.gateway_subscription_id {
        if let Some(found) = subscription_repo::find_by_gateway_id(&mut **tx, gateway_id).await? {
            return Ok(Some(found));
        }
    }

    let Some(id) = facts
        .external_reference
        .as_deref()
        .and_then(|r| SubscriptionId::new(r).ok())
    else {
        return Ok(None);
    };
    let Some(mut found) = subscription_repo::find(&mut **tx, &id).await? else {
        return Ok(None);
    };

    // Subscription rows are only written under the owner's user lock.
    if found.gateway_subscription_id.is_none() && facts.gateway_subscription_id.is_some() {
        locks::lock(tx, &user_lock_key(found.user_id)).await?;
        match subscription_repo::find_for_update(tx, &id).await? {
            Some(fresh) => found = fresh,
            None => return Ok(None),
        }
    }

    match (&found.gateway_subscription_id, &facts.gateway_subscription_id) {
        (Some(ours), Some(theirs)) if ours != theirs => {
            tracing::warn!(
                subscription_id = %found.id,
                expected = %ours,
                got = %theirs,
                "external reference points at a subscription linked elsewhere"
            );
            Ok(None)
        }
        (None, Some(theirs)) => {
            subscription_repo::link_gateway_id(tx, &found.id, theirs).await?;
            Ok(Some(found))
        }
        _ => Ok(Some(found)),
    }
}

/// Local subscription a subscription event is about: by gateway id, then by
/// our own id carried as external reference (only if not linked elsewhere;
/// a concurrent payment may have just linked it to this same gateway id).
async fn resolve_subscription(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    facts: &SubscriptionFacts,
) -> Result<Option<SubscriptionRecord>, PipelineError> {
    if let Some(found) = subscription_repo::find_by_gateway_id(&mut **tx, &facts.gateway_id).await? {
        return Ok(Some(found));
    }

    let Some(id) = facts
        .external_reference
        .as_deref()
        .and_then(|r| SubscriptionId::new(r).ok())
    else {
        return Ok(None);
    };

    Ok(subscription_repo::find(&mut **tx, &id)
        .await?
        .filter(|found| {
            found
                .gateway_subscription_id
                .as_ref()
                .is_none_or(|linked| linked == &facts.gateway_id)
        }))
}
