use {
    crate::domain::{
        error::PipelineError,
        event::{EntityKind, EventSubject, EventType, InboundEvent, PaymentFacts, SubscriptionFacts},
        id::{EventId, GatewaySubscriptionId, PaymentId},
        money::{BillingMethod, Currency, Money, MoneyAmount},
        payment::PaymentStatus,
        subscription::SubscriptionStatus,
    },
    chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc},
    secrecy::SecretString,
    serde::Deserialize,
};

/// Gateway timestamps without an offset are Brasília time.
const GATEWAY_UTC_OFFSET_SECS: i32 = -3 * 3600;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    id: Option<String>,
    event: String,
    date_created: Option<String>,
    payment: Option<WirePayment>,
    subscription: Option<WireSubscription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePayment {
    id: String,
    subscription: Option<String>,
    value: Option<f64>,
    billing_type: Option<String>,
    status: Option<String>,
    external_reference: Option<String>,
    credit_card: Option<WireCreditCard>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCreditCard {
    credit_card_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSubscription {
    id: String,
    status: Option<String>,
    external_reference: Option<String>,
}

/// Parse one webhook body into the canonical event.
///
/// Anything we cannot act on, unknown event types included, comes back as
/// `PipelineError::Malformed`; the endpoint acknowledges and drops those.
pub fn normalize(body: &[u8]) -> Result<InboundEvent, PipelineError> {
    let raw: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| PipelineError::Malformed(format!("invalid json: {e}")))?;
    let wire: WireEvent = serde_json::from_value(raw.clone())
        .map_err(|e| PipelineError::Malformed(format!("unexpected shape: {e}")))?;

    let event_type: EventType = serde_json::from_value(serde_json::Value::String(wire.event.clone()))
        .map_err(|e| PipelineError::Malformed(format!("event type: {e}")))?;
    let Some(kind) = event_type.entity_kind() else {
        return Err(PipelineError::Malformed(format!(
            "unknown event type: {}",
            wire.event
        )));
    };

    let event_id = non_empty(wire.id).map(EventId::new).transpose().map_err(malformed)?;
    let occurred_at = wire
        .date_created
        .as_deref()
        .and_then(parse_gateway_timestamp)
        .unwrap_or_else(Utc::now);

    let subject = match kind {
        EntityKind::Payment => {
            let payment = wire.payment.ok_or_else(|| {
                PipelineError::Malformed(format!("{event_type} without payment object"))
            })?;
            EventSubject::Payment(payment_facts(payment)?)
        }
        EntityKind::Subscription => {
            EventSubject::Subscription(subscription_facts(event_type, wire.subscription, wire.payment)?)
        }
    };

    Ok(InboundEvent {
        event_id,
        event_type,
        occurred_at,
        subject,
        raw,
    })
}

fn payment_facts(payment: WirePayment) -> Result<PaymentFacts, PipelineError> {
    let id = PaymentId::new(payment.id).map_err(malformed)?;
    let value = payment
        .value
        .ok_or_else(|| PipelineError::Malformed(format!("payment {id} without value")))?;
    let amount = MoneyAmount::from_decimal(value).map_err(malformed)?;

    Ok(PaymentFacts {
        money: Money::new(amount, Currency::Brl),
        method: BillingMethod::from_gateway(payment.billing_type.as_deref()),
        declared_status: payment.status.as_deref().and_then(PaymentStatus::from_gateway),
        gateway_subscription_id: non_empty(payment.subscription)
            .map(GatewaySubscriptionId::new)
            .transpose()
            .map_err(malformed)?,
        external_reference: non_empty(payment.external_reference),
        card_token: payment
            .credit_card
            .and_then(|card| non_empty(card.credit_card_token))
            .map(SecretString::from),
        id,
    })
}

/// Subscription events normally carry a `subscription` object; some only
/// carry the payment that belongs to it.
fn subscription_facts(
    event_type: EventType,
    subscription: Option<WireSubscription>,
    payment: Option<WirePayment>,
) -> Result<SubscriptionFacts, PipelineError> {
    if let Some(sub) = subscription {
        return Ok(SubscriptionFacts {
            gateway_id: GatewaySubscriptionId::new(sub.id).map_err(malformed)?,
            declared_status: sub.status.as_deref().and_then(SubscriptionStatus::from_gateway),
            external_reference: non_empty(sub.external_reference),
        });
    }

    let payment = payment.ok_or_else(|| {
        PipelineError::Malformed(format!("{event_type} without subscription object"))
    })?;
    let gateway_id = non_empty(payment.subscription).ok_or_else(|| {
        PipelineError::Malformed(format!("{event_type} payment is not tied to a subscription"))
    })?;

    Ok(SubscriptionFacts {
        gateway_id: GatewaySubscriptionId::new(gateway_id).map_err(malformed)?,
        declared_status: None,
        external_reference: non_empty(payment.external_reference),
    })
}

fn parse_gateway_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return FixedOffset::east_opt(GATEWAY_UTC_OFFSET_SECS)?
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc));
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn malformed(err: PipelineError) -> PipelineError {
    match err {
        PipelineError::Validation(msg) => PipelineError::Malformed(msg),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use {super::*, secrecy::ExposeSecret, serde_json::json};

    fn body(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn payment_event_is_normalized() {
        let event = normalize(&body(json!({
            "id": "evt_1",
            "event": "PAYMENT_CONFIRMED",
            "dateCreated": "2024-05-01 10:00:00",
            "payment": {
                "id": "pay_1",
                "subscription": "sub_9",
                "value": 149.9,
                "billingType": "CREDIT_CARD",
                "status": "CONFIRMED",
                "externalReference": "loc_abc",
                "creditCard": { "creditCardToken": "tok_1" }
            }
        })))
        .unwrap();

        assert_eq!(event.event_type, EventType::PaymentConfirmed);
        assert_eq!(event.event_id.as_ref().unwrap().as_str(), "evt_1");
        assert_eq!(event.entity_id(), "pay_1");
        assert_eq!(event.occurred_at.to_rfc3339(), "2024-05-01T13:00:00+00:00");

        let EventSubject::Payment(p) = &event.subject else {
            panic!("expected payment subject");
        };
        assert_eq!(p.money.amount().cents(), 14990);
        assert_eq!(p.method, BillingMethod::CreditCard);
        assert_eq!(p.declared_status, Some(PaymentStatus::Confirmed));
        assert_eq!(p.gateway_subscription_id.as_ref().unwrap().as_str(), "sub_9");
        assert_eq!(p.external_reference.as_deref(), Some("loc_abc"));
        assert_eq!(p.card_token.as_ref().unwrap().expose_secret(), "tok_1");
    }

    #[test]
    fn unknown_event_type_is_malformed() {
        let err = normalize(&body(json!({
            "event": "PAYMENT_CHARGEBACK_REQUESTED",
            "payment": { "id": "pay_1", "value": 10.0 }
        })))
        .unwrap_err();
        assert!(matches!(err, PipelineError::Malformed(_)));
    }

    #[test]
    fn payment_without_value_or_with_negative_value_is_malformed() {
        for payment in [json!({ "id": "pay_1" }), json!({ "id": "pay_1", "value": -5 })] {
            let err = normalize(&body(json!({ "event": "PAYMENT_CREATED", "payment": payment })))
                .unwrap_err();
            assert!(matches!(err, PipelineError::Malformed(_)), "{err}");
        }
    }

    #[test]
    fn garbage_body_is_malformed() {
        assert!(matches!(normalize(b"not json"), Err(PipelineError::Malformed(_))));
        assert!(matches!(
            normalize(&body(json!({ "payment": {} }))),
            Err(PipelineError::Malformed(_))
        ));
    }

    #[test]
    fn subscription_event_falls_back_to_payment_subscription() {
        let event = normalize(&body(json!({
            "event": "SUBSCRIPTION_DELETED",
            "payment": { "id": "pay_1", "subscription": "sub_7", "value": 1, "externalReference": "loc_x" }
        })))
        .unwrap();
        let EventSubject::Subscription(s) = &event.subject else {
            panic!("expected subscription subject");
        };
        assert_eq!(s.gateway_id.as_str(), "sub_7");
        assert_eq!(s.external_reference.as_deref(), Some("loc_x"));
        assert!(event.event_id.is_none());
    }

    #[test]
    fn subscription_status_is_mapped() {
        let event = normalize(&body(json!({
            "event": "SUBSCRIPTION_UPDATED",
            "subscription": { "id": "sub_1", "status": "INACTIVE" }
        })))
        .unwrap();
        let EventSubject::Subscription(s) = &event.subject else {
            panic!("expected subscription subject");
        };
        assert_eq!(s.declared_status, Some(SubscriptionStatus::Cancelled));
    }

    #[test]
    fn rfc3339_timestamps_are_accepted() {
        let at = parse_gateway_timestamp("2024-05-01T10:00:00Z").unwrap();
        assert_eq!(at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        assert!(parse_gateway_timestamp("yesterday").is_none());
    }
}
