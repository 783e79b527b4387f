use {
    super::error::PipelineError,
    derive_more::Display,
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

/// Gateway payment identifier (`pay_xxx`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(String);

impl PaymentId {
    pub fn new(id: impl Into<String>) -> Result<Self, PipelineError> {
        let id = id.into();
        if !id.starts_with("pay_") || id.len() <= 4 {
            return Err(PipelineError::Validation(format!(
                "PaymentId must start with pay_, got: {id}"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn lock_key(&self) -> String {
        format!("payment:{}", self.0)
    }
}

/// Subscription identifier: the gateway id (`sub_xxx`) when the subscription
/// was born at the gateway, otherwise a locally minted `loc_<uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new(id: impl Into<String>) -> Result<Self, PipelineError> {
        let id = id.into();
        let valid = (id.starts_with("sub_") || id.starts_with("loc_")) && id.len() > 4;
        if !valid {
            return Err(PipelineError::Validation(format!(
                "SubscriptionId must start with sub_ or loc_, got: {id}"
            )));
        }
        Ok(Self(id))
    }

    pub fn mint_local() -> Self {
        Self(format!("loc_{}", Uuid::now_v7().simple()))
    }

    pub fn from_gateway(id: &GatewaySubscriptionId) -> Self {
        Self(id.as_str().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_local(&self) -> bool {
        self.0.starts_with("loc_")
    }
}

/// Subscription identifier assigned by the gateway (`sub_xxx`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewaySubscriptionId(String);

impl GatewaySubscriptionId {
    pub fn new(id: impl Into<String>) -> Result<Self, PipelineError> {
        let id = id.into();
        if !id.starts_with("sub_") || id.len() <= 4 {
            return Err(PipelineError::Validation(format!(
                "GatewaySubscriptionId must start with sub_, got: {id}"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn lock_key(&self) -> String {
        format!("subscription:{}", self.0)
    }
}

/// Gateway event identifier (`evt_xxx`). Optional on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Result<Self, PipelineError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(PipelineError::Validation("EventId must not be empty".into()));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub fn user_lock_key(user_id: Uuid) -> String {
    format!("user:{user_id}")
}
