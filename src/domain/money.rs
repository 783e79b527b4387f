use {
    super::error::PipelineError,
    serde::{Deserialize, Serialize},
    std::fmt,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyAmount(i64);

impl MoneyAmount {
    pub fn new(cents: i64) -> Result<Self, PipelineError> {
        if cents < 0 {
            return Err(PipelineError::Validation(format!(
                "MoneyAmount cannot be negative, got: {cents}"
            )));
        }
        Ok(Self(cents))
    }

    /// Gateway amounts are decimal reais (`149.9`).
    pub fn from_decimal(value: f64) -> Result<Self, PipelineError> {
        if !value.is_finite() {
            return Err(PipelineError::Validation(format!(
                "amount is not a finite number: {value}"
            )));
        }
        let cents = (value * 100.0).round();
        if cents > i64::MAX as f64 {
            return Err(PipelineError::Validation(format!(
                "amount exceeds storage capacity: {value}"
            )));
        }
        Self::new(cents as i64)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Brl,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Brl => "brl",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Currency {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "brl" => Ok(Self::Brl),
            other => Err(PipelineError::Validation(format!(
                "unknown currency: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: MoneyAmount,
    currency: Currency,
}

impl Money {
    pub fn new(amount: MoneyAmount, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn amount(&self) -> MoneyAmount {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }
}

/// How the member pays. Unrecognised gateway values collapse to `Undefined`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingMethod {
    Pix,
    CreditCard,
    DebitCard,
    Boleto,
    Transfer,
    Deposit,
    Undefined,
}

impl BillingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pix => "pix",
            Self::CreditCard => "credit_card",
            Self::DebitCard => "debit_card",
            Self::Boleto => "boleto",
            Self::Transfer => "transfer",
            Self::Deposit => "deposit",
            Self::Undefined => "undefined",
        }
    }

    pub fn from_gateway(billing_type: Option<&str>) -> Self {
        match billing_type {
            Some("PIX") => Self::Pix,
            Some("CREDIT_CARD") => Self::CreditCard,
            Some("DEBIT_CARD") => Self::DebitCard,
            Some("BOLETO") => Self::Boleto,
            Some("TRANSFER") => Self::Transfer,
            Some("DEPOSIT") => Self::Deposit,
            _ => Self::Undefined,
        }
    }
}

impl TryFrom<&str> for BillingMethod {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "pix" => Ok(Self::Pix),
            "credit_card" => Ok(Self::CreditCard),
            "debit_card" => Ok(Self::DebitCard),
            "boleto" => Ok(Self::Boleto),
            "transfer" => Ok(Self::Transfer),
            "deposit" => Ok(Self::Deposit),
            "undefined" => Ok(Self::Undefined),
            other => Err(PipelineError::Validation(format!(
                "unknown billing method: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_reais_round_to_cents() {
        assert_eq!(MoneyAmount::from_decimal(149.9).unwrap().cents(), 14990);
        assert_eq!(MoneyAmount::from_decimal(0.1 + 0.2).unwrap().cents(), 30);
    }

    #[test]
    fn negative_and_non_finite_amounts_are_rejected() {
        assert!(MoneyAmount::from_decimal(-1.0).is_err());
        assert!(MoneyAmount::from_decimal(f64::NAN).is_err());
    }
}
