use {
    crate::domain::subscription::RefundPolicy,
    secrecy::{ExposeSecret, SecretString},
    std::{net::SocketAddr, time::Duration},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Which gateway deployment outbound calls go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatewayEnvironment {
    #[default]
    Sandbox,
    Production,
}

impl GatewayEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            Self::Sandbox => "https://sandbox.asaas.com/api/v3",
            Self::Production => "https://api.asaas.com/v3",
        }
    }
}

/// Process configuration, loaded once at startup and passed down explicitly.
#[derive(Debug)]
pub struct AppConfig {
    pub database_url: SecretString,
    pub webhook_token: SecretString,
    pub api_key: SecretString,
    pub environment: GatewayEnvironment,
    pub gateway_base_url: String,
    pub field_encryption_key: SecretString,
    pub listen_addr: SocketAddr,
    pub request_deadline: Duration,
    pub store_timeout: Duration,
    pub lock_timeout: Duration,
    pub refund_policy: RefundPolicy,
    pub ledger_retention: chrono::Duration,
    /// `None` disables the background expiry sweep.
    pub expiry_sweep: Option<Duration>,
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let required = |key: &'static str| -> Result<SecretString, ConfigError> {
            get(key)
                .map(SecretString::from)
                .ok_or(ConfigError::MissingRequired(key))
        };

        let environment = match get("ASAAS_ENVIRONMENT").as_deref() {
            None | Some("sandbox") => GatewayEnvironment::Sandbox,
            Some("production") => GatewayEnvironment::Production,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "ASAAS_ENVIRONMENT",
                    reason: format!("expected sandbox or production, got {other}"),
                });
            }
        };

        let gateway_base_url = get("ASAAS_BASE_URL")
            .unwrap_or_else(|| environment.base_url().to_string())
            .trim_end_matches('/')
            .to_string();

        let listen_addr = match get("LISTEN_ADDR") {
            Some(raw) => raw.parse().map_err(|e| ConfigError::Invalid {
                key: "LISTEN_ADDR",
                reason: format!("{e}"),
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], 3000)),
        };

        let refund_policy = match get("REFUND_POLICY") {
            Some(raw) => RefundPolicy::try_from(raw.as_str()).map_err(|e| ConfigError::Invalid {
                key: "REFUND_POLICY",
                reason: e.to_string(),
            })?,
            None => RefundPolicy::default(),
        };

        let millis = |key: &'static str, default: u64| -> Result<Duration, ConfigError> {
            parse_number(get(key), key, default).map(Duration::from_millis)
        };

        let retention_days = parse_number(get("LEDGER_RETENTION_DAYS"), "LEDGER_RETENTION_DAYS", 30)?;
        let ledger_retention = i64::try_from(retention_days)
            .ok()
            .and_then(chrono::Duration::try_days)
            .ok_or(ConfigError::Invalid {
                key: "LEDGER_RETENTION_DAYS",
                reason: "out of range".into(),
            })?;
        let sweep_secs = parse_number(get("EXPIRY_SWEEP_SECS"), "EXPIRY_SWEEP_SECS", 300)?;

        let config = Self {
            database_url: required("DATABASE_URL")?,
            webhook_token: required("ASAAS_WEBHOOK_TOKEN")?,
            api_key: required("ASAAS_API_KEY")?,
            environment,
            gateway_base_url,
            field_encryption_key: required("FIELD_ENCRYPTION_KEY")?,
            listen_addr,
            request_deadline: millis("REQUEST_DEADLINE_MS", 10_000)?,
            store_timeout: millis("STORE_TIMEOUT_MS", 5_000)?,
            lock_timeout: millis("LOCK_TIMEOUT_MS", 3_000)?,
            refund_policy,
            ledger_retention,
            expiry_sweep: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.gateway_base_url.starts_with("https://")
            && !self.gateway_base_url.starts_with("http://")
        {
            return Err(ConfigError::Invalid {
                key: "ASAAS_BASE_URL",
                reason: "must be an http(s) URL".into(),
            });
        }
        if self.request_deadline.is_zero() {
            return Err(ConfigError::Invalid {
                key: "REQUEST_DEADLINE_MS",
                reason: "must be positive".into(),
            });
        }
        if self.store_timeout.is_zero() || self.store_timeout > self.request_deadline {
            return Err(ConfigError::Invalid {
                key: "STORE_TIMEOUT_MS",
                reason: "must be positive and not exceed REQUEST_DEADLINE_MS".into(),
            });
        }
        if self.lock_timeout.is_zero() || self.lock_timeout > self.store_timeout {
            return Err(ConfigError::Invalid {
                key: "LOCK_TIMEOUT_MS",
                reason: "must be positive and not exceed STORE_TIMEOUT_MS".into(),
            });
        }
        if self.ledger_retention < chrono::Duration::days(1) {
            return Err(ConfigError::Invalid {
                key: "LEDGER_RETENTION_DAYS",
                reason: "must be at least 1".into(),
            });
        }
        if self.field_encryption_key.expose_secret().len() < 16 {
            return Err(ConfigError::Invalid {
                key: "FIELD_ENCRYPTION_KEY",
                reason: "must be at least 16 characters".into(),
            });
        }
        Ok(())
    }
}

fn parse_number(raw: Option<String>, key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match raw {
        Some(raw) => raw.trim().parse().map_err(|e| ConfigError::Invalid {
            key,
            reason: format!("{e}"),
        }),
        None => Ok(default),
    }
}
