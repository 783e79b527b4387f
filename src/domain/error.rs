use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store call exceeded {0:?}")]
    StoreTimeout(std::time::Duration),

    #[error("gateway: {0}")]
    Gateway(String),

    #[error("gateway: payment not found")]
    GatewayNotFound,

    #[error("crypto: {0}")]
    Crypto(String),
}

impl PipelineError {
    /// Errors the gateway may safely retry: nothing was committed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::StoreTimeout(_) => true,
            Self::Database(err) => matches!(
                err,
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::WorkerCrashed
            ) || is_retryable_sqlstate(err),
            _ => false,
        }
    }
}

// 55P03 lock_not_available (lock_timeout fired), 40P01 deadlock_detected,
// 40001 serialization_failure. Postgres rolled the transaction back.
fn is_retryable_sqlstate(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| matches!(&*code, "55P03" | "40P01" | "40001"))
}
