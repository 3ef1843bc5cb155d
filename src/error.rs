use thiserror::Error;

/// Failures a `TradingClient` caller can see. Anything else is retried.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("all brokers are unavailable ({attempted} endpoints tried)")]
    AllBrokersUnavailable { attempted: usize },
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    OperationFailed { operation: &'static str, attempts: usize, last_error: String },
}

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
