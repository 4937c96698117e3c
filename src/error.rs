use thiserror::Error;

/// Failures surfaced by the exchange gateway.
///
/// The engine treats every variant the same way at the call site: log it and
/// skip the transition for this cycle, leaving the state machine where it was.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),

    #[error("order rejected by exchange (code {code}): {message}")]
    OrderRejected { code: i64, message: String },

    #[error("no free balance for asset {0}")]
    InsufficientBalance(String),

    #[error("unexpected exchange response: {0}")]
    InvalidResponse(String),
}
