// x402 Errors

use thiserror::Error;

pub type X402Result<T> = Result<T, X402Error>;

/// Errors raised while requiring, verifying, settling or signing x402 payments.
#[derive(Debug, Error)]
pub enum X402Error {
    #[error("X-PAYMENT header is required")]
    PaymentMissing,

    #[error("malformed payment payload: {reason}")]
    MalformedPayload { reason: String },

    #[error("unsupported payment scheme: {scheme}")]
    UnsupportedScheme { scheme: String },

    #[error("unsupported network: {network}")]
    UnsupportedNetwork { network: String },

    #[error("insufficient payment: required {required}, received {received}")]
    InsufficientPayment { required: u64, received: u64 },

    #[error("payment addressed to {actual}, expected {expected}")]
    WrongRecipient { expected: String, actual: String },

    #[error("payment authorization expired at {expired_at}")]
    PaymentExpired { expired_at: u64 },

    #[error("facilitator verification failed: {reason}")]
    VerificationFailed { reason: String },

    #[error("facilitator settlement failed: {reason}")]
    SettlementFailed { reason: String },

    #[error("facilitator communication error: {0}")]
    FacilitatorNetwork(String),

    #[error("invalid price '{price}': {reason}")]
    InvalidPrice { price: String, reason: String },

    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

impl X402Error {
    /// HTTP status code for this error when surfaced by the payment gate.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::PaymentMissing
            | Self::MalformedPayload { .. }
            | Self::UnsupportedScheme { .. }
            | Self::UnsupportedNetwork { .. }
            | Self::InsufficientPayment { .. }
            | Self::WrongRecipient { .. }
            | Self::PaymentExpired { .. }
            | Self::VerificationFailed { .. }
            | Self::SettlementFailed { .. } => 402,
            Self::FacilitatorNetwork(_) => 502,
            Self::InvalidPrice { .. }
            | Self::InvalidKey(_)
            | Self::Signing(_) => 500,
        }
    }
}

impl From<reqwest::Error> for X402Error {
    fn from(e: reqwest::Error) -> Self {
        Self::FacilitatorNetwork(e.to_string())
    }
}
