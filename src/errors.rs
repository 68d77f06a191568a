//! Error types for the payment pipeline.
//!
//! The taxonomy separates transient failures, which the balance monitor
//! retries with backoff, from structural failures, which abort the current
//! attempt and require changed input.

use std::time::Duration;
use thiserror::Error;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Error during HTTP request/response handling
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Error during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error during Base64 encoding/decoding
    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Error parsing a URL
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Malformed field in a settlement call, requirement, or proof
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The account service could not sign (unreachable or key unavailable)
    #[error("signing error: {0}")]
    Signing(String),

    /// No offered requirement survived the scheme/network/value filters
    #[error("no acceptable payment requirement")]
    NoAcceptableRequirement,

    /// The purchase attempt did not reach a terminal state in time
    #[error("negotiation timed out after {0:?}")]
    NegotiationTimeout(Duration),

    /// A proof with this content hash was already settled
    #[error("payment proof already settled: {0}")]
    ReplayRejected(String),

    /// Settlement was broadcast but not confirmed within the bounded wait
    #[error("settlement unconfirmed after {0:?}")]
    SettlementUnconfirmed(Duration),

    /// The resource refused the payment (second 402, scheme/network mismatch)
    #[error("payment rejected: {0}")]
    Rejected(String),

    /// Proof verification failed
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// Unsupported payment scheme
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// Unsupported network
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),

    /// Invalid address format
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid amount
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The external balance source could not be queried
    #[error("balance query failed: {0}")]
    BalanceQuery(String),

    /// Error during blockchain operations
    #[error("blockchain error: {0}")]
    Chain(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PaymentError>;

impl PaymentError {
    /// Whether a failed operation may be retried with backoff.
    ///
    /// Transient failures (network, signing service, unconfirmed settlement)
    /// are retryable. Structural failures (malformed fields, policy
    /// mismatches, replayed proofs) are not: retrying them without changed
    /// input would re-submit a doomed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::Http(_)
                | PaymentError::Signing(_)
                | PaymentError::NegotiationTimeout(_)
                | PaymentError::SettlementUnconfirmed(_)
                | PaymentError::BalanceQuery(_)
                | PaymentError::Chain(_)
        )
    }
}

impl From<ethers::providers::ProviderError> for PaymentError {
    fn from(err: ethers::providers::ProviderError) -> Self {
        PaymentError::Chain(err.to_string())
    }
}

impl From<ethers::signers::WalletError> for PaymentError {
    fn from(err: ethers::signers::WalletError) -> Self {
        PaymentError::Signing(err.to_string())
    }
}

impl From<ethers::core::types::SignatureError> for PaymentError {
    fn from(err: ethers::core::types::SignatureError) -> Self {
        PaymentError::VerificationFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PaymentError::Encoding("id must be 16 bytes".to_string());
        assert_eq!(err.to_string(), "encoding error: id must be 16 bytes");

        let err = PaymentError::NoAcceptableRequirement;
        assert_eq!(err.to_string(), "no acceptable payment requirement");
    }

    #[test]
    fn test_error_conversion() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: PaymentError = json_err.into();
        assert!(matches!(err, PaymentError::Json(_)));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(PaymentError::Signing("unreachable".into()).is_retryable());
        assert!(PaymentError::NegotiationTimeout(Duration::from_secs(30)).is_retryable());
        assert!(PaymentError::SettlementUnconfirmed(Duration::from_secs(30)).is_retryable());

        assert!(!PaymentError::Encoding("bad field".into()).is_retryable());
        assert!(!PaymentError::NoAcceptableRequirement.is_retryable());
        assert!(!PaymentError::ReplayRejected("0xabc".into()).is_retryable());
    }

    #[test]
    fn test_result_type() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }

        assert_eq!(returns_result().unwrap(), 42);
    }
}
