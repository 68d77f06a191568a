//! Core type definitions for the payment pipeline.
//!
//! Wire types follow the x402 v1 protocol shapes (camelCase field names on
//! the wire). Domain types cover the settlement intent carried in a
//! requirement's `extra` field, payment proofs, settlement receipts, and the
//! monitor-owned balance state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{PaymentError, Result};

/// Version of the x402 protocol.
pub const X402_VERSION: u32 = 1;

/// Request header carrying an encoded payment proof.
pub const PAYMENT_HEADER: &str = "X-PAYMENT";

/// Response header carrying encoded settlement metadata.
pub const RECEIPT_HEADER: &str = "X-PAYMENT-RESPONSE";

/// Response returned by a resource when payment is required (HTTP 402).
///
/// Contains the list of accepted payment requirements the client can choose
/// from.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentRequiredResponse {
    /// Protocol version (currently 1)
    #[serde(rename = "x402Version")]
    pub x402_version: u32,

    /// List of accepted payment requirements
    pub accepts: Vec<PaymentRequirement>,

    /// Optional error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A server-declared description of an acceptable payment for one resource.
///
/// Immutable once received; exactly one requirement is selected per purchase
/// attempt.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentRequirement {
    /// Payment scheme (e.g., "exact" for signed vouchers, "swap" for
    /// on-chain swap settlement)
    pub scheme: String,

    /// Network identifier (e.g., "8453" for Base mainnet)
    pub network: String,

    /// Amount required in the asset's smallest unit, as a string to handle
    /// uint256
    #[serde(rename = "maxAmountRequired")]
    pub max_amount_required: String,

    /// The resource URL or identifier
    pub resource: String,

    /// Human-readable description of what the payment is for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// MIME type of the resource
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// JSON schema describing the output format
    #[serde(rename = "outputSchema", skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,

    /// Recipient address
    #[serde(rename = "payTo")]
    pub pay_to: String,

    /// Maximum time in seconds that the payment is valid
    #[serde(rename = "maxTimeoutSeconds")]
    pub max_timeout_seconds: u64,

    /// Asset identity (token contract address)
    pub asset: String,

    /// Scheme-specific extra data. For "swap" this is a [`SwapIntent`]; for
    /// "exact" it carries the token's EIP-712 name and version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

impl PaymentRequirement {
    /// Parses the `extra` field as the operator-signed settlement intent
    /// required by the "swap" scheme.
    ///
    /// Fails with an encoding error when the metadata is absent or malformed,
    /// so bad input is rejected at the boundary instead of deep inside the
    /// call encoder.
    pub fn swap_intent(&self) -> Result<SwapIntent> {
        let extra = self.extra.clone().ok_or_else(|| {
            PaymentError::Encoding("requirement carries no settlement metadata".to_string())
        })?;
        serde_json::from_value(extra)
            .map_err(|e| PaymentError::Encoding(format!("malformed settlement metadata: {e}")))
    }
}

/// Operator-signed transfer intent carried in a requirement's `extra` field
/// for the "swap" scheme.
///
/// The intent pins everything the settlement contract needs beyond the
/// requirement itself: the contract to call, the operator fee, and the
/// operator's signature over the transfer.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SwapIntent {
    /// Settlement contract to call
    #[serde(rename = "contractAddress")]
    pub contract_address: String,

    /// Unix timestamp after which the chain rejects the settlement. Accepts
    /// either a number or an RFC 3339 string on the wire.
    #[serde(deserialize_with = "deserialize_deadline")]
    pub deadline: u64,

    /// Operator fee in the asset's smallest unit (uint256 as string)
    #[serde(rename = "feeAmount")]
    pub fee_amount: String,

    /// Where leftover native currency is returned. Defaults to the buyer
    /// address when absent.
    #[serde(
        rename = "refundDestination",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub refund_destination: Option<String>,

    /// Unique transfer id, exactly 16 bytes as hex
    pub id: String,

    /// Operator address
    pub operator: String,

    /// Operator signature over the transfer, hex bytes
    pub signature: String,

    /// Signature prefix, hex bytes, may be empty
    #[serde(default)]
    pub prefix: String,
}

fn deserialize_deadline<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Unix(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Unix(ts) => Ok(ts),
        Raw::Text(s) => chrono::DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.timestamp().max(0) as u64)
            .map_err(serde::de::Error::custom),
    }
}

/// Payment payload sent by the client in the X-PAYMENT header, Base64 JSON
/// encoded.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentPayload {
    /// Protocol version
    #[serde(rename = "x402Version")]
    pub x402_version: u32,

    /// Payment scheme used
    pub scheme: String,

    /// Network identifier
    pub network: String,

    /// Scheme-specific proof data: a [`TxHashProof`] for "swap", a
    /// [`TransferVoucher`] for "exact"
    pub payload: Value,
}

/// Proof that an on-chain settlement has already been broadcast.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TxHashProof {
    /// Hash of the broadcast settlement transaction
    #[serde(rename = "txHash")]
    pub tx_hash: String,
}

/// A signed off-chain voucher authorizing an exact transfer
/// (EIP-3009 `transferWithAuthorization` parameters).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TransferVoucher {
    /// Address of the payer (token holder)
    pub from: String,

    /// Address of the payee
    pub to: String,

    /// Amount to transfer (uint256 as string)
    pub value: String,

    /// Timestamp after which the voucher is valid
    #[serde(rename = "validAfter")]
    pub valid_after: String,

    /// Timestamp before which the voucher is valid
    #[serde(rename = "validBefore")]
    pub valid_before: String,

    /// Unique nonce for replay protection (32 bytes as hex string)
    pub nonce: String,

    /// EIP-712 signature (r, s, v concatenated as hex string)
    pub signature: String,
}

/// Settlement metadata returned in the X-PAYMENT-RESPONSE header after a
/// successful payment, so the caller can audit it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SettlementReceipt {
    /// Transaction hash of the settlement
    #[serde(rename = "txHash")]
    pub tx_hash: String,

    /// Timestamp of settlement (RFC 3339)
    #[serde(rename = "settledAt", skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<String>,

    /// Network the settlement landed on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

/// Balance state owned exclusively by the monitor loop.
///
/// Not persisted: on restart the monitor re-derives it from a fresh balance
/// query, so restart is always safe.
#[derive(Debug, Clone)]
pub struct BalanceState {
    /// Most recently observed balance
    pub current_balance: f64,

    /// Threshold below which a top-up is triggered
    pub low_watermark: f64,

    /// Amount purchased per top-up
    pub top_up_amount: f64,

    /// Unix timestamp of the last successful balance query
    pub last_checked_at: Option<u64>,
}

impl BalanceState {
    /// Creates a fresh state with no observed balance yet.
    pub fn new(low_watermark: f64, top_up_amount: f64) -> Self {
        Self {
            current_balance: 0.0,
            low_watermark,
            top_up_amount,
            last_checked_at: None,
        }
    }

    /// Whether the last observed balance calls for a top-up.
    pub fn needs_top_up(&self) -> bool {
        self.current_balance < self.low_watermark
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_requirement() -> PaymentRequirement {
        PaymentRequirement {
            scheme: "swap".to_string(),
            network: "8453".to_string(),
            max_amount_required: "10000000".to_string(),
            resource: "/topup/10".to_string(),
            description: Some("Credit top-up".to_string()),
            mime_type: Some("application/json".to_string()),
            output_schema: None,
            pay_to: "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEbb".to_string(),
            max_timeout_seconds: 300,
            asset: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string(),
            extra: Some(json!({
                "contractAddress": "0x03059433BCdB6144624cC2443159D9445C32b7a8",
                "deadline": 4102444800u64,
                "feeAmount": "30000",
                "id": "0x000102030405060708090a0b0c0d0e0f",
                "operator": "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEbb",
                "signature": "0xdeadbeef",
            })),
        }
    }

    #[test]
    fn test_payment_required_response_round_trip() {
        let response = PaymentRequiredResponse {
            x402_version: 1,
            accepts: vec![sample_requirement()],
            error: None,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("maxAmountRequired"));
        assert!(json.contains("payTo"));

        let deserialized: PaymentRequiredResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.x402_version, 1);
        assert_eq!(deserialized.accepts.len(), 1);
        assert_eq!(deserialized.accepts[0].scheme, "swap");
    }

    #[test]
    fn test_swap_intent_parsing() {
        let intent = sample_requirement().swap_intent().unwrap();
        assert_eq!(intent.deadline, 4102444800);
        assert_eq!(intent.fee_amount, "30000");
        assert!(intent.refund_destination.is_none());
        assert_eq!(intent.prefix, "");
    }

    #[test]
    fn test_swap_intent_missing_extra() {
        let mut requirement = sample_requirement();
        requirement.extra = None;
        assert!(matches!(
            requirement.swap_intent(),
            Err(PaymentError::Encoding(_))
        ));
    }

    #[test]
    fn test_swap_intent_iso_deadline() {
        let mut requirement = sample_requirement();
        if let Some(extra) = requirement.extra.as_mut() {
            extra["deadline"] = json!("2099-01-01T00:00:00Z");
        }
        let intent = requirement.swap_intent().unwrap();
        assert_eq!(intent.deadline, 4070908800);
    }

    #[test]
    fn test_voucher_serialization() {
        let voucher = TransferVoucher {
            from: "0xFrom".to_string(),
            to: "0xTo".to_string(),
            value: "1000000".to_string(),
            valid_after: "0".to_string(),
            valid_before: "9999999999".to_string(),
            nonce: "0x1234".to_string(),
            signature: "0xabcd".to_string(),
        };

        let json = serde_json::to_string(&voucher).unwrap();
        assert!(json.contains("validAfter"));
        assert!(json.contains("validBefore"));
    }

    #[test]
    fn test_balance_state() {
        let mut state = BalanceState::new(30.0, 10.0);
        assert!(state.needs_top_up());

        state.current_balance = 35.0;
        assert!(!state.needs_top_up());
    }
}
