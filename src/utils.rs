//! Utility functions shared across the pipeline.
//!
//! Header codecs, address/amount parsing, hex byte handling, timestamps,
//! network aliasing, and proof content hashing.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ethers::types::{Address, H256, U256};
use sha3::{Digest, Keccak256};
use std::str::FromStr;

use crate::errors::{PaymentError, Result};
use crate::types::{PaymentPayload, SettlementReceipt};

/// Encodes a PaymentPayload as Base64 JSON for the X-PAYMENT header.
///
/// # Examples
///
/// ```
/// use x402_credit::types::PaymentPayload;
/// use x402_credit::utils::encode_payment_header;
/// use serde_json::json;
///
/// let payload = PaymentPayload {
///     x402_version: 1,
///     scheme: "swap".to_string(),
///     network: "8453".to_string(),
///     payload: json!({"txHash": "0xabc"}),
/// };
///
/// let encoded = encode_payment_header(&payload).unwrap();
/// assert!(!encoded.is_empty());
/// ```
pub fn encode_payment_header(payload: &PaymentPayload) -> Result<String> {
    let json = serde_json::to_string(payload)?;
    Ok(BASE64.encode(json.as_bytes()))
}

/// Decodes a Base64 JSON PaymentPayload from the X-PAYMENT header.
///
/// # Examples
///
/// ```
/// use x402_credit::types::PaymentPayload;
/// use x402_credit::utils::{decode_payment_header, encode_payment_header};
/// use serde_json::json;
///
/// let payload = PaymentPayload {
///     x402_version: 1,
///     scheme: "swap".to_string(),
///     network: "8453".to_string(),
///     payload: json!({}),
/// };
///
/// let encoded = encode_payment_header(&payload).unwrap();
/// let decoded = decode_payment_header(&encoded).unwrap();
/// assert_eq!(decoded.scheme, "swap");
/// ```
pub fn decode_payment_header(encoded: &str) -> Result<PaymentPayload> {
    let decoded = BASE64.decode(encoded.as_bytes())?;
    let json_str = String::from_utf8(decoded)
        .map_err(|e| PaymentError::VerificationFailed(format!("invalid UTF-8 in header: {e}")))?;
    let payload: PaymentPayload = serde_json::from_str(&json_str)?;
    Ok(payload)
}

/// Encodes a SettlementReceipt as Base64 JSON for the X-PAYMENT-RESPONSE
/// header.
pub fn encode_receipt_header(receipt: &SettlementReceipt) -> Result<String> {
    let json = serde_json::to_string(receipt)?;
    Ok(BASE64.encode(json.as_bytes()))
}

/// Decodes a Base64 JSON SettlementReceipt from the X-PAYMENT-RESPONSE
/// header.
pub fn decode_receipt_header(encoded: &str) -> Result<SettlementReceipt> {
    let decoded = BASE64.decode(encoded.as_bytes())?;
    let json_str = String::from_utf8(decoded)
        .map_err(|e| PaymentError::VerificationFailed(format!("invalid UTF-8 in header: {e}")))?;
    let receipt: SettlementReceipt = serde_json::from_str(&json_str)?;
    Ok(receipt)
}

/// Validates and parses a 20-byte chain address.
///
/// # Examples
///
/// ```
/// use x402_credit::utils::parse_address;
///
/// assert!(parse_address("0x742d35Cc6634C0532925a3b844Bc9e7595f0bEbb").is_ok());
/// assert!(parse_address("not-an-address").is_err());
/// ```
pub fn parse_address(addr: &str) -> Result<Address> {
    Address::from_str(addr).map_err(|e| PaymentError::InvalidAddress(format!("{addr}: {e}")))
}

/// Parses a 32-byte transaction hash from its hex form.
pub fn parse_tx_hash(hash: &str) -> Result<H256> {
    H256::from_str(hash)
        .map_err(|e| PaymentError::VerificationFailed(format!("invalid transaction hash {hash}: {e}")))
}

/// Converts a string representation of a uint256 to U256.
///
/// Accepts decimal, or hex with a 0x prefix.
///
/// # Examples
///
/// ```
/// use x402_credit::utils::string_to_u256;
///
/// assert_eq!(string_to_u256("1000000").unwrap(), 1000000u64.into());
/// assert_eq!(string_to_u256("0x0f4240").unwrap(), 1000000u64.into());
/// ```
pub fn string_to_u256(s: &str) -> Result<U256> {
    if let Ok(value) = U256::from_dec_str(s) {
        return Ok(value);
    }

    if s.starts_with("0x") || s.starts_with("0X") {
        if let Ok(value) = U256::from_str(s) {
            return Ok(value);
        }
    }

    Err(PaymentError::InvalidAmount(format!(
        "cannot parse '{s}' as uint256"
    )))
}

/// Decodes a hex string (with or without 0x prefix) into bytes. An empty
/// string decodes to an empty vector.
pub fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let stripped = s.trim_start_matches("0x");
    hex::decode(stripped).map_err(|e| PaymentError::Encoding(format!("invalid hex bytes: {e}")))
}

/// Decodes a transfer id that must be exactly 16 bytes.
pub fn parse_id16(s: &str) -> Result<[u8; 16]> {
    let bytes = parse_hex_bytes(s)?;
    bytes.try_into().map_err(|_| {
        PaymentError::Encoding(format!("transfer id must be exactly 16 bytes: {s}"))
    })
}

/// Converts a dollar amount to the asset's smallest unit.
///
/// # Examples
///
/// ```
/// use x402_credit::utils::dollar_to_minor_units;
///
/// // $10 in a 6-decimal stablecoin
/// assert_eq!(dollar_to_minor_units(10.0, 6).unwrap(), "10000000");
/// ```
pub fn dollar_to_minor_units(dollar_amount: f64, decimals: u8) -> Result<String> {
    if dollar_amount < 0.0 || !dollar_amount.is_finite() {
        return Err(PaymentError::InvalidAmount(format!(
            "price must be a finite non-negative number, got {dollar_amount}"
        )));
    }

    let multiplier = 10f64.powi(decimals as i32);
    let smallest_unit = (dollar_amount * multiplier).round() as u128;

    Ok(smallest_unit.to_string())
}

/// Gets the current Unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Resolves a network identifier to its numeric chain id.
///
/// Known aliases are mapped; anything else must itself be a numeric chain id.
///
/// # Examples
///
/// ```
/// use x402_credit::utils::chain_id_for;
///
/// assert_eq!(chain_id_for("base").unwrap(), 8453);
/// assert_eq!(chain_id_for("8453").unwrap(), 8453);
/// assert!(chain_id_for("unknown-net").is_err());
/// ```
pub fn chain_id_for(network: &str) -> Result<u64> {
    match network {
        "base" | "base-mainnet" => Ok(8453),
        "base-sepolia" => Ok(84532),
        other => other
            .parse::<u64>()
            .map_err(|_| PaymentError::UnsupportedNetwork(other.to_string())),
    }
}

/// Generates a random 32-byte nonce for voucher replay protection.
pub fn generate_nonce() -> [u8; 32] {
    use rand::Rng;
    rand::thread_rng().gen()
}

/// Keccak-256 hash of a proof header's raw content.
///
/// Used as the idempotency key in the gateway's replay store: identical
/// proofs hash identically regardless of which route they are presented to.
pub fn proof_content_hash(header: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(header.as_bytes());
    hasher.finalize().into()
}
