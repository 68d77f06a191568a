//! Binary encoding of the on-chain settlement call.
//!
//! The settlement contract exposes a single payable function that swaps
//! native currency into the required asset and forwards it to the payee:
//!
//! ```text
//! swapAndTransferUniswapV3Native(
//!     (uint256,uint256,address,address,address,uint256,bytes16,address,bytes,bytes) details,
//!     uint24 poolFeesTier,
//! )
//! ```
//!
//! Call data is `selector || abiEncode(details, poolFeesTier)` under standard
//! ABI rules: static members inline in 32-byte slots, dynamic byte fields as
//! offset plus length-prefixed data, the tuple itself as a head/tail
//! structure. An off-by-one in the offsets produces a transaction that the
//! encoder accepts and the chain reverts, which is why [`decode_swap_call`]
//! exists and round-trip coverage lives in this module's tests.

use ethers::abi::{decode, encode, ParamType, Token};
use ethers::core::utils::keccak256;
use ethers::types::{Address, U256};

use crate::errors::{PaymentError, Result};

/// Canonical signature of the settlement function. The selector is derived
/// from this string, never hard-coded.
pub const SETTLEMENT_FUNCTION_SIGNATURE: &str =
    "swapAndTransferUniswapV3Native((uint256,uint256,address,address,address,uint256,bytes16,address,bytes,bytes),uint24)";

/// Fee tiers the target pool supports, in hundredths of a basis point.
pub const VALID_FEE_TIERS: [u32; 4] = [100, 500, 3000, 10000];

/// The typed tuple passed to the on-chain settlement function.
///
/// Field validation happens while constructing this value (address parsing,
/// the 16-byte id); the encoder then only has to reject an out-of-range fee
/// tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementCall {
    /// Amount the payee must receive, in the asset's smallest unit
    pub recipient_amount: U256,

    /// Unix timestamp after which the chain rejects the call
    pub deadline: U256,

    /// Payee address
    pub recipient: Address,

    /// Asset the payee receives
    pub recipient_currency: Address,

    /// Where leftover native currency is returned
    pub refund_destination: Address,

    /// Operator fee, in the asset's smallest unit
    pub fee_amount: U256,

    /// Unique transfer id, exactly 16 bytes
    pub id: [u8; 16],

    /// Operator address
    pub operator: Address,

    /// Operator signature over the transfer, variable length
    pub signature: Vec<u8>,

    /// Signature prefix, variable length, may be empty
    pub prefix: Vec<u8>,
}

/// First 4 bytes of the keccak-256 hash of the canonical function signature.
pub fn function_selector() -> [u8; 4] {
    let hash = keccak256(SETTLEMENT_FUNCTION_SIGNATURE.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Encodes a settlement call into the exact call data a transaction carries.
///
/// Fails when the fee tier is not one of [`VALID_FEE_TIERS`].
pub fn encode_swap_call(call: &SettlementCall, fee_tier: u32) -> Result<Vec<u8>> {
    if !VALID_FEE_TIERS.contains(&fee_tier) {
        return Err(PaymentError::Encoding(format!(
            "fee tier {fee_tier} is not supported by the target pool"
        )));
    }

    let details = Token::Tuple(vec![
        Token::Uint(call.recipient_amount),
        Token::Uint(call.deadline),
        Token::Address(call.recipient),
        Token::Address(call.recipient_currency),
        Token::Address(call.refund_destination),
        Token::Uint(call.fee_amount),
        Token::FixedBytes(call.id.to_vec()),
        Token::Address(call.operator),
        Token::Bytes(call.signature.clone()),
        Token::Bytes(call.prefix.clone()),
    ]);

    let encoded = encode(&[details, Token::Uint(U256::from(fee_tier))]);

    let mut data = Vec::with_capacity(4 + encoded.len());
    data.extend_from_slice(&function_selector());
    data.extend_from_slice(&encoded);
    Ok(data)
}

fn call_param_types() -> [ParamType; 2] {
    [
        ParamType::Tuple(vec![
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Address,
            ParamType::Address,
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::FixedBytes(16),
            ParamType::Address,
            ParamType::Bytes,
            ParamType::Bytes,
        ]),
        ParamType::Uint(24),
    ]
}

/// Decodes settlement call data back into its typed form.
///
/// Used by the gateway to audit a broadcast transaction against the
/// requirement it is supposed to satisfy.
pub fn decode_swap_call(data: &[u8]) -> Result<(SettlementCall, u32)> {
    if data.len() < 4 {
        return Err(PaymentError::Encoding(
            "call data shorter than a function selector".to_string(),
        ));
    }
    if data[..4] != function_selector() {
        return Err(PaymentError::Encoding(
            "call data does not target the settlement function".to_string(),
        ));
    }

    let tokens = decode(&call_param_types(), &data[4..])
        .map_err(|e| PaymentError::Encoding(format!("malformed settlement call data: {e}")))?;

    let mut tokens = tokens.into_iter();
    let details = tokens
        .next()
        .and_then(Token::into_tuple)
        .ok_or_else(|| malformed("details tuple"))?;
    let fee_tier = tokens
        .next()
        .and_then(Token::into_uint)
        .ok_or_else(|| malformed("fee tier"))?
        .as_u32();

    let mut fields = details.into_iter();
    let recipient_amount = next_uint(&mut fields, "recipientAmount")?;
    let deadline = next_uint(&mut fields, "deadline")?;
    let recipient = next_address(&mut fields, "recipient")?;
    let recipient_currency = next_address(&mut fields, "recipientCurrency")?;
    let refund_destination = next_address(&mut fields, "refundDestination")?;
    let fee_amount = next_uint(&mut fields, "feeAmount")?;
    let id: [u8; 16] = fields
        .next()
        .and_then(Token::into_fixed_bytes)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| malformed("id"))?;
    let operator = next_address(&mut fields, "operator")?;
    let signature = fields
        .next()
        .and_then(Token::into_bytes)
        .ok_or_else(|| malformed("signature"))?;
    let prefix = fields
        .next()
        .and_then(Token::into_bytes)
        .ok_or_else(|| malformed("prefix"))?;

    Ok((
        SettlementCall {
            recipient_amount,
            deadline,
            recipient,
            recipient_currency,
            refund_destination,
            fee_amount,
            id,
            operator,
            signature,
            prefix,
        },
        fee_tier,
    ))
}

fn malformed(field: &str) -> PaymentError {
    PaymentError::Encoding(format!("settlement call data has a malformed {field} field"))
}

fn next_uint(tokens: &mut impl Iterator<Item = Token>, field: &str) -> Result<U256> {
    tokens
        .next()
        .and_then(Token::into_uint)
        .ok_or_else(|| malformed(field))
}

fn next_address(tokens: &mut impl Iterator<Item = Token>, field: &str) -> Result<Address> {
    tokens
        .next()
        .and_then(Token::into_address)
        .ok_or_else(|| malformed(field))
}
