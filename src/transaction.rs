//! Assembly of the fee-market settlement transaction.
//!
//! A transaction is built fresh for every attempt. A failed attempt is never
//! replayed: the deadline is re-checked on each build, and replaying a signed
//! transaction would double-spend or fail on the nonce.

use ethers::types::{Address, H256, U256};

use crate::account::ChainAccount;
use crate::encoding::{encode_swap_call, SettlementCall};
use crate::errors::{PaymentError, Result};
use crate::types::PaymentRequirement;
use crate::utils::{
    current_timestamp, parse_address, parse_hex_bytes, parse_id16, string_to_u256,
};

/// Policy-level parameters for on-chain settlement: which pool fee tier the
/// swap routes through, and the fixed native-currency stipend the settlement
/// contract requires regardless of the paid asset.
#[derive(Debug, Clone, Copy)]
pub struct TxPolicy {
    /// Pool fee tier in hundredths of a basis point
    pub fee_tier: u32,

    /// Native currency attached to the call, in wei
    pub native_value: U256,
}

impl TxPolicy {
    /// Creates a new policy.
    pub fn new(fee_tier: u32, native_value: U256) -> Self {
        Self {
            fee_tier,
            native_value,
        }
    }
}

/// A fully assembled, not yet signed settlement transaction.
#[derive(Debug, Clone)]
pub struct SettlementTransaction {
    /// Settlement contract address
    pub to: Address,

    /// Encoded call data
    pub data: Vec<u8>,

    /// Native currency attached
    pub value: U256,

    /// Network the transaction must be broadcast to
    pub network: String,
}

/// Builds a settlement transaction from a payment requirement.
///
/// The requirement's `extra` metadata supplies the operator-signed transfer
/// intent; `refund_to` is the buyer address used when the intent does not pin
/// a refund destination. Fails before anything is signed when the deadline
/// has already passed or any field is malformed.
pub fn build_settlement_tx(
    requirement: &PaymentRequirement,
    refund_to: Address,
    policy: &TxPolicy,
) -> Result<SettlementTransaction> {
    let intent = requirement.swap_intent()?;

    let now = current_timestamp();
    if intent.deadline <= now {
        return Err(PaymentError::Encoding(format!(
            "settlement deadline {} already passed (now {now})",
            intent.deadline
        )));
    }

    let refund_destination = match &intent.refund_destination {
        Some(addr) => parse_address(addr)?,
        None => refund_to,
    };

    let call = SettlementCall {
        recipient_amount: string_to_u256(&requirement.max_amount_required)?,
        deadline: U256::from(intent.deadline),
        recipient: parse_address(&requirement.pay_to)?,
        recipient_currency: parse_address(&requirement.asset)?,
        refund_destination,
        fee_amount: string_to_u256(&intent.fee_amount)?,
        id: parse_id16(&intent.id)?,
        operator: parse_address(&intent.operator)?,
        signature: parse_hex_bytes(&intent.signature)?,
        prefix: parse_hex_bytes(&intent.prefix)?,
    };

    let data = encode_swap_call(&call, policy.fee_tier)?;

    Ok(SettlementTransaction {
        to: parse_address(&intent.contract_address)?,
        data,
        value: policy.native_value,
        network: requirement.network.clone(),
    })
}

/// Signs and broadcasts a settlement transaction through the account
/// service.
pub async fn sign_and_submit(
    tx: &SettlementTransaction,
    account: &dyn ChainAccount,
) -> Result<H256> {
    let raw = account.sign(tx).await?;
    let hash = account.submit(raw, &tx.network).await?;
    tracing::info!(
        tx_hash = ?hash,
        network = %tx.network,
        "settlement transaction broadcast"
    );
    Ok(hash)
}
