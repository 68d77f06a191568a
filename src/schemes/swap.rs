//! The "swap" scheme: on-chain swap settlement proven by transaction hash.
//!
//! The buyer builds, signs, and broadcasts the settlement transaction itself
//! and presents its hash as the payment proof. The seller audits the
//! broadcast transaction by decoding its call data and comparing it field by
//! field against the requirement, then waits for confirmation.

use async_trait::async_trait;
use ethers::types::U256;
use serde_json::json;

use crate::account::{ChainAccount, ChainReader};
use crate::encoding::decode_swap_call;
use crate::errors::{PaymentError, Result};
use crate::schemes::{await_confirmation, Scheme, SettleContext};
use crate::transaction::{build_settlement_tx, sign_and_submit, TxPolicy};
use crate::types::{
    PaymentPayload, PaymentRequirement, SettlementReceipt, TxHashProof, X402_VERSION,
};
use crate::utils::{current_timestamp, parse_address, parse_tx_hash, string_to_u256};

/// Scheme implementation for on-chain swap settlement.
pub struct SwapSettlement;

fn proof_from(payload: &PaymentPayload) -> Result<TxHashProof> {
    serde_json::from_value(payload.payload.clone())
        .map_err(|e| PaymentError::VerificationFailed(format!("malformed swap proof: {e}")))
}

#[async_trait]
impl Scheme for SwapSettlement {
    fn key(&self) -> &'static str {
        "swap"
    }

    async fn build_proof(
        &self,
        requirement: &PaymentRequirement,
        account: &dyn ChainAccount,
        policy: &TxPolicy,
    ) -> Result<PaymentPayload> {
        let tx = build_settlement_tx(requirement, account.address(), policy)?;
        let hash = sign_and_submit(&tx, account).await?;

        Ok(PaymentPayload {
            x402_version: X402_VERSION,
            scheme: self.key().to_string(),
            network: requirement.network.clone(),
            payload: json!(TxHashProof {
                tx_hash: format!("{hash:?}"),
            }),
        })
    }

    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
        chain: &dyn ChainReader,
    ) -> Result<()> {
        let proof = proof_from(payload)?;
        let hash = parse_tx_hash(&proof.tx_hash)?;

        let tx = chain.transaction_by_hash(hash).await?.ok_or_else(|| {
            PaymentError::VerificationFailed(format!(
                "settlement transaction {} not found on chain",
                proof.tx_hash
            ))
        })?;

        let intent = requirement.swap_intent()?;
        let contract = parse_address(&intent.contract_address)?;
        if tx.to != Some(contract) {
            return Err(PaymentError::VerificationFailed(
                "transaction does not target the settlement contract".to_string(),
            ));
        }

        let (call, _fee_tier) = decode_swap_call(&tx.input)?;

        if call.recipient != parse_address(&requirement.pay_to)? {
            return Err(PaymentError::VerificationFailed(
                "settlement pays the wrong recipient".to_string(),
            ));
        }
        if call.recipient_amount != string_to_u256(&requirement.max_amount_required)? {
            return Err(PaymentError::VerificationFailed(
                "settlement amount does not match the requirement".to_string(),
            ));
        }
        if call.recipient_currency != parse_address(&requirement.asset)? {
            return Err(PaymentError::VerificationFailed(
                "settlement pays in the wrong asset".to_string(),
            ));
        }
        if call.deadline < U256::from(current_timestamp()) {
            return Err(PaymentError::VerificationFailed(
                "settlement deadline expired".to_string(),
            ));
        }

        Ok(())
    }

    async fn settle(
        &self,
        payload: &PaymentPayload,
        _requirement: &PaymentRequirement,
        ctx: &SettleContext<'_>,
    ) -> Result<SettlementReceipt> {
        // The buyer already broadcast; settlement is a bounded wait for the
        // transaction to be mined.
        let proof = proof_from(payload)?;
        let hash = parse_tx_hash(&proof.tx_hash)?;

        await_confirmation(ctx.chain, hash, ctx.confirm_wait).await?;

        Ok(SettlementReceipt {
            tx_hash: proof.tx_hash,
            settled_at: Some(chrono::Utc::now().to_rfc3339()),
            network: Some(payload.network.clone()),
        })
    }
}
