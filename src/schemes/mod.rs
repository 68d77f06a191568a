//! Payment scheme implementations.
//!
//! A scheme defines how a payment proof is produced on the buyer side and
//! how it is verified and settled on the seller side. Two schemes are
//! supported: "swap" (the buyer broadcasts an on-chain swap settlement and
//! proves it with the transaction hash) and "exact" (the buyer signs an
//! off-chain transfer voucher that the seller submits).

pub mod exact;
pub mod swap;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ethers::types::H256;

use crate::account::{ChainAccount, ChainReader};
use crate::errors::{PaymentError, Result};
use crate::transaction::TxPolicy;
use crate::types::{PaymentPayload, PaymentRequirement, SettlementReceipt};

/// How often settlement polls the chain while waiting for confirmation.
const CONFIRM_POLL: Duration = Duration::from_secs(2);

/// Everything a scheme needs to settle a verified proof on the seller side.
pub struct SettleContext<'a> {
    /// Read access to the settlement chain
    pub chain: &'a dyn ChainReader,

    /// The gateway's own account, used when settlement requires a
    /// gateway-submitted transaction
    pub account: &'a dyn ChainAccount,

    /// Upper bound on the local confirmation wait
    pub confirm_wait: Duration,
}

/// Trait implemented by each payment scheme.
#[async_trait]
pub trait Scheme: Send + Sync {
    /// Returns the scheme identifier used on the wire.
    fn key(&self) -> &'static str;

    /// Produces a payment proof for the given requirement (buyer side).
    async fn build_proof(
        &self,
        requirement: &PaymentRequirement,
        account: &dyn ChainAccount,
        policy: &TxPolicy,
    ) -> Result<PaymentPayload>;

    /// Verifies a proof against the requirement it claims to satisfy
    /// (seller side). Does not mutate any state.
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
        chain: &dyn ChainReader,
    ) -> Result<()>;

    /// Settles a verified proof, waiting at most `ctx.confirm_wait` for
    /// on-chain confirmation.
    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
        ctx: &SettleContext<'_>,
    ) -> Result<SettlementReceipt>;
}

/// Resolves a scheme implementation by its wire identifier.
pub fn for_key(name: &str) -> Result<Arc<dyn Scheme>> {
    match name {
        "swap" => Ok(Arc::new(swap::SwapSettlement)),
        "exact" => Ok(Arc::new(exact::ExactVoucher)),
        _ => Err(PaymentError::UnsupportedScheme(name.to_string())),
    }
}

/// Polls the chain until `hash` is confirmed or `wait` elapses.
///
/// The transaction itself cannot be cancelled once broadcast; only this
/// local wait is abandoned on timeout.
pub(crate) async fn await_confirmation(
    chain: &dyn ChainReader,
    hash: H256,
    wait: Duration,
) -> Result<()> {
    let started = Instant::now();
    loop {
        if chain.is_confirmed(hash).await? {
            return Ok(());
        }
        if started.elapsed() >= wait {
            return Err(PaymentError::SettlementUnconfirmed(wait));
        }
        tokio::time::sleep(CONFIRM_POLL.min(wait)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::ChainTransaction;
    use ethers::types::U256;

    struct NeverConfirms;

    #[async_trait]
    impl ChainReader for NeverConfirms {
        async fn transaction_by_hash(&self, _hash: H256) -> Result<Option<ChainTransaction>> {
            Ok(Some(ChainTransaction {
                to: None,
                input: Vec::new(),
                value: U256::zero(),
                confirmed: false,
            }))
        }
    }

    #[test]
    fn test_scheme_registry() {
        assert_eq!(for_key("swap").unwrap().key(), "swap");
        assert_eq!(for_key("exact").unwrap().key(), "exact");
        assert!(matches!(
            for_key("upto"),
            Err(PaymentError::UnsupportedScheme(_))
        ));
    }

    #[tokio::test]
    async fn test_await_confirmation_bounded() {
        let err = await_confirmation(&NeverConfirms, H256::zero(), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::SettlementUnconfirmed(_)));
        assert!(err.is_retryable());
    }
}
