//! # x402-credit
//!
//! Autonomous credit top-up over the x402 "payment required" protocol:
//! a buyer-side monitor that watches a service balance and purchases more
//! credit when it drops below a watermark, and a seller-side gateway that
//! gates HTTP resources behind the same protocol and settles payments
//! on-chain.
//!
//! ## Pipeline
//!
//! 1. The [`monitor::BalanceMonitor`] polls an external balance.
//! 2. Below the watermark, it drives one purchase attempt through the
//!    [`client`] negotiator: request, 402 challenge, requirement selection,
//!    payment proof, resubmission.
//! 3. Proofs come from a [`schemes::Scheme`]: either an on-chain swap
//!    settlement built by the [`transaction`] builder and [`encoding`]
//!    encoder, or a signed off-chain voucher.
//! 4. On the seller side, a [`server::PaymentGate`] challenges unpaid
//!    requests, verifies and settles proofs, and rejects replays through the
//!    [`replay`] store.
//!
//! ## Buyer example
//!
//! ```rust,no_run
//! use x402_credit::account::LocalChainAccount;
//! use x402_credit::client::{post, NegotiatorConfig};
//! use x402_credit::transaction::TxPolicy;
//! use ethers::types::U256;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let account = LocalChainAccount::connect(
//!     "0xYOUR_PRIVATE_KEY",
//!     "https://mainnet.base.org",
//! )
//! .await?;
//!
//! let config = NegotiatorConfig::new(TxPolicy::new(500, U256::zero()))
//!     .with_network("8453");
//!
//! let outcome = post(
//!     &config,
//!     &account,
//!     "https://seller.example.com/topup",
//!     json!({"amount": 10}),
//! )
//! .await?;
//! println!("status {}", outcome.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Seller example
//!
//! ```rust
//! use x402_credit::server::GateConfig;
//!
//! let config = GateConfig::new(
//!     "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEbb",
//!     10.0, // $10 per top-up
//!     "Credit top-up",
//! );
//! let requirement = config.to_requirement("/topup/10").unwrap();
//! assert_eq!(requirement.max_amount_required, "10000000");
//! ```
//!
//! ## Guarantees
//!
//! - At most one purchase attempt in flight on the buyer side; a failed
//!   cycle backs off and retries, and never terminates the loop.
//! - Each accepted proof is recorded by content hash until its deadline;
//!   presenting it again is rejected, and two concurrent presentations have
//!   exactly one winner.
//! - Broadcast is a point of no return: the gateway bounds only its local
//!   confirmation wait, never cancels the chain.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod account;
pub mod client;
pub mod config;
pub mod encoding;
pub mod errors;
pub mod monitor;
pub mod replay;
pub mod schemes;
pub mod server;
pub mod transaction;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use errors::{PaymentError, Result};
pub use types::{
    BalanceState, PaymentPayload, PaymentRequiredResponse, PaymentRequirement, SettlementReceipt,
    SwapIntent, TransferVoucher, TxHashProof, PAYMENT_HEADER, RECEIPT_HEADER, X402_VERSION,
};

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;

    #[test]
    fn test_version_constant() {
        assert_eq!(X402_VERSION, 1);
    }

    #[test]
    fn test_module_accessibility() {
        let _ = client::NegotiatorConfig::new(transaction::TxPolicy::new(500, U256::zero()));
        let _ = server::GateConfig::new("0xaddr", 1.0, "desc");
        let _ = replay::ReplayStore::new();
        let _ = types::BalanceState::new(30.0, 10.0);
    }
}
