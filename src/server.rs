//! Seller-side payment gateway.
//!
//! A [`PaymentGate`] guards one priced resource. Requests without a proof
//! get a freshly built 402 challenge; requests with a proof are verified,
//! checked against the replay store, settled on-chain, and only then allowed
//! through. The at-most-once guarantee is the gate's core invariant: an
//! accepted proof is recorded by content hash for the lifetime of its
//! deadline and an identical proof is rejected while that claim lives.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::account::{ChainAccount, ChainReader};
use crate::errors::{PaymentError, Result};
use crate::replay::ReplayStore;
use crate::schemes::{self, SettleContext};
use crate::types::{
    PaymentRequiredResponse, PaymentRequirement, SettlementReceipt, X402_VERSION,
};
use crate::utils::{
    current_timestamp, decode_payment_header, dollar_to_minor_units, encode_receipt_header,
    proof_content_hash,
};

// USDC on Base mainnet, the default asset
const DEFAULT_ASSET: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";

/// Configuration for one payment-gated resource.
#[derive(Clone, Debug)]
pub struct GateConfig {
    /// Address to receive payments
    pub pay_to: String,

    /// Asset the payment must be made in (token contract address)
    pub asset: String,

    /// Asset decimals
    pub decimals: u8,

    /// Network identifier
    pub network: String,

    /// Payment scheme accepted for this resource
    pub scheme: String,

    /// Price in USD
    pub price_usd: f64,

    /// Description of what the payment is for
    pub description: String,

    /// How long issued requirements (and accepted proofs) stay valid
    pub max_timeout_seconds: u64,

    /// Upper bound on the on-chain confirmation wait during settlement
    pub confirm_wait: Duration,

    /// Scheme-specific extra data attached to issued requirements
    pub extra: Option<Value>,
}

impl GateConfig {
    /// Creates a configuration for the default asset (USDC on Base mainnet)
    /// and the "exact" voucher scheme.
    pub fn new(pay_to: impl Into<String>, price_usd: f64, description: impl Into<String>) -> Self {
        Self {
            pay_to: pay_to.into(),
            asset: DEFAULT_ASSET.to_string(),
            decimals: 6,
            network: "8453".to_string(),
            scheme: "exact".to_string(),
            price_usd,
            description: description.into(),
            max_timeout_seconds: 300,
            confirm_wait: Duration::from_secs(30),
            extra: Some(json!({"name": "USD Coin", "version": "2"})),
        }
    }

    /// Overrides the asset and its decimals.
    pub fn with_asset(mut self, asset: impl Into<String>, decimals: u8) -> Self {
        self.asset = asset.into();
        self.decimals = decimals;
        self
    }

    /// Overrides the network.
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    /// Overrides the accepted scheme.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Overrides the requirement validity window.
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = seconds;
        self
    }

    /// Overrides the confirmation wait bound.
    pub fn with_confirm_wait(mut self, wait: Duration) -> Self {
        self.confirm_wait = wait;
        self
    }

    /// Replaces the extra data attached to issued requirements.
    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Builds the payment requirement this gate demands for a resource.
    pub fn to_requirement(&self, resource: &str) -> Result<PaymentRequirement> {
        Ok(PaymentRequirement {
            scheme: self.scheme.clone(),
            network: self.network.clone(),
            max_amount_required: dollar_to_minor_units(self.price_usd, self.decimals)?,
            resource: resource.to_string(),
            description: Some(self.description.clone()),
            mime_type: Some("application/json".to_string()),
            output_schema: None,
            pay_to: self.pay_to.clone(),
            max_timeout_seconds: self.max_timeout_seconds,
            asset: self.asset.clone(),
            extra: self.extra.clone(),
        })
    }
}

/// Payment gate for one protected resource.
pub struct PaymentGate {
    config: GateConfig,
    replay: Arc<ReplayStore>,
    chain: Arc<dyn ChainReader>,
    account: Arc<dyn ChainAccount>,
}

impl PaymentGate {
    /// Creates a gate with its own replay store.
    pub fn new(
        config: GateConfig,
        chain: Arc<dyn ChainReader>,
        account: Arc<dyn ChainAccount>,
    ) -> Self {
        Self {
            config,
            replay: Arc::new(ReplayStore::new()),
            chain,
            account,
        }
    }

    /// Shares a replay store between gates, so a proof accepted by one
    /// protected route cannot be replayed against another.
    pub fn with_shared_replay(mut self, replay: Arc<ReplayStore>) -> Self {
        self.replay = replay;
        self
    }

    /// The gate's configuration.
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Builds the 402 challenge body for a request without a proof.
    pub fn challenge(&self, resource: &str) -> Result<PaymentRequiredResponse> {
        Ok(PaymentRequiredResponse {
            x402_version: X402_VERSION,
            accepts: vec![self.config.to_requirement(resource)?],
            error: None,
        })
    }

    /// Verifies and settles a payment proof.
    ///
    /// On success the proof is recorded in the replay store until its
    /// deadline and the settlement receipt is returned; the caller forwards
    /// the request. Any error means the request must not be forwarded:
    /// [`PaymentError::ReplayRejected`] and verification failures warrant a
    /// fresh 402, [`PaymentError::SettlementUnconfirmed`] a retryable
    /// 502-class response.
    pub async fn accept(&self, payment_header: &str, resource: &str) -> Result<SettlementReceipt> {
        let payload = decode_payment_header(payment_header)?;
        let requirement = self.config.to_requirement(resource)?;

        if payload.scheme != requirement.scheme {
            return Err(PaymentError::Rejected(format!(
                "scheme {} not accepted for this resource",
                payload.scheme
            )));
        }
        if payload.network != requirement.network {
            return Err(PaymentError::Rejected(format!(
                "network {} not accepted for this resource",
                payload.network
            )));
        }

        let scheme = schemes::for_key(&payload.scheme)?;
        scheme.verify(&payload, &requirement, self.chain.as_ref()).await?;

        let key = proof_content_hash(payment_header);
        let expires_at = current_timestamp() + requirement.max_timeout_seconds;
        if !self.replay.try_claim(key, expires_at) {
            tracing::warn!(resource, "replayed payment proof rejected");
            return Err(PaymentError::ReplayRejected(format!(
                "0x{}",
                hex::encode(key)
            )));
        }

        let ctx = SettleContext {
            chain: self.chain.as_ref(),
            account: self.account.as_ref(),
            confirm_wait: self.config.confirm_wait,
        };

        match scheme.settle(&payload, &requirement, &ctx).await {
            Ok(receipt) => {
                tracing::info!(resource, tx_hash = %receipt.tx_hash, "payment settled");
                Ok(receipt)
            }
            Err(err) => {
                // The proof was not consumed; let the payer retry once the
                // underlying transaction goes through.
                self.replay.release(&key);
                Err(err)
            }
        }
    }

    /// Encodes a receipt for the X-PAYMENT-RESPONSE header.
    pub fn receipt_header(receipt: &SettlementReceipt) -> Result<String> {
        encode_receipt_header(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GateConfig {
        GateConfig::new(
            "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEbb",
            10.0,
            "Credit top-up",
        )
    }

    #[test]
    fn test_gate_config_defaults() {
        let config = config();
        assert_eq!(config.network, "8453");
        assert_eq!(config.scheme, "exact");
        assert_eq!(config.decimals, 6);
    }

    #[test]
    fn test_requirement_matches_price_and_payee() {
        let requirement = config().to_requirement("/topup/10").unwrap();

        assert_eq!(requirement.max_amount_required, "10000000"); // $10, 6 decimals
        assert_eq!(
            requirement.pay_to,
            "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEbb"
        );
        assert_eq!(requirement.resource, "/topup/10");
    }

    #[test]
    fn test_challenge_shape() {
        let gate_config = config();
        let challenge = PaymentRequiredResponse {
            x402_version: X402_VERSION,
            accepts: vec![gate_config.to_requirement("/topup/10").unwrap()],
            error: None,
        };

        assert_eq!(challenge.x402_version, 1);
        assert_eq!(challenge.accepts.len(), 1);
        assert_eq!(challenge.accepts[0].scheme, "exact");
    }

    #[test]
    fn test_builders() {
        let config = config()
            .with_network("84532")
            .with_scheme("swap")
            .with_timeout(60)
            .with_confirm_wait(Duration::from_secs(5));

        assert_eq!(config.network, "84532");
        assert_eq!(config.scheme, "swap");
        assert_eq!(config.max_timeout_seconds, 60);
        assert_eq!(config.confirm_wait, Duration::from_secs(5));
    }
}
