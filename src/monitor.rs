//! Buyer-side balance monitor.
//!
//! A single supervised loop with one outstanding operation at a time: query
//! the balance, and when it sits below the watermark drive one purchase
//! attempt through the negotiator. No cycle's failure terminates the loop;
//! only the shutdown signal does.
//!
//! Sleep policy: exactly one sleep per cycle. After any top-up attempt
//! (success or failure) and after any error the loop sleeps the short retry
//! backoff, so a lagging credit balance is re-checked promptly and repeated
//! failures are not throttled to the long interval. Only a cycle that found
//! the balance sufficient sleeps the full check interval.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use url::Url;

use crate::account::ChainAccount;
use crate::client::{self, NegotiatorConfig, PurchaseOutcome};
use crate::errors::{PaymentError, Result};
use crate::types::BalanceState;
use crate::utils::current_timestamp;

/// Source of the externally held balance the monitor watches.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Returns the current balance in USD.
    async fn balance(&self) -> Result<f64>;
}

/// Balance source backed by an HTTP credits endpoint with a bearer API key.
///
/// Expects a body of the form
/// `{"data": {"total_credits": ..., "total_usage": ...}}` and reports the
/// difference.
pub struct HttpBalanceSource {
    client: Client,
    url: Url,
    api_key: String,
}

impl HttpBalanceSource {
    /// Creates a source for the given endpoint and credential.
    pub fn new(url: Url, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url,
            api_key: api_key.into(),
        }
    }
}

fn read_f64(value: &Value, key: &str) -> Result<f64> {
    value
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| PaymentError::BalanceQuery(format!("missing or non-numeric field {key}")))
}

#[async_trait]
impl BalanceSource for HttpBalanceSource {
    async fn balance(&self) -> Result<f64> {
        let response = self
            .client
            .get(self.url.clone())
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PaymentError::BalanceQuery(format!(
                "balance endpoint returned {}",
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        let data = body
            .get("data")
            .ok_or_else(|| PaymentError::BalanceQuery("missing data field".to_string()))?;

        Ok(read_f64(data, "total_credits")? - read_f64(data, "total_usage")?)
    }
}

/// Driver for one credit purchase.
#[async_trait]
pub trait CreditPurchaser: Send + Sync {
    /// Purchases `amount` USD worth of credit, paying on demand.
    async fn purchase(&self, amount: f64) -> Result<PurchaseOutcome>;
}

/// Purchaser that POSTs to the seller's top-up endpoint through the payment
/// negotiator.
pub struct X402Purchaser {
    config: NegotiatorConfig,
    account: Arc<dyn ChainAccount>,
    endpoint: Url,
}

impl X402Purchaser {
    /// Creates a purchaser for the given seller endpoint.
    pub fn new(config: NegotiatorConfig, account: Arc<dyn ChainAccount>, endpoint: Url) -> Self {
        Self {
            config,
            account,
            endpoint,
        }
    }
}

#[async_trait]
impl CreditPurchaser for X402Purchaser {
    async fn purchase(&self, amount: f64) -> Result<PurchaseOutcome> {
        let body = json!({
            "amount": amount,
            "sender": format!("{:?}", self.account.address()),
        });

        client::request_with_payment(
            &self.config,
            self.account.as_ref(),
            Method::POST,
            self.endpoint.as_str(),
            Some(body),
        )
        .await
    }
}

/// Timing and threshold knobs for the monitor loop.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Balance threshold below which a top-up is triggered
    pub low_watermark: f64,

    /// USD amount purchased per top-up
    pub top_up_amount: f64,

    /// Sleep after a cycle that found the balance sufficient
    pub check_interval: Duration,

    /// Sleep after a failure or a completed top-up attempt
    pub retry_backoff: Duration,
}

/// The supervised balance monitor loop.
pub struct BalanceMonitor {
    config: MonitorConfig,
    source: Arc<dyn BalanceSource>,
    purchaser: Arc<dyn CreditPurchaser>,
    state: BalanceState,
}

impl BalanceMonitor {
    /// Creates a monitor. State starts empty and is derived from the first
    /// balance query.
    pub fn new(
        config: MonitorConfig,
        source: Arc<dyn BalanceSource>,
        purchaser: Arc<dyn CreditPurchaser>,
    ) -> Self {
        let state = BalanceState::new(config.low_watermark, config.top_up_amount);
        Self {
            config,
            source,
            purchaser,
            state,
        }
    }

    /// The monitor's current view of the balance.
    pub fn state(&self) -> &BalanceState {
        &self.state
    }

    /// Runs the loop until the shutdown signal flips to `true` or its sender
    /// is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            low_watermark = self.config.low_watermark,
            top_up_amount = self.config.top_up_amount,
            check_interval_secs = self.config.check_interval.as_secs(),
            "balance monitor started"
        );

        loop {
            let pause = self.cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("balance monitor stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Runs one poll cycle and returns how long to sleep before the next.
    ///
    /// At most one purchase attempt is issued per cycle, and a new cycle
    /// only starts after this one returns, so a second attempt can never
    /// start while the first is still settling.
    pub async fn cycle(&mut self) -> Duration {
        let balance = match self.source.balance().await {
            Ok(balance) => balance,
            Err(err) => {
                tracing::warn!(error = %err, "balance query failed");
                return self.config.retry_backoff;
            }
        };

        self.state.current_balance = balance;
        self.state.last_checked_at = Some(current_timestamp());

        if !self.state.needs_top_up() {
            tracing::debug!(
                balance,
                watermark = self.config.low_watermark,
                "balance sufficient"
            );
            return self.config.check_interval;
        }

        tracing::info!(
            balance,
            watermark = self.config.low_watermark,
            amount = self.config.top_up_amount,
            "balance below watermark, purchasing credit"
        );

        match self.purchaser.purchase(self.config.top_up_amount).await {
            Ok(outcome) => match &outcome.receipt {
                Some(receipt) => tracing::info!(
                    status = outcome.status,
                    tx_hash = %receipt.tx_hash,
                    "top-up settled"
                ),
                None => tracing::info!(status = outcome.status, "top-up completed"),
            },
            Err(err) if err.is_retryable() => {
                tracing::warn!(error = %err, "top-up failed, will retry next cycle");
            }
            Err(err) => {
                tracing::error!(error = %err, "top-up failed with a non-retryable error");
            }
        }

        // Credited balance can lag the settlement; re-check soon either way.
        self.config.retry_backoff
    }
}
