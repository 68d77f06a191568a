//! Environment-derived configuration.
//!
//! Every knob has a documented default; set the corresponding variable to
//! override it. Parse failures name the offending variable instead of
//! falling back silently.
//!
//! | Variable                 | Default                                  |
//! |--------------------------|------------------------------------------|
//! | `LOW_BALANCE_THRESHOLD`  | `30`                                     |
//! | `TOPUP_AMOUNT`           | `10`                                     |
//! | `CHECK_INTERVAL_MS`      | `60000`                                  |
//! | `RETRY_BACKOFF_MS`       | `30000`                                  |
//! | `NEGOTIATION_TIMEOUT_MS` | `30000`                                  |
//! | `X402_NETWORK`           | `8453`                                   |
//! | `POOL_FEE_TIER`          | `500`                                    |
//! | `TX_VALUE_ETH`           | `0.004`                                  |
//! | `RPC_URL`                | `https://mainnet.base.org`               |
//! | `BALANCE_URL`            | `https://openrouter.ai/api/v1/credits`   |
//! | `BALANCE_API_KEY`        | (empty)                                  |
//! | `SELLER_URL`             | `http://localhost:4021/topup`            |

use ethers::types::U256;
use ethers::utils::parse_ether;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::client::NegotiatorConfig;
use crate::errors::{PaymentError, Result};
use crate::monitor::MonitorConfig;
use crate::transaction::TxPolicy;

/// Process-wide configuration for the buyer-side pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Balance threshold below which a top-up is triggered
    pub low_watermark: f64,

    /// USD amount purchased per top-up
    pub top_up_amount: f64,

    /// Sleep between healthy poll cycles
    pub check_interval: Duration,

    /// Sleep after a failed cycle or a completed top-up attempt
    pub retry_backoff: Duration,

    /// Wall-clock bound on a single purchase attempt
    pub attempt_timeout: Duration,

    /// Settlement network selector
    pub network: String,

    /// Pool fee tier for swap settlement
    pub pool_fee_tier: u32,

    /// Native-currency stipend attached to swap settlements, in wei
    pub native_value: U256,

    /// JSON-RPC endpoint
    pub rpc_url: String,

    /// Balance source endpoint
    pub balance_url: String,

    /// Balance source credential
    pub balance_api_key: String,

    /// Seller top-up endpoint
    pub seller_url: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|e| PaymentError::Config(format!("{key}: {e}"))),
    }
}

impl Config {
    /// Loads the configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            low_watermark: env_parse("LOW_BALANCE_THRESHOLD", 30.0)?,
            top_up_amount: env_parse("TOPUP_AMOUNT", 10.0)?,
            check_interval: Duration::from_millis(env_parse("CHECK_INTERVAL_MS", 60_000u64)?),
            retry_backoff: Duration::from_millis(env_parse("RETRY_BACKOFF_MS", 30_000u64)?),
            attempt_timeout: Duration::from_millis(env_parse(
                "NEGOTIATION_TIMEOUT_MS",
                30_000u64,
            )?),
            network: env_or("X402_NETWORK", "8453"),
            pool_fee_tier: env_parse("POOL_FEE_TIER", 500u32)?,
            native_value: parse_ether(env_or("TX_VALUE_ETH", "0.004"))
                .map_err(|e| PaymentError::Config(format!("TX_VALUE_ETH: {e}")))?,
            rpc_url: env_or("RPC_URL", "https://mainnet.base.org"),
            balance_url: env_or("BALANCE_URL", "https://openrouter.ai/api/v1/credits"),
            balance_api_key: env_or("BALANCE_API_KEY", ""),
            seller_url: env_or("SELLER_URL", "http://localhost:4021/topup"),
        };

        // A purchase attempt must resolve well inside one poll interval,
        // otherwise a hung negotiation blocks the next balance check.
        if config.attempt_timeout >= config.check_interval {
            return Err(PaymentError::Config(format!(
                "NEGOTIATION_TIMEOUT_MS ({:?}) must be shorter than CHECK_INTERVAL_MS ({:?})",
                config.attempt_timeout, config.check_interval
            )));
        }

        Ok(config)
    }

    /// The settlement policy pair derived from this configuration.
    pub fn policy(&self) -> TxPolicy {
        TxPolicy::new(self.pool_fee_tier, self.native_value)
    }

    /// Monitor timing knobs derived from this configuration.
    pub fn monitor(&self) -> MonitorConfig {
        MonitorConfig {
            low_watermark: self.low_watermark,
            top_up_amount: self.top_up_amount,
            check_interval: self.check_interval,
            retry_backoff: self.retry_backoff,
        }
    }

    /// Negotiator configuration derived from this configuration.
    pub fn negotiator(&self) -> NegotiatorConfig {
        NegotiatorConfig::new(self.policy())
            .with_network(self.network.clone())
            .with_timeout(self.attempt_timeout)
    }
}
