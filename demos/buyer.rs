//! Buyer-side credit monitor.
//!
//! Watches an external credit balance and tops it up through the seller's
//! payment-gated endpoint whenever it drops below the watermark.
//!
//! Run with:
//! ```bash
//! cargo run --example buyer
//! ```
//!
//! Environment variables: `PRIVATE_KEY`, `RPC_URL`, `BALANCE_URL`,
//! `BALANCE_API_KEY`, `SELLER_URL`, plus the knobs documented in
//! `x402_credit::config`.

use std::sync::Arc;

use tokio::sync::watch;
use url::Url;
use x402_credit::account::{ChainAccount, LocalChainAccount};
use x402_credit::config::Config;
use x402_credit::monitor::{BalanceMonitor, HttpBalanceSource, X402Purchaser};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;

    let private_key = std::env::var("PRIVATE_KEY").unwrap_or_else(|_| {
        println!("⚠️  No PRIVATE_KEY set, using example key (DO NOT USE IN PRODUCTION)");
        "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".to_string()
    });

    let account: Arc<dyn ChainAccount> =
        Arc::new(LocalChainAccount::connect(&private_key, &config.rpc_url).await?);

    println!("🚀 Buyer monitor");
    println!("   Low watermark: ${}", config.low_watermark);
    println!("   Top-up amount: ${}", config.top_up_amount);
    println!("   Check interval: {:?}", config.check_interval);
    println!("   Seller: {}", config.seller_url);
    println!("🪪 Buyer address: {:?}", account.address());

    let source = Arc::new(HttpBalanceSource::new(
        Url::parse(&config.balance_url)?,
        config.balance_api_key.clone(),
    ));
    let purchaser = Arc::new(X402Purchaser::new(
        config.negotiator(),
        account,
        Url::parse(&config.seller_url)?,
    ));

    let monitor = BalanceMonitor::new(config.monitor(), source, purchaser);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(monitor.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    println!("\n👋 Shutting down...");
    let _ = shutdown_tx.send(true);
    handle.await?;

    Ok(())
}
