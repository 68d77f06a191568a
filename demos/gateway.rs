//! Seller-side payment gateway.
//!
//! Exposes fixed-price top-up routes behind the payment protocol and a free
//! health route. Each priced route has its own gate; the replay store is
//! shared so a proof accepted on one route cannot be replayed on another.
//!
//! Run with:
//! ```bash
//! cargo run --example gateway
//! ```
//!
//! Environment variables:
//! - `PAY_TO`: address to receive payments
//! - `PRIVATE_KEY`: gateway key used to submit voucher settlements
//! - `RPC_URL`: JSON-RPC endpoint
//! - `PORT`: server port (default: 4021)
//! - `PRICE_10`, `PRICE_25`, `PRICE_50`: route prices in USD

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use x402_credit::account::{ChainAccount, ChainReader, HttpChainReader, LocalChainAccount};
use x402_credit::replay::ReplayStore;
use x402_credit::server::{GateConfig, PaymentGate};
use x402_credit::{PaymentError, PAYMENT_HEADER, RECEIPT_HEADER};

struct AppState {
    gates: HashMap<String, PaymentGate>,
    network: String,
    pay_to: String,
}

async fn topup_handler(
    State(state): State<Arc<AppState>>,
    Path(amount): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(gate) = state.gates.get(&amount) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("no top-up route for {amount}")})),
        )
            .into_response();
    };
    let resource = format!("/topup/{amount}");

    let Some(payment_header) = headers
        .get(PAYMENT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
    else {
        return challenge_response(gate, &resource);
    };

    match gate.accept(&payment_header, &resource).await {
        Ok(receipt) => {
            let encoded = PaymentGate::receipt_header(&receipt).unwrap_or_default();
            (
                StatusCode::OK,
                [(RECEIPT_HEADER, encoded)],
                Json(json!({
                    "credited_amount_usd": gate.config().price_usd,
                    "tx_hash": receipt.tx_hash,
                })),
            )
                .into_response()
        }
        Err(err @ PaymentError::SettlementUnconfirmed(_)) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": err.to_string(), "retryable": true})),
        )
            .into_response(),
        Err(err) => {
            tracing::warn!(%resource, error = %err, "payment not accepted");
            challenge_response(gate, &resource)
        }
    }
}

fn challenge_response(gate: &PaymentGate, resource: &str) -> Response {
    match gate.challenge(resource) {
        Ok(challenge) => (StatusCode::PAYMENT_REQUIRED, Json(challenge)).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": err.to_string()})),
        )
            .into_response(),
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "network": state.network,
        "pay_to": state.pay_to,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let pay_to = std::env::var("PAY_TO")
        .unwrap_or_else(|_| "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEbb".to_string());
    let private_key = std::env::var("PRIVATE_KEY").unwrap_or_else(|_| {
        println!("⚠️  No PRIVATE_KEY set, using example key (DO NOT USE IN PRODUCTION)");
        "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".to_string()
    });
    let rpc_url =
        std::env::var("RPC_URL").unwrap_or_else(|_| "https://mainnet.base.org".to_string());
    let network = std::env::var("X402_NETWORK").unwrap_or_else(|_| "8453".to_string());
    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "4021".to_string())
        .parse::<u16>()?;

    let account: Arc<dyn ChainAccount> =
        Arc::new(LocalChainAccount::connect(&private_key, &rpc_url).await?);
    let chain: Arc<dyn ChainReader> = Arc::new(HttpChainReader::new(&rpc_url)?);
    let replay = Arc::new(ReplayStore::new());

    let mut gates = HashMap::new();
    for (route, price_var, default_price) in [
        ("10", "PRICE_10", 10.0),
        ("25", "PRICE_25", 25.0),
        ("50", "PRICE_50", 50.0),
    ] {
        let price = std::env::var(price_var)
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(default_price);
        let config = GateConfig::new(&pay_to, price, format!("${price} credit top-up"))
            .with_network(&network);
        let gate = PaymentGate::new(config, Arc::clone(&chain), Arc::clone(&account))
            .with_shared_replay(Arc::clone(&replay));
        gates.insert(route.to_string(), gate);
    }

    let state = Arc::new(AppState {
        gates,
        network,
        pay_to: pay_to.clone(),
    });

    let app = Router::new()
        .route("/topup/:amount", post(topup_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!("✅ Gateway listening on http://{addr}");
    println!("   Pay to: {pay_to}");
    println!("\nTry:");
    println!("  curl http://localhost:{port}/health");
    println!("  curl -X POST http://localhost:{port}/topup/10");
    println!();

    axum::serve(listener, app).await?;

    Ok(())
}
