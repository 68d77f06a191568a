//! Client side of the challenge/response payment protocol.
//!
//! A purchase attempt is a small state machine: send the request, and on a
//! 402 parse the offered requirements, select one, produce a payment proof,
//! and resubmit with the proof attached. A second 402 is terminal for the
//! attempt. The whole attempt runs under a wall-clock timeout that is
//! expected to be shorter than the balance-poll interval driving it.

use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

use crate::account::ChainAccount;
use crate::errors::{PaymentError, Result};
use crate::schemes;
use crate::transaction::TxPolicy;
use crate::types::{
    PaymentRequiredResponse, PaymentRequirement, SettlementReceipt, PAYMENT_HEADER,
    RECEIPT_HEADER,
};
use crate::utils::{decode_receipt_header, encode_payment_header, string_to_u256};

/// Configuration for payment-aware requests.
#[derive(Clone)]
pub struct NegotiatorConfig {
    /// Only accept requirements on this network, if set
    pub preferred_network: Option<String>,

    /// Only accept requirements with this scheme, if set
    pub preferred_scheme: Option<String>,

    /// Ceiling on the accepted amount in the asset's smallest unit, if set
    pub max_value: Option<ethers::types::U256>,

    /// Wall-clock bound on the whole purchase attempt
    pub attempt_timeout: Duration,

    /// On-chain settlement policy (fee tier, native stipend)
    pub policy: TxPolicy,

    /// HTTP client to use for requests
    pub http_client: Client,
}

impl NegotiatorConfig {
    /// Creates a configuration with no filters and a 30 second attempt
    /// timeout.
    pub fn new(policy: TxPolicy) -> Self {
        Self {
            preferred_network: None,
            preferred_scheme: None,
            max_value: None,
            attempt_timeout: Duration::from_secs(30),
            policy,
            http_client: Client::new(),
        }
    }

    /// Restricts selection to the given network.
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.preferred_network = Some(network.into());
        self
    }

    /// Restricts selection to the given scheme.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.preferred_scheme = Some(scheme.into());
        self
    }

    /// Caps the accepted amount.
    pub fn with_max_value(mut self, max_value: ethers::types::U256) -> Self {
        self.max_value = Some(max_value);
        self
    }

    /// Sets the attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Sets a custom HTTP client.
    pub fn with_client(mut self, client: Client) -> Self {
        self.http_client = client;
        self
    }
}

/// Result of a completed purchase attempt.
#[derive(Debug, Clone)]
pub struct PurchaseOutcome {
    /// HTTP status of the final response
    pub status: u16,

    /// Body of the final response
    pub body: String,

    /// Settlement metadata from the X-PAYMENT-RESPONSE header, when present
    pub receipt: Option<SettlementReceipt>,
}

/// Makes an HTTP request with automatic payment handling.
///
/// On a 402 the offered requirements are filtered and one is selected, a
/// proof is produced for it, and the request is retried once with the proof
/// attached. Aborts with [`PaymentError::NegotiationTimeout`] when no
/// terminal state is reached within the configured window.
pub async fn request_with_payment(
    config: &NegotiatorConfig,
    account: &dyn ChainAccount,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<PurchaseOutcome> {
    match tokio::time::timeout(
        config.attempt_timeout,
        negotiate(config, account, method, url, body),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => Err(PaymentError::NegotiationTimeout(config.attempt_timeout)),
    }
}

async fn negotiate(
    config: &NegotiatorConfig,
    account: &dyn ChainAccount,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<PurchaseOutcome> {
    let mut request = config.http_client.request(method.clone(), url);
    if let Some(body) = &body {
        request = request.json(body);
    }

    let response = request.send().await?;

    if response.status() != StatusCode::PAYMENT_REQUIRED {
        // Nothing to pay for
        return outcome_from(response).await;
    }

    let challenge: PaymentRequiredResponse = response.json().await?;
    let requirement = select_requirement(&challenge.accepts, config)?.clone();
    tracing::debug!(
        scheme = %requirement.scheme,
        network = %requirement.network,
        amount = %requirement.max_amount_required,
        "selected payment requirement"
    );

    let scheme = schemes::for_key(&requirement.scheme)?;
    let payload = scheme
        .build_proof(&requirement, account, &config.policy)
        .await?;
    let header = encode_payment_header(&payload)?;

    let mut retry = config
        .http_client
        .request(method, url)
        .header(PAYMENT_HEADER, header);
    if let Some(body) = body {
        retry = retry.json(&body);
    }

    let retry_response = retry.send().await?;
    if retry_response.status() == StatusCode::PAYMENT_REQUIRED {
        let detail = retry_response.text().await.unwrap_or_default();
        return Err(PaymentError::Rejected(format!(
            "resource demanded payment again: {detail}"
        )));
    }

    outcome_from(retry_response).await
}

async fn outcome_from(response: Response) -> Result<PurchaseOutcome> {
    let status = response.status().as_u16();

    let receipt = response
        .headers()
        .get(RECEIPT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| decode_receipt_header(value).ok());

    if let Some(receipt) = &receipt {
        tracing::info!(tx_hash = %receipt.tx_hash, "payment settled");
    }

    let body = response.text().await?;
    Ok(PurchaseOutcome {
        status,
        body,
        receipt,
    })
}

/// Selects a requirement from the server's offers.
///
/// Filters by preferred scheme, preferred network, and the value ceiling;
/// among survivors the first in server-provided order wins. The transaction
/// builder is never reached when the filtered set is empty.
pub fn select_requirement<'a>(
    accepts: &'a [PaymentRequirement],
    config: &NegotiatorConfig,
) -> Result<&'a PaymentRequirement> {
    let mut candidates: Vec<_> = accepts.iter().collect();

    if let Some(scheme) = &config.preferred_scheme {
        candidates.retain(|r| &r.scheme == scheme);
    }

    if let Some(network) = &config.preferred_network {
        candidates.retain(|r| &r.network == network);
    }

    if let Some(max_value) = config.max_value {
        candidates.retain(|r| {
            string_to_u256(&r.max_amount_required)
                .map(|value| value <= max_value)
                .unwrap_or(false)
        });
    }

    candidates
        .first()
        .copied()
        .ok_or(PaymentError::NoAcceptableRequirement)
}

/// Convenience wrapper for GET requests.
pub async fn get(
    config: &NegotiatorConfig,
    account: &dyn ChainAccount,
    url: &str,
) -> Result<PurchaseOutcome> {
    request_with_payment(config, account, Method::GET, url, None).await
}

/// Convenience wrapper for POST requests with a JSON body.
pub async fn post(
    config: &NegotiatorConfig,
    account: &dyn ChainAccount,
    url: &str,
    body: Value,
) -> Result<PurchaseOutcome> {
    request_with_payment(config, account, Method::POST, url, Some(body)).await
}
