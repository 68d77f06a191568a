//! Integration tests for the payment pipeline.
//!
//! Exercises the buyer and seller halves together without touching the
//! network: balance source and chain access are mocked at their traits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, Signature, H256, U256};
use serde_json::json;
use tokio::sync::watch;

use x402_credit::account::{ChainAccount, ChainReader, ChainTransaction};
use x402_credit::client::{select_requirement, NegotiatorConfig, PurchaseOutcome};
use x402_credit::encoding::decode_swap_call;
use x402_credit::errors::{PaymentError, Result};
use x402_credit::monitor::{BalanceMonitor, BalanceSource, CreditPurchaser, MonitorConfig};
use x402_credit::replay::ReplayStore;
use x402_credit::schemes::{self, Scheme};
use x402_credit::server::{GateConfig, PaymentGate};
use x402_credit::transaction::{build_settlement_tx, SettlementTransaction, TxPolicy};
use x402_credit::types::PaymentRequirement;
use x402_credit::utils::{
    current_timestamp, decode_payment_header, encode_payment_header, proof_content_hash,
};

const PAYEE: &str = "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEbb";

fn requirement(scheme: &str, network: &str, amount: &str) -> PaymentRequirement {
    PaymentRequirement {
        scheme: scheme.to_string(),
        network: network.to_string(),
        max_amount_required: amount.to_string(),
        resource: "/topup/10".to_string(),
        description: None,
        mime_type: None,
        output_schema: None,
        pay_to: PAYEE.to_string(),
        max_timeout_seconds: 300,
        asset: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string(),
        extra: None,
    }
}

fn swap_requirement(deadline: u64) -> PaymentRequirement {
    let mut requirement = requirement("swap", "8453", "10000000");
    requirement.extra = Some(json!({
        "contractAddress": "0x03059433BCdB6144624cC2443159D9445C32b7a8",
        "deadline": deadline,
        "feeAmount": "30000",
        "id": "0x000102030405060708090a0b0c0d0e0f",
        "operator": PAYEE,
        "signature": "0xdeadbeef",
    }));
    requirement
}

struct KeyAccount {
    wallet: LocalWallet,
}

impl KeyAccount {
    fn random() -> Self {
        Self {
            wallet: LocalWallet::new(&mut rand::thread_rng()),
        }
    }
}

#[async_trait]
impl ChainAccount for KeyAccount {
    fn address(&self) -> Address {
        self.wallet.address()
    }
    async fn sign(&self, _tx: &SettlementTransaction) -> Result<Bytes> {
        Ok(Bytes::new())
    }
    async fn submit(&self, _raw: Bytes, _network: &str) -> Result<H256> {
        Ok(H256::from_low_u64_be(7))
    }
    async fn sign_digest(&self, digest: H256) -> Result<Signature> {
        self.wallet
            .sign_hash(digest)
            .map_err(|e| PaymentError::Signing(e.to_string()))
    }
}

struct AlwaysConfirmed;

#[async_trait]
impl ChainReader for AlwaysConfirmed {
    async fn transaction_by_hash(&self, _hash: H256) -> Result<Option<ChainTransaction>> {
        Ok(Some(ChainTransaction {
            to: None,
            input: Vec::new(),
            value: U256::zero(),
            confirmed: true,
        }))
    }
}

#[test]
fn test_gate_challenge_matches_configured_price_and_payee() {
    let config = GateConfig::new(PAYEE, 10.0, "Credit top-up");
    let requirement = config.to_requirement("/topup/10").unwrap();

    assert_eq!(requirement.max_amount_required, "10000000");
    assert_eq!(requirement.pay_to, PAYEE);
    assert_eq!(requirement.max_timeout_seconds, 300);
}

#[test]
fn test_selection_prefers_configured_network() {
    let accepts = vec![
        requirement("swap", "A", "5"),
        requirement("swap", "B", "7"),
    ];
    let config = NegotiatorConfig::new(TxPolicy::new(500, U256::zero())).with_network("B");

    let selected = select_requirement(&accepts, &config).unwrap();
    assert_eq!(selected.network, "B");
    assert_eq!(selected.max_amount_required, "7");
}

#[test]
fn test_selection_failure_reaches_no_builder() {
    let accepts = vec![requirement("swap", "A", "5")];
    let config = NegotiatorConfig::new(TxPolicy::new(500, U256::zero())).with_network("B");

    assert!(matches!(
        select_requirement(&accepts, &config),
        Err(PaymentError::NoAcceptableRequirement)
    ));
}

#[test]
fn test_settlement_tx_round_trips_through_the_encoder() {
    let requirement = swap_requirement(current_timestamp() + 600);
    let buyer: Address = "0x1111111111111111111111111111111111111111".parse().unwrap();
    let policy = TxPolicy::new(500, U256::from(4_000_000_000_000_000u64));

    let tx = build_settlement_tx(&requirement, buyer, &policy).unwrap();
    let (call, fee_tier) = decode_swap_call(&tx.data).unwrap();

    assert_eq!(fee_tier, 500);
    assert_eq!(call.recipient_amount, U256::from(10_000_000u64));
    assert_eq!(call.recipient, PAYEE.parse::<Address>().unwrap());
    assert_eq!(call.refund_destination, buyer);
}

#[test]
fn test_stale_deadline_fails_before_signing() {
    let requirement = swap_requirement(current_timestamp() - 60);
    let buyer: Address = "0x1111111111111111111111111111111111111111".parse().unwrap();
    let policy = TxPolicy::new(500, U256::zero());

    let err = build_settlement_tx(&requirement, buyer, &policy).unwrap_err();
    assert!(matches!(err, PaymentError::Encoding(_)));
    assert!(!err.is_retryable());
}

#[test]
fn test_payment_header_round_trip() {
    let account = KeyAccount::random();
    let requirement = requirement("exact", "8453", "10000000");
    let policy = TxPolicy::new(500, U256::zero());

    let payload = tokio_test::block_on(
        schemes::for_key("exact")
            .unwrap()
            .build_proof(&requirement, &account, &policy),
    )
    .unwrap();

    let header = encode_payment_header(&payload).unwrap();
    let decoded = decode_payment_header(&header).unwrap();
    assert_eq!(decoded.scheme, "exact");
    assert_eq!(decoded.network, "8453");
}

#[tokio::test]
async fn test_gateway_accepts_voucher_then_rejects_replay() {
    let buyer = KeyAccount::random();
    let gate = PaymentGate::new(
        GateConfig::new(PAYEE, 10.0, "Credit top-up"),
        Arc::new(AlwaysConfirmed),
        Arc::new(KeyAccount::random()),
    );

    let resource = "/topup/10";
    let requirement = gate.config().to_requirement(resource).unwrap();
    let payload = schemes::for_key("exact")
        .unwrap()
        .build_proof(&requirement, &buyer, &TxPolicy::new(500, U256::zero()))
        .await
        .unwrap();
    let header = encode_payment_header(&payload).unwrap();

    // First presentation settles
    let receipt = gate.accept(&header, resource).await.unwrap();
    assert!(!receipt.tx_hash.is_empty());
    assert!(receipt.settled_at.is_some());

    // Identical proof before its deadline is a replay
    let err = gate.accept(&header, resource).await.unwrap_err();
    assert!(matches!(err, PaymentError::ReplayRejected(_)));
}

#[tokio::test]
async fn test_shared_replay_store_spans_routes() {
    let buyer = KeyAccount::random();
    let replay = Arc::new(ReplayStore::new());
    let chain: Arc<dyn ChainReader> = Arc::new(AlwaysConfirmed);
    let account: Arc<dyn ChainAccount> = Arc::new(KeyAccount::random());

    let gate_a = PaymentGate::new(
        GateConfig::new(PAYEE, 10.0, "Route A"),
        Arc::clone(&chain),
        Arc::clone(&account),
    )
    .with_shared_replay(Arc::clone(&replay));
    let gate_b = PaymentGate::new(
        GateConfig::new(PAYEE, 10.0, "Route B"),
        chain,
        account,
    )
    .with_shared_replay(replay);

    // Both routes demand the same payment shape, so one voucher satisfies
    // either; the shared store must still allow only one spend.
    let requirement = gate_a.config().to_requirement("/topup/10").unwrap();
    let payload = schemes::for_key("exact")
        .unwrap()
        .build_proof(&requirement, &buyer, &TxPolicy::new(500, U256::zero()))
        .await
        .unwrap();
    let header = encode_payment_header(&payload).unwrap();

    gate_a.accept(&header, "/topup/10").await.unwrap();
    let err = gate_b.accept(&header, "/topup/10").await.unwrap_err();
    assert!(matches!(err, PaymentError::ReplayRejected(_)));
}

#[tokio::test]
async fn test_gateway_rejects_scheme_mismatch() {
    let gate = PaymentGate::new(
        GateConfig::new(PAYEE, 10.0, "Credit top-up"),
        Arc::new(AlwaysConfirmed),
        Arc::new(KeyAccount::random()),
    );

    let payload = x402_credit::PaymentPayload {
        x402_version: 1,
        scheme: "swap".to_string(),
        network: "8453".to_string(),
        payload: json!({"txHash": "0x00"}),
    };
    let header = encode_payment_header(&payload).unwrap();

    let err = gate.accept(&header, "/topup/10").await.unwrap_err();
    assert!(matches!(err, PaymentError::Rejected(_)));
}

#[test]
fn test_proof_hash_is_the_idempotency_key() {
    let header = "c29tZS1wcm9vZg==";
    let store = ReplayStore::new();
    let expiry = current_timestamp() + 300;

    assert!(store.try_claim(proof_content_hash(header), expiry));
    assert!(!store.try_claim(proof_content_hash(header), expiry));
}

struct ScriptedSource {
    balances: Mutex<Vec<f64>>,
}

#[async_trait]
impl BalanceSource for ScriptedSource {
    async fn balance(&self) -> Result<f64> {
        Ok(self.balances.lock().unwrap().remove(0))
    }
}

struct CountingPurchaser {
    calls: AtomicUsize,
}

#[async_trait]
impl CreditPurchaser for CountingPurchaser {
    async fn purchase(&self, amount: f64) -> Result<PurchaseOutcome> {
        assert_eq!(amount, 10.0);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(PurchaseOutcome {
            status: 200,
            body: "{}".to_string(),
            receipt: None,
        })
    }
}

#[tokio::test]
async fn test_monitor_tops_up_once_and_sees_the_increase() {
    // Watermark 30, top-up 10, measured balance 25: one purchase; the next
    // cycle sees 35 and stays quiet.
    let source = Arc::new(ScriptedSource {
        balances: Mutex::new(vec![25.0, 35.0]),
    });
    let purchaser = Arc::new(CountingPurchaser {
        calls: AtomicUsize::new(0),
    });

    let mut monitor = BalanceMonitor::new(
        MonitorConfig {
            low_watermark: 30.0,
            top_up_amount: 10.0,
            check_interval: Duration::from_secs(60),
            retry_backoff: Duration::from_secs(5),
        },
        source,
        Arc::clone(&purchaser) as Arc<dyn CreditPurchaser>,
    );

    let pause = monitor.cycle().await;
    assert_eq!(purchaser.calls.load(Ordering::SeqCst), 1);
    assert_eq!(pause, Duration::from_secs(5));

    let pause = monitor.cycle().await;
    assert_eq!(purchaser.calls.load(Ordering::SeqCst), 1);
    assert_eq!(pause, Duration::from_secs(60));
    assert_eq!(monitor.state().current_balance, 35.0);
}

#[tokio::test]
async fn test_monitor_shutdown() {
    let source = Arc::new(ScriptedSource {
        balances: Mutex::new(vec![50.0; 64]),
    });
    let purchaser = Arc::new(CountingPurchaser {
        calls: AtomicUsize::new(0),
    });
    let monitor = BalanceMonitor::new(
        MonitorConfig {
            low_watermark: 30.0,
            top_up_amount: 10.0,
            check_interval: Duration::from_secs(60),
            retry_backoff: Duration::from_secs(5),
        },
        source,
        purchaser,
    );

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(monitor.run(rx));
    tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("monitor did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_negotiation_timeout_is_bounded() {
    let account = KeyAccount::random();
    let config = NegotiatorConfig::new(TxPolicy::new(500, U256::zero()))
        .with_timeout(Duration::ZERO);

    // The deadline elapses before the connection attempt can finish.
    let err = x402_credit::client::get(&config, &account, "http://127.0.0.1:9/never")
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::NegotiationTimeout(_)));
    assert!(err.is_retryable());
}

#[test]
fn test_unknown_scheme_is_rejected() {
    assert!(matches!(
        schemes::for_key("upto"),
        Err(PaymentError::UnsupportedScheme(_))
    ));
}
