//! Account service and chain access seams.
//!
//! The pipeline never talks to a chain directly: signing and submission go
//! through [`ChainAccount`], confirmation lookups through [`ChainReader`].
//! Both have ethers-backed implementations here; tests substitute mocks.
//!
//! A [`ChainAccount`] is created once at process startup and shared as an
//! `Arc` for the process lifetime. There is no hidden re-initialization.

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, Signature, H256, U256};

use crate::errors::{PaymentError, Result};
use crate::transaction::SettlementTransaction;
use crate::utils::chain_id_for;

/// Signing and submission capability bound to one chain account.
#[async_trait]
pub trait ChainAccount: Send + Sync {
    /// The account's address.
    fn address(&self) -> Address;

    /// Signs a settlement transaction, returning the raw broadcastable bytes.
    async fn sign(&self, tx: &SettlementTransaction) -> Result<Bytes>;

    /// Broadcasts a signed transaction to the given network and returns its
    /// hash. Broadcast is a point of no return: once submitted, only the
    /// local wait for confirmation can be abandoned.
    async fn submit(&self, raw: Bytes, network: &str) -> Result<H256>;

    /// Signs a 32-byte digest (voucher authorization hashes).
    async fn sign_digest(&self, digest: H256) -> Result<Signature>;
}

/// A transaction as observed on-chain, reduced to the fields verification
/// needs.
#[derive(Debug, Clone)]
pub struct ChainTransaction {
    /// Recipient contract, if any
    pub to: Option<Address>,

    /// Call data
    pub input: Vec<u8>,

    /// Native currency attached
    pub value: U256,

    /// Whether the transaction has been included in a block
    pub confirmed: bool,
}

/// Read-only chain access used by the gateway to audit payment proofs.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Looks up a transaction by hash. `None` when the chain has never seen
    /// it.
    async fn transaction_by_hash(&self, hash: H256) -> Result<Option<ChainTransaction>>;

    /// Whether a transaction has been mined.
    async fn is_confirmed(&self, hash: H256) -> Result<bool> {
        Ok(self
            .transaction_by_hash(hash)
            .await?
            .map(|tx| tx.confirmed)
            .unwrap_or(false))
    }
}

/// [`ChainAccount`] backed by a local private key and an HTTP JSON-RPC
/// provider.
pub struct LocalChainAccount {
    wallet: LocalWallet,
    provider: Provider<Http>,
    chain_id: u64,
}

impl LocalChainAccount {
    /// Connects to the RPC endpoint, resolves its chain id, and binds the
    /// key to it.
    pub async fn connect(private_key: &str, rpc_url: &str) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)?;
        let chain_id = provider.get_chainid().await?.as_u64();
        let wallet = private_key
            .parse::<LocalWallet>()
            .map_err(|e| PaymentError::Signing(format!("invalid private key: {e}")))?
            .with_chain_id(chain_id);

        tracing::info!(address = ?wallet.address(), chain_id, "chain account ready");

        Ok(Self {
            wallet,
            provider,
            chain_id,
        })
    }

    /// The chain id the account is bound to.
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

#[async_trait]
impl ChainAccount for LocalChainAccount {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign(&self, tx: &SettlementTransaction) -> Result<Bytes> {
        let request = Eip1559TransactionRequest::new()
            .from(self.wallet.address())
            .to(tx.to)
            .data(Bytes::from(tx.data.clone()))
            .value(tx.value)
            .chain_id(self.chain_id);

        let mut typed: TypedTransaction = request.into();
        // Fills nonce, gas limit, and fee-market parameters from the node.
        self.provider.fill_transaction(&mut typed, None).await?;

        let signature = self.wallet.sign_transaction(&typed).await?;
        Ok(typed.rlp_signed(&signature))
    }

    async fn submit(&self, raw: Bytes, network: &str) -> Result<H256> {
        let requested = chain_id_for(network)?;
        if requested != self.chain_id {
            return Err(PaymentError::UnsupportedNetwork(format!(
                "account is bound to chain {}, transaction targets {network}",
                self.chain_id
            )));
        }

        let pending = self.provider.send_raw_transaction(raw).await?;
        Ok(pending.tx_hash())
    }

    async fn sign_digest(&self, digest: H256) -> Result<Signature> {
        Ok(self.wallet.sign_hash(digest)?)
    }
}

/// [`ChainReader`] backed by an HTTP JSON-RPC provider.
pub struct HttpChainReader {
    provider: Provider<Http>,
}

impl HttpChainReader {
    /// Creates a reader for the given RPC endpoint.
    pub fn new(rpc_url: &str) -> Result<Self> {
        Ok(Self {
            provider: Provider::<Http>::try_from(rpc_url)?,
        })
    }
}

#[async_trait]
impl ChainReader for HttpChainReader {
    async fn transaction_by_hash(&self, hash: H256) -> Result<Option<ChainTransaction>> {
        let tx = self.provider.get_transaction(hash).await?;
        Ok(tx.map(|tx| ChainTransaction {
            to: tx.to,
            input: tx.input.to_vec(),
            value: tx.value,
            confirmed: tx.block_number.is_some(),
        }))
    }
}
