//! The "exact" scheme: signed off-chain transfer vouchers.
//!
//! The buyer signs an EIP-3009 `transferWithAuthorization` voucher for
//! exactly the required amount. Verification is pure signature recovery plus
//! field checks, so it needs no chain access; settlement is the gateway
//! submitting the authorized transfer through its own account.

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::core::utils::keccak256;
use ethers::types::{Address, Signature, H256, U256};
use serde_json::json;

use crate::account::{ChainAccount, ChainReader};
use crate::errors::{PaymentError, Result};
use crate::schemes::{await_confirmation, Scheme, SettleContext};
use crate::transaction::{sign_and_submit, SettlementTransaction, TxPolicy};
use crate::types::{
    PaymentPayload, PaymentRequirement, SettlementReceipt, TransferVoucher, X402_VERSION,
};
use crate::utils::{
    chain_id_for, current_timestamp, generate_nonce, parse_address, parse_hex_bytes,
    string_to_u256,
};

// EIP-712 domain defaults for tokens that do not advertise their own
const DOMAIN_NAME: &str = "USD Coin";
const DOMAIN_VERSION: &str = "2";

const TRANSFER_AUTHORIZATION_TYPE: &[u8] =
    b"TransferWithAuthorization(address from,address to,uint256 value,uint256 validAfter,uint256 validBefore,bytes32 nonce)";

const DOMAIN_TYPE: &[u8] =
    b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

const TRANSFER_WITH_AUTHORIZATION_SIGNATURE: &str =
    "transferWithAuthorization(address,address,uint256,uint256,uint256,bytes32,uint8,bytes32,bytes32)";

/// Scheme implementation for signed transfer vouchers.
pub struct ExactVoucher;

impl ExactVoucher {
    fn domain_separator(token: Address, chain_id: U256, name: &str, version: &str) -> H256 {
        let type_hash = keccak256(DOMAIN_TYPE);

        H256::from(keccak256(encode(&[
            Token::FixedBytes(type_hash.to_vec()),
            Token::FixedBytes(keccak256(name.as_bytes()).to_vec()),
            Token::FixedBytes(keccak256(version.as_bytes()).to_vec()),
            Token::Uint(chain_id),
            Token::Address(token),
        ])))
    }

    fn authorization_digest(
        from: Address,
        to: Address,
        value: U256,
        valid_after: U256,
        valid_before: U256,
        nonce: H256,
        domain_separator: H256,
    ) -> H256 {
        let type_hash = keccak256(TRANSFER_AUTHORIZATION_TYPE);

        let struct_hash = keccak256(encode(&[
            Token::FixedBytes(type_hash.to_vec()),
            Token::Address(from),
            Token::Address(to),
            Token::Uint(value),
            Token::Uint(valid_after),
            Token::Uint(valid_before),
            Token::FixedBytes(nonce.as_bytes().to_vec()),
        ]));

        // "\x19\x01" || domainSeparator || hashStruct(message)
        let mut message = Vec::with_capacity(2 + 32 + 32);
        message.extend_from_slice(b"\x19\x01");
        message.extend_from_slice(domain_separator.as_bytes());
        message.extend_from_slice(&struct_hash);

        H256::from(keccak256(&message))
    }

    /// Token EIP-712 name and version from the requirement's `extra`, with
    /// stablecoin defaults.
    fn token_domain(requirement: &PaymentRequirement) -> (String, String) {
        let name = requirement
            .extra
            .as_ref()
            .and_then(|e| e.get("name"))
            .and_then(|v| v.as_str())
            .unwrap_or(DOMAIN_NAME);
        let version = requirement
            .extra
            .as_ref()
            .and_then(|e| e.get("version"))
            .and_then(|v| v.as_str())
            .unwrap_or(DOMAIN_VERSION);
        (name.to_string(), version.to_string())
    }

    fn voucher_digest(
        voucher: &TransferVoucher,
        requirement: &PaymentRequirement,
    ) -> Result<H256> {
        let asset = parse_address(&requirement.asset)?;
        let chain_id = U256::from(chain_id_for(&requirement.network)?);
        let (name, version) = Self::token_domain(requirement);

        let nonce = parse_nonce(&voucher.nonce)?;
        let domain_separator = Self::domain_separator(asset, chain_id, &name, &version);

        Ok(Self::authorization_digest(
            parse_address(&voucher.from)?,
            parse_address(&voucher.to)?,
            string_to_u256(&voucher.value)?,
            string_to_u256(&voucher.valid_after)?,
            string_to_u256(&voucher.valid_before)?,
            nonce,
            domain_separator,
        ))
    }
}

fn voucher_from(payload: &PaymentPayload) -> Result<TransferVoucher> {
    serde_json::from_value(payload.payload.clone())
        .map_err(|e| PaymentError::VerificationFailed(format!("malformed voucher: {e}")))
}

fn parse_nonce(nonce: &str) -> Result<H256> {
    let bytes = parse_hex_bytes(nonce)?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| PaymentError::VerificationFailed("voucher nonce must be 32 bytes".to_string()))?;
    Ok(H256::from(bytes))
}

fn signature_bytes(signature: &Signature) -> [u8; 65] {
    let mut out = [0u8; 65];
    signature.r.to_big_endian(&mut out[0..32]);
    signature.s.to_big_endian(&mut out[32..64]);
    out[64] = signature.v as u8;
    out
}

fn parse_signature(hex_sig: &str) -> Result<Signature> {
    let bytes = parse_hex_bytes(hex_sig)?;
    if bytes.len() != 65 {
        return Err(PaymentError::VerificationFailed(format!(
            "voucher signature must be 65 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(Signature::try_from(bytes.as_slice())?)
}

/// Call data for the on-chain `transferWithAuthorization` submission.
fn encode_transfer_call(voucher: &TransferVoucher) -> Result<Vec<u8>> {
    let signature = parse_signature(&voucher.signature)?;
    let raw = signature_bytes(&signature);

    let selector = keccak256(TRANSFER_WITH_AUTHORIZATION_SIGNATURE.as_bytes());
    let args = encode(&[
        Token::Address(parse_address(&voucher.from)?),
        Token::Address(parse_address(&voucher.to)?),
        Token::Uint(string_to_u256(&voucher.value)?),
        Token::Uint(string_to_u256(&voucher.valid_after)?),
        Token::Uint(string_to_u256(&voucher.valid_before)?),
        Token::FixedBytes(parse_nonce(&voucher.nonce)?.as_bytes().to_vec()),
        Token::Uint(U256::from(raw[64])),
        Token::FixedBytes(raw[0..32].to_vec()),
        Token::FixedBytes(raw[32..64].to_vec()),
    ]);

    let mut data = Vec::with_capacity(4 + args.len());
    data.extend_from_slice(&selector[..4]);
    data.extend_from_slice(&args);
    Ok(data)
}

#[async_trait]
impl Scheme for ExactVoucher {
    fn key(&self) -> &'static str {
        "exact"
    }

    async fn build_proof(
        &self,
        requirement: &PaymentRequirement,
        account: &dyn ChainAccount,
        _policy: &TxPolicy,
    ) -> Result<PaymentPayload> {
        let from = account.address();
        let to = parse_address(&requirement.pay_to)?;
        let value = string_to_u256(&requirement.max_amount_required)?;
        let asset = parse_address(&requirement.asset)?;
        let chain_id = U256::from(chain_id_for(&requirement.network)?);

        let nonce_bytes = generate_nonce();
        let nonce = H256::from(nonce_bytes);
        let now = current_timestamp();
        let valid_after = U256::from(now);
        let valid_before = U256::from(now + requirement.max_timeout_seconds);

        let (name, version) = Self::token_domain(requirement);
        let domain_separator = Self::domain_separator(asset, chain_id, &name, &version);
        let digest = Self::authorization_digest(
            from,
            to,
            value,
            valid_after,
            valid_before,
            nonce,
            domain_separator,
        );

        let signature = account.sign_digest(digest).await?;

        let voucher = TransferVoucher {
            from: format!("{from:?}"),
            to: format!("{to:?}"),
            value: value.to_string(),
            valid_after: valid_after.to_string(),
            valid_before: valid_before.to_string(),
            nonce: format!("0x{}", hex::encode(nonce_bytes)),
            signature: format!("0x{}", hex::encode(signature_bytes(&signature))),
        };

        Ok(PaymentPayload {
            x402_version: X402_VERSION,
            scheme: self.key().to_string(),
            network: requirement.network.clone(),
            payload: json!(voucher),
        })
    }

    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
        _chain: &dyn ChainReader,
    ) -> Result<()> {
        let voucher = voucher_from(payload)?;

        let to = parse_address(&voucher.to)?;
        if to != parse_address(&requirement.pay_to)? {
            return Err(PaymentError::VerificationFailed(
                "voucher pays the wrong recipient".to_string(),
            ));
        }

        let value = string_to_u256(&voucher.value)?;
        if value != string_to_u256(&requirement.max_amount_required)? {
            return Err(PaymentError::VerificationFailed(
                "voucher value does not match the requirement".to_string(),
            ));
        }

        let now = U256::from(current_timestamp());
        if now < string_to_u256(&voucher.valid_after)? || now > string_to_u256(&voucher.valid_before)?
        {
            return Err(PaymentError::VerificationFailed(
                "voucher outside its validity window".to_string(),
            ));
        }

        let from = parse_address(&voucher.from)?;
        let digest = Self::voucher_digest(&voucher, requirement)?;
        let signature = parse_signature(&voucher.signature)?;
        let recovered = signature.recover(digest)?;

        if recovered != from {
            return Err(PaymentError::VerificationFailed(
                "voucher signature does not recover to the payer".to_string(),
            ));
        }

        Ok(())
    }

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
        ctx: &SettleContext<'_>,
    ) -> Result<SettlementReceipt> {
        let voucher = voucher_from(payload)?;

        let tx = SettlementTransaction {
            to: parse_address(&requirement.asset)?,
            data: encode_transfer_call(&voucher)?,
            value: U256::zero(),
            network: requirement.network.clone(),
        };

        let hash = sign_and_submit(&tx, ctx.account).await?;
        await_confirmation(ctx.chain, hash, ctx.confirm_wait).await?;

        Ok(SettlementReceipt {
            tx_hash: format!("{hash:?}"),
            settled_at: Some(chrono::Utc::now().to_rfc3339()),
            network: Some(requirement.network.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::{LocalWallet, Signer};
    use ethers::types::Bytes;

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
            Err(PaymentError::Signing("offline".to_string()))
        }
        async fn submit(&self, _raw: Bytes, _network: &str) -> Result<H256> {
            Err(PaymentError::Signing("offline".to_string()))
        }
        async fn sign_digest(&self, digest: H256) -> Result<Signature> {
            Ok(self.wallet.sign_hash(digest)?)
        }
    }

    struct NoChain;

    #[async_trait]
    impl ChainReader for NoChain {
        async fn transaction_by_hash(
            &self,
            _hash: H256,
        ) -> Result<Option<crate::account::ChainTransaction>> {
            Ok(None)
        }
    }

    fn requirement() -> PaymentRequirement {
        PaymentRequirement {
            scheme: "exact".to_string(),
            network: "8453".to_string(),
            max_amount_required: "10000000".to_string(),
            resource: "/topup/10".to_string(),
            description: None,
            mime_type: None,
            output_schema: None,
            pay_to: "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEbb".to_string(),
            max_timeout_seconds: 300,
            asset: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string(),
            extra: Some(json!({"name": "USD Coin", "version": "2"})),
        }
    }

    #[tokio::test]
    async fn test_voucher_build_and_verify_round_trip() {
        let account = KeyAccount::random();
        let requirement = requirement();
        let policy = TxPolicy::new(500, U256::zero());

        let payload = ExactVoucher
            .build_proof(&requirement, &account, &policy)
            .await
            .unwrap();
        assert_eq!(payload.scheme, "exact");

        ExactVoucher
            .verify(&payload, &requirement, &NoChain)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_verify_rejects_foreign_signer() {
        let signer = KeyAccount::random();
        let requirement = requirement();
        let policy = TxPolicy::new(500, U256::zero());

        let payload = ExactVoucher
            .build_proof(&requirement, &signer, &policy)
            .await
            .unwrap();

        // Claim the voucher came from someone else
        let mut voucher: TransferVoucher =
            serde_json::from_value(payload.payload.clone()).unwrap();
        voucher.from = format!("{:?}", KeyAccount::random().address());
        let forged = PaymentPayload {
            payload: json!(voucher),
            ..payload.clone()
        };

        let err = ExactVoucher
            .verify(&forged, &requirement, &NoChain)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::VerificationFailed(_)));
    }

    #[tokio::test]
    async fn test_verify_rejects_expired_voucher() {
        let account = KeyAccount::random();
        let requirement = requirement();
        let policy = TxPolicy::new(500, U256::zero());

        let payload = ExactVoucher
            .build_proof(&requirement, &account, &policy)
            .await
            .unwrap();

        // A voucher presented after its window closed is re-evaluated and
        // rejected on the window alone, replay store or not.
        let mut voucher: TransferVoucher =
            serde_json::from_value(payload.payload.clone()).unwrap();
        voucher.valid_before = "1".to_string();
        let stale = PaymentPayload {
            payload: json!(voucher),
            ..payload
        };

        let err = ExactVoucher
            .verify(&stale, &requirement, &NoChain)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::VerificationFailed(_)));
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_value() {
        let account = KeyAccount::random();
        let requirement = requirement();
        let policy = TxPolicy::new(500, U256::zero());

        let payload = ExactVoucher
            .build_proof(&requirement, &account, &policy)
            .await
            .unwrap();

        let mut demanded = requirement;
        demanded.max_amount_required = "20000000".to_string();

        assert!(ExactVoucher
            .verify(&payload, &demanded, &NoChain)
            .await
            .is_err());
    }

    #[test]
    fn test_domain_separator_varies_with_chain() {
        let token: Address = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".parse().unwrap();
        let mainnet = ExactVoucher::domain_separator(token, U256::from(8453u64), "USD Coin", "2");
        let sepolia = ExactVoucher::domain_separator(token, U256::from(84532u64), "USD Coin", "2");
        assert_ne!(mainnet, sepolia);
        assert_ne!(mainnet, H256::zero());
    }

    #[test]
    fn test_transfer_call_encoding() {
        // 65-byte dummy signature with a valid v
        let mut sig = vec![0x11u8; 64];
        sig.push(27);

        let voucher = TransferVoucher {
            from: "0x1111111111111111111111111111111111111111".to_string(),
            to: "0x2222222222222222222222222222222222222222".to_string(),
            value: "1000000".to_string(),
            valid_after: "0".to_string(),
            valid_before: "9999999999".to_string(),
            nonce: format!("0x{}", hex::encode([0x42u8; 32])),
            signature: format!("0x{}", hex::encode(sig)),
        };

        let data = encode_transfer_call(&voucher).unwrap();
        // Selector plus nine 32-byte words, all arguments static
        assert_eq!(data.len(), 4 + 9 * 32);
    }

    #[test]
    fn test_malformed_signature_rejected() {
        assert!(parse_signature("0x1234").is_err());
        assert!(parse_nonce("0x1234").is_err());
    }
}
