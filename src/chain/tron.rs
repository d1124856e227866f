//! TRON chain support for t402 payments.
//!
//! Payments on TRON are TRC-20 `transfer` calls. TRON reuses secp256k1 for
//! signing (the same curve EVM chains use — `k256` via `alloy-signer-local`
//! does the actual ECDSA work here) but addresses and transaction encoding are
//! TRON-specific: an address is `Base58Check(0x41 ++ keccak256(pubkey)[12..32])`,
//! and transactions are submitted to a TronGrid-shaped HTTP JSON API rather than
//! a JSON-RPC endpoint.
//!
//! The CAIP-2 reference for TRON mainnet is its genesis block id, following the
//! convention already used by `eip155`/`solana` chain references in this crate.

use alloy_primitives::keccak256;
use alloy_signer_local::PrivateKeySigner;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

use crate::chain::{ChainId, ChainProviderOps, FromConfig};
use crate::config::TronChainConfig;

/// The CAIP-2 namespace for TRON.
pub const TRON_NAMESPACE: &str = "tron";

/// A TRON network reference (its genesis block id, hex-encoded).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TronChainReference(String);

impl TronChainReference {
    pub fn new(genesis_block_id: impl Into<String>) -> Self {
        Self(genesis_block_id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// TRON mainnet.
    pub fn mainnet() -> Self {
        Self("0000000000000000000000000000000000000000000000000000000000000000".to_string())
    }
}

impl fmt::Display for TronChainReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for TronChainReference {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TronChainReference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Self(String::deserialize(deserializer)?))
    }
}

impl From<TronChainReference> for ChainId {
    fn from(value: TronChainReference) -> Self {
        ChainId::new(TRON_NAMESPACE, value.0)
    }
}

/// Error parsing a [`TronChainReference`] from a [`ChainId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TronChainReferenceFormatError {
    #[error("invalid namespace {0}, expected tron")]
    InvalidNamespace(String),
}

impl TryFrom<ChainId> for TronChainReference {
    type Error = TronChainReferenceFormatError;

    fn try_from(value: ChainId) -> Result<Self, Self::Error> {
        if value.namespace != TRON_NAMESPACE {
            return Err(TronChainReferenceFormatError::InvalidNamespace(
                value.namespace,
            ));
        }
        Ok(Self(value.reference))
    }
}

/// A TRON address: `0x41` (the "mainnet" address-version byte) followed by the
/// last 20 bytes of the keccak256 hash of an uncompressed secp256k1 public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TronAddress([u8; 21]);

#[derive(Debug, thiserror::Error)]
pub enum TronAddressParseError {
    #[error("invalid base58check encoding: {0}")]
    InvalidBase58(String),
    #[error("invalid address length: expected 25 bytes (21 + 4 checksum), got {0}")]
    InvalidLength(usize),
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("invalid address version byte: expected 0x41, got {0:#x}")]
    InvalidVersion(u8),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
}

impl TronAddress {
    /// Derives the TRON address that corresponds to a secp256k1 public key.
    pub fn from_public_key(signer: &PrivateKeySigner) -> Self {
        let uncompressed = signer
            .credential()
            .verifying_key()
            .to_encoded_point(false);
        let hash = keccak256(&uncompressed.as_bytes()[1..]);
        Self::from_hash20(hash[12..32].try_into().expect("20 bytes"))
    }

    /// Builds a TRON address from the last 20 bytes of `keccak256(pubkey)` —
    /// the same quantity an EVM address is made of, just with TRON's `0x41`
    /// version byte instead of none.
    pub fn from_hash20(hash: [u8; 20]) -> Self {
        let mut bytes = [0u8; 21];
        bytes[0] = 0x41;
        bytes[1..].copy_from_slice(&hash);
        Self(bytes)
    }

    /// Recovers the TRON address that signed `prehash`, given a 65-byte raw
    /// ECDSA signature (r || s || yParity).
    pub fn recover(
        prehash: &alloy_primitives::B256,
        signature: &[u8],
    ) -> Result<Self, TronAddressParseError> {
        let signature = alloy_primitives::Signature::from_raw(signature)
            .map_err(|e| TronAddressParseError::InvalidSignature(e.to_string()))?;
        let address = signature
            .recover_address_from_prehash(prehash)
            .map_err(|e| TronAddressParseError::InvalidSignature(e.to_string()))?;
        Ok(Self::from_hash20(address.into_array()))
    }

    fn checksum(payload: &[u8]) -> [u8; 4] {
        let first = Sha256::digest(payload);
        let second = Sha256::digest(first);
        let mut out = [0u8; 4];
        out.copy_from_slice(&second[..4]);
        out
    }

    pub fn to_base58check(&self) -> String {
        let mut payload = self.0.to_vec();
        payload.extend_from_slice(&Self::checksum(&self.0));
        bs58::encode(payload).into_string()
    }

    /// The address as a plain hex string with the `0x41` version byte, the
    /// format TronGrid's HTTP API expects for contract call parameters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for TronAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58check())
    }
}

impl std::str::FromStr for TronAddress {
    type Err = TronAddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = bs58::decode(s)
            .into_vec()
            .map_err(|e| TronAddressParseError::InvalidBase58(e.to_string()))?;
        if decoded.len() != 25 {
            return Err(TronAddressParseError::InvalidLength(decoded.len()));
        }
        let (payload, checksum) = decoded.split_at(21);
        if Self::checksum(payload) != checksum {
            return Err(TronAddressParseError::ChecksumMismatch);
        }
        if payload[0] != 0x41 {
            return Err(TronAddressParseError::InvalidVersion(payload[0]));
        }
        let mut bytes = [0u8; 21];
        bytes.copy_from_slice(payload);
        Ok(Self(bytes))
    }
}

impl Serialize for TronAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_base58check())
    }
}

impl<'de> Deserialize<'de> for TronAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A TRC-20 token deployment: the contract address and its decimal precision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Trc20Deployment {
    pub chain_reference: TronChainReference,
    pub contract_address: TronAddress,
    pub decimals: u8,
}

#[allow(dead_code)] // Public for consumption by downstream crates.
impl Trc20Deployment {
    pub fn new(
        chain_reference: TronChainReference,
        contract_address: TronAddress,
        decimals: u8,
    ) -> Self {
        Self {
            chain_reference,
            contract_address,
            decimals,
        }
    }

    /// Creates a token amount from a raw value, already in the token's smallest unit.
    pub fn amount<V: Into<alloy_primitives::U256>>(
        &self,
        v: V,
    ) -> crate::chain::DeployedTokenAmount<alloy_primitives::U256, Trc20Deployment> {
        crate::chain::DeployedTokenAmount {
            amount: v.into(),
            token: self.clone(),
        }
    }

    /// Parses a human-readable amount string into token units, scaled by decimals.
    pub fn parse<V>(
        &self,
        v: V,
    ) -> Result<
        crate::chain::DeployedTokenAmount<alloy_primitives::U256, Trc20Deployment>,
        crate::util::amount::MoneyAmountParseError,
    >
    where
        V: TryInto<crate::util::amount::MoneyAmount>,
        crate::util::amount::MoneyAmountParseError:
            From<<V as TryInto<crate::util::amount::MoneyAmount>>::Error>,
    {
        let money_amount = v.try_into()?;
        let scale = money_amount.scale();
        let token_scale = self.decimals as u32;
        if scale > token_scale {
            return Err(crate::util::amount::MoneyAmountParseError::WrongPrecision {
                money: scale,
                token: token_scale,
            });
        }
        let scale_diff = token_scale - scale;
        let multiplier = alloy_primitives::U256::from(10).pow(alloy_primitives::U256::from(scale_diff));
        let digits = money_amount.mantissa();
        let value = alloy_primitives::U256::from(digits) * multiplier;
        Ok(crate::chain::DeployedTokenAmount {
            amount: value,
            token: self.clone(),
        })
    }
}

/// Errors from TRON chain provider operations.
#[derive(Debug, thiserror::Error)]
pub enum TronChainProviderError {
    #[error("TRON RPC error: {0}")]
    Rpc(String),
    #[error("failed to sign transaction: {0}")]
    Sign(String),
    #[error("transaction submission failed: {0}")]
    SubmissionFailed(String),
}

/// Operations a TRON "exact" scheme facilitator needs from its chain provider.
///
/// A TRC-20 transfer is single-signer: the payer signs the whole transaction
/// themselves (and pays its bandwidth/energy out of their own account), so
/// unlike the EVM/Solana backends the facilitator never co-signs here — it only
/// verifies the payer's already-signed transaction matches the payment
/// requirements, then relays it.
#[async_trait::async_trait]
pub trait TronChainProviderLike {
    /// The facilitator's own address, advertised in `/supported` even though it
    /// never signs a settlement — useful for operators who route delegated
    /// bandwidth/energy to it out-of-band.
    fn address(&self) -> TronAddress;
    /// Maximum fee, in SUN, a settlement transaction's `fee_limit` field may carry.
    fn fee_limit(&self) -> u64;
    /// Fetches a transaction's on-chain info (confirmation status, receipt) by id.
    async fn get_transaction_info(
        &self,
        tx_id: &str,
    ) -> Result<serde_json::Value, TronChainProviderError>;
    /// Broadcasts an already fully-signed transaction (TronGrid's transaction
    /// object, including its `signature` array).
    async fn broadcast(
        &self,
        transaction: serde_json::Value,
    ) -> Result<serde_json::Value, TronChainProviderError>;
}

/// Provider for interacting with the TRON blockchain via a TronGrid-shaped HTTP API.
pub struct TronChainProvider {
    signer: PrivateKeySigner,
    address: TronAddress,
    chain: TronChainReference,
    fee_limit: u64,
    http: Client,
    rpc_base: url::Url,
}

impl fmt::Debug for TronChainProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TronChainProvider")
            .field("address", &self.address.to_string())
            .field("chain", &self.chain)
            .field("rpc_base", &self.rpc_base.as_str())
            .finish()
    }
}

#[async_trait::async_trait]
impl FromConfig<TronChainConfig> for TronChainProvider {
    async fn from_config(config: &TronChainConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let rpc_base = config.rpc().clone();
        let chain = config.chain_reference();
        let fee_limit = config.fee_limit();
        let signer = PrivateKeySigner::from_bytes(&alloy_primitives::B256::from(
            *config.signer().as_bytes(),
        ))?;
        let address = TronAddress::from_public_key(&signer);

        tracing::info!(
            chain = %chain,
            address = %address,
            rpc = %rpc_base,
            fee_limit,
            "Initialized TRON provider"
        );

        Ok(Self {
            signer,
            address,
            chain,
            fee_limit,
            http: Client::new(),
            rpc_base,
        })
    }
}

impl ChainProviderOps for TronChainProvider {
    fn signer_addresses(&self) -> Vec<String> {
        vec![self.address.to_string()]
    }

    fn chain_id(&self) -> ChainId {
        self.chain.clone().into()
    }
}

impl ChainProviderOps for Arc<TronChainProvider> {
    fn signer_addresses(&self) -> Vec<String> {
        (**self).signer_addresses()
    }

    fn chain_id(&self) -> ChainId {
        (**self).chain_id()
    }
}

impl TronChainProvider {
    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, TronChainProviderError> {
        let url = self
            .rpc_base
            .join(path)
            .map_err(|e| TronChainProviderError::Rpc(e.to_string()))?;
        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TronChainProviderError::Rpc(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| TronChainProviderError::Rpc(e.to_string()))
    }
}

#[async_trait::async_trait]
impl TronChainProviderLike for TronChainProvider {
    fn address(&self) -> TronAddress {
        self.address
    }

    fn fee_limit(&self) -> u64 {
        self.fee_limit
    }

    async fn get_transaction_info(
        &self,
        tx_id: &str,
    ) -> Result<serde_json::Value, TronChainProviderError> {
        self.post(
            "wallet/gettransactioninfobyid",
            serde_json::json!({ "value": tx_id }),
        )
        .await
    }

    async fn broadcast(
        &self,
        transaction: serde_json::Value,
    ) -> Result<serde_json::Value, TronChainProviderError> {
        if transaction
            .get("signature")
            .and_then(|v| v.as_array())
            .is_none_or(|sigs| sigs.is_empty())
        {
            return Err(TronChainProviderError::Sign(
                "transaction carries no signature".to_string(),
            ));
        }
        let result = self.post("wallet/broadcasttransaction", transaction).await?;
        if result.get("result").and_then(|v| v.as_bool()) == Some(false) {
            let message = result
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown TronGrid error")
                .to_string();
            return Err(TronChainProviderError::SubmissionFailed(message));
        }
        Ok(result)
    }
}

#[async_trait::async_trait]
impl TronChainProviderLike for Arc<TronChainProvider> {
    fn address(&self) -> TronAddress {
        (**self).address()
    }

    fn fee_limit(&self) -> u64 {
        (**self).fee_limit()
    }

    async fn get_transaction_info(
        &self,
        tx_id: &str,
    ) -> Result<serde_json::Value, TronChainProviderError> {
        (**self).get_transaction_info(tx_id).await
    }

    async fn broadcast(
        &self,
        transaction: serde_json::Value,
    ) -> Result<serde_json::Value, TronChainProviderError> {
        (**self).broadcast(transaction).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_signer::SignerSync;

    #[test]
    fn address_round_trips_through_base58check() {
        let signer = PrivateKeySigner::random();
        let address = TronAddress::from_public_key(&signer);
        let encoded = address.to_base58check();
        let decoded: TronAddress = encoded.parse().unwrap();
        assert_eq!(address, decoded);
    }

    #[test]
    fn address_rejects_bad_checksum() {
        let signer = PrivateKeySigner::random();
        let address = TronAddress::from_public_key(&signer);
        let mut encoded = address.to_base58check();
        encoded.push('x');
        assert!(encoded.parse::<TronAddress>().is_err());
    }

    #[test]
    fn recover_matches_the_signing_key_address() {
        let signer = PrivateKeySigner::random();
        let expected = TronAddress::from_public_key(&signer);
        let prehash = alloy_primitives::B256::from([7u8; 32]);
        let signature = signer.sign_hash_sync(&prehash).unwrap();
        let recovered = TronAddress::recover(&prehash, &signature.as_bytes()).unwrap();
        assert_eq!(expected, recovered);
    }

    #[test]
    fn chain_reference_round_trips_through_chain_id() {
        let mainnet = TronChainReference::mainnet();
        let chain_id: ChainId = mainnet.clone().into();
        assert_eq!(chain_id.namespace, "tron");

        let back: TronChainReference = chain_id.try_into().unwrap();
        assert_eq!(back, mainnet);
    }
}
