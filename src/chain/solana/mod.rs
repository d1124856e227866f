//! Solana chain support for t402 payments.
//!
//! This module provides the types and provider for interacting with the Solana
//! blockchain. Payments are SPL Token / Token-2022 `TransferChecked` instructions,
//! verified by transaction introspection and settled by co-signing and submitting
//! the already-built transaction the payer handed the facilitator.
//!
//! # Key Types
//!
//! - [`SolanaChainReference`] - the 32-character genesis hash prefix identifying a
//!   Solana cluster (e.g. mainnet, devnet).
//! - [`SolanaChainProvider`] - the provider the facilitator uses to sign, simulate,
//!   and submit transactions.
//! - [`SolanaTokenDeployment`] - an SPL token's mint address and decimals on a
//!   given cluster.
//!
//! The transaction-introspection logic (`verify_transfer_instruction`, instruction
//! layout validation, etc.) lives in [`crate::scheme::v1_solana_exact`], generic
//! over [`SolanaChainProviderLike`] so it can be exercised against a fake provider
//! in tests without an RPC endpoint.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use solana_account::Account;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::SerializableTransaction;
use solana_client::rpc_config::{
    RpcSendTransactionConfig, RpcSignatureSubscribeConfig, RpcSimulateTransactionConfig,
};
use solana_client::rpc_response::RpcSignatureResult;
use solana_commitment_config::CommitmentConfig;
use solana_keypair::Keypair;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_signer::Signer;
use solana_transaction::versioned::VersionedTransaction;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::chain::{ChainId, ChainProviderOps, DeployedTokenAmount, FromConfig};
use crate::config::SolanaChainConfig;
use crate::util::amount::{MoneyAmount, MoneyAmountParseError};

/// The CAIP-2 namespace for Solana clusters.
pub const SOLANA_NAMESPACE: &str = "solana";

/// A Solana cluster reference: the first 32 characters of the base58-encoded
/// genesis block hash, which uniquely identifies mainnet, devnet, etc.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SolanaChainReference([u8; 32]);

impl SolanaChainReference {
    /// Creates a chain reference from a raw 32-character genesis hash prefix.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the chain reference as a string.
    pub fn as_str(&self) -> &str {
        // Safe because we validate ASCII on construction.
        std::str::from_utf8(&self.0).expect("SolanaChainReference contains valid ASCII")
    }

    /// Solana mainnet-beta.
    pub fn mainnet() -> Self {
        Self(*b"5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp")
    }

    /// Alias for [`SolanaChainReference::mainnet`].
    pub fn solana() -> Self {
        Self::mainnet()
    }

    /// Solana devnet.
    pub fn devnet() -> Self {
        Self(*b"EtWTRABZaYq6iMfeYKouRu166VU2xqa1")
    }
}

/// Error parsing a [`SolanaChainReference`] from a string or [`ChainId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SolanaChainReferenceFormatError {
    #[error("Invalid namespace {0}, expected solana")]
    InvalidNamespace(String),
    #[error("invalid length: expected 32 characters, got {0}")]
    InvalidLength(usize),
    #[error("genesis hash contains non-ASCII characters")]
    NonAscii,
}

impl FromStr for SolanaChainReference {
    type Err = SolanaChainReferenceFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            return Err(SolanaChainReferenceFormatError::InvalidLength(s.len()));
        }
        if !s.is_ascii() {
            return Err(SolanaChainReferenceFormatError::NonAscii);
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(s.as_bytes());
        Ok(Self(bytes))
    }
}

impl fmt::Display for SolanaChainReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SolanaChainReference {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SolanaChainReference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl From<SolanaChainReference> for ChainId {
    fn from(value: SolanaChainReference) -> Self {
        ChainId::new(SOLANA_NAMESPACE, value.as_str().to_string())
    }
}

impl TryFrom<ChainId> for SolanaChainReference {
    type Error = SolanaChainReferenceFormatError;

    fn try_from(value: ChainId) -> Result<Self, Self::Error> {
        if value.namespace != SOLANA_NAMESPACE {
            return Err(SolanaChainReferenceFormatError::InvalidNamespace(
                value.namespace,
            ));
        }
        Self::from_str(&value.reference)
    }
}

/// A Solana public key, as carried on the wire (base58-encoded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(Pubkey);

impl Address {
    pub fn new(pubkey: Pubkey) -> Self {
        Self(pubkey)
    }

    pub fn pubkey(&self) -> &Pubkey {
        &self.0
    }
}

impl From<Pubkey> for Address {
    fn from(pubkey: Pubkey) -> Self {
        Self(pubkey)
    }
}

impl From<Address> for Pubkey {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid Solana address: {0}")]
pub struct AddressParseError(String);

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pubkey::from_str(s)
            .map(Address)
            .map_err(|_| AddressParseError(s.to_string()))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An SPL token deployment: its mint address, decimals, and the cluster it lives on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(dead_code)] // Public for consumption by downstream crates.
pub struct SolanaTokenDeployment {
    /// The cluster this mint is deployed on.
    pub chain_reference: SolanaChainReference,
    /// The mint address.
    pub address: Address,
    /// Number of decimal places (e.g. 6 for USDC).
    pub decimals: u8,
}

#[allow(dead_code)] // Public for consumption by downstream crates.
impl SolanaTokenDeployment {
    pub fn new(chain_reference: SolanaChainReference, address: Address, decimals: u8) -> Self {
        Self {
            chain_reference,
            address,
            decimals,
        }
    }

    /// Creates a token amount from a raw value already in the token's smallest unit.
    pub fn amount(&self, v: u64) -> DeployedTokenAmount<u64, SolanaTokenDeployment> {
        DeployedTokenAmount {
            amount: v,
            token: self.clone(),
        }
    }

    /// Parses a human-readable amount string (`"10.50"`, `"$10.50"`, `"1,000"`) into
    /// token units, scaled by this deployment's decimals.
    pub fn parse<V>(
        &self,
        v: V,
    ) -> Result<DeployedTokenAmount<u64, SolanaTokenDeployment>, MoneyAmountParseError>
    where
        V: TryInto<MoneyAmount>,
        MoneyAmountParseError: From<<V as TryInto<MoneyAmount>>::Error>,
    {
        let money_amount = v.try_into()?;
        let scale = money_amount.scale();
        let token_scale = self.decimals as u32;
        if scale > token_scale {
            return Err(MoneyAmountParseError::WrongPrecision {
                money: scale,
                token: token_scale,
            });
        }
        let scale_diff = token_scale - scale;
        let multiplier = 10u128.pow(scale_diff);
        let digits = money_amount.mantissa();
        let value = digits
            .checked_mul(multiplier)
            .and_then(|v| u64::try_from(v).ok())
            .ok_or_else(|| MoneyAmountParseError::InvalidFormat(format!("{digits}")))?;
        Ok(DeployedTokenAmount {
            amount: value,
            token: self.clone(),
        })
    }
}

/// Provider for interacting with the Solana blockchain.
///
/// Holds the facilitator's fee-payer keypair, an RPC client for reads/simulation/
/// submission, and an optional pubsub client used to watch for transaction
/// confirmation over a websocket instead of polling.
pub struct SolanaChainProvider {
    keypair: Arc<Keypair>,
    chain: SolanaChainReference,
    rpc_client: Arc<RpcClient>,
    pubsub_client: Arc<Option<PubsubClient>>,
    max_compute_unit_limit: u32,
    max_compute_unit_price: u64,
}

impl fmt::Debug for SolanaChainProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolanaChainProvider")
            .field("pubkey", &self.keypair.pubkey())
            .field("chain", &self.chain)
            .field("rpc_url", &self.rpc_client.url())
            .finish()
    }
}

/// Creates a new provider from configuration.
///
/// # Errors
///
/// Returns an error if the signer key is invalid or the pubsub client fails to connect.
#[async_trait::async_trait]
impl FromConfig<SolanaChainConfig> for SolanaChainProvider {
    async fn from_config(config: &SolanaChainConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let rpc_url = config.rpc().to_string();
        let pubsub_url = config.pubsub().clone().map(|url| url.to_string());
        let keypair = Keypair::from_base58_string(&config.signer().to_base58());
        let max_compute_unit_limit = config.max_compute_unit_limit();
        let max_compute_unit_price = config.max_compute_unit_price();
        let chain = config.chain_reference();

        let chain_id: ChainId = chain.into();
        tracing::info!(
            chain = %chain_id,
            rpc = rpc_url,
            pubsub = ?pubsub_url,
            signer = %keypair.pubkey(),
            max_compute_unit_limit,
            max_compute_unit_price,
            "Initialized Solana provider"
        );

        let rpc_client = RpcClient::new(rpc_url);
        let pubsub_client = match pubsub_url {
            Some(pubsub_url) => Some(PubsubClient::new(&pubsub_url).await?),
            None => None,
        };

        Ok(Self {
            keypair: Arc::new(keypair),
            chain,
            rpc_client: Arc::new(rpc_client),
            pubsub_client: Arc::new(pubsub_client),
            max_compute_unit_limit,
            max_compute_unit_price,
        })
    }
}

impl ChainProviderOps for SolanaChainProvider {
    fn signer_addresses(&self) -> Vec<String> {
        vec![self.keypair.pubkey().to_string()]
    }

    fn chain_id(&self) -> ChainId {
        self.chain.into()
    }
}

impl ChainProviderOps for Arc<SolanaChainProvider> {
    fn signer_addresses(&self) -> Vec<String> {
        (**self).signer_addresses()
    }

    fn chain_id(&self) -> ChainId {
        (**self).chain_id()
    }
}

impl SolanaChainProvider {
    async fn send(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<Signature, SolanaChainProviderError> {
        self.rpc_client
            .send_transaction_with_config(
                transaction,
                RpcSendTransactionConfig {
                    skip_preflight: true,
                    ..RpcSendTransactionConfig::default()
                },
            )
            .await
            .map_err(|e| SolanaChainProviderError::Rpc(e.to_string()))
    }
}

/// Errors returned by [`SolanaChainProviderLike`] operations.
#[derive(Debug, thiserror::Error)]
pub enum SolanaChainProviderError {
    #[error("solana RPC error: {0}")]
    Rpc(String),
    #[error("failed to sign transaction: {0}")]
    Sign(String),
    #[error("invalid transaction: {0:?}")]
    InvalidTransaction(solana_client::rpc_response::UiTransactionError),
    #[error("transaction simulation failed: {0}")]
    SimulationFailed(String),
}

/// Operations a Solana "exact" scheme facilitator needs from its chain provider.
///
/// Kept as a trait (rather than calling [`SolanaChainProvider`] directly) so the
/// verification/settlement logic in [`crate::scheme::v1_solana_exact`] can run
/// against a fake provider in tests without talking to a real cluster.
#[async_trait::async_trait]
pub trait SolanaChainProviderLike {
    /// Maximum compute unit limit this facilitator will co-sign for.
    fn max_compute_unit_limit(&self) -> u32;
    /// Maximum compute unit price (microlamports) this facilitator will co-sign for.
    fn max_compute_unit_price(&self) -> u64;
    /// The fee payer's public key.
    fn pubkey(&self) -> Pubkey;
    /// The fee payer's address, as advertised in `/supported`.
    fn fee_payer(&self) -> Address;
    /// Co-signs a payer-built transaction as fee payer.
    fn sign(
        &self,
        transaction: VersionedTransaction,
    ) -> Result<VersionedTransaction, SolanaChainProviderError>;
    /// Simulates a transaction, returning an error if simulation failed.
    async fn simulate_transaction_with_config(
        &self,
        transaction: &VersionedTransaction,
        config: RpcSimulateTransactionConfig,
    ) -> Result<(), SolanaChainProviderError>;
    /// Fetches accounts, preserving `None` for accounts that don't exist.
    async fn get_multiple_accounts(
        &self,
        pubkeys: &[Pubkey],
    ) -> Result<Vec<Option<Account>>, SolanaChainProviderError>;
    /// Submits a fully-signed transaction and waits for confirmation.
    async fn send_and_confirm(
        &self,
        transaction: &VersionedTransaction,
        commitment_config: CommitmentConfig,
    ) -> Result<Signature, SolanaChainProviderError>;
}

#[async_trait::async_trait]
impl SolanaChainProviderLike for SolanaChainProvider {
    fn max_compute_unit_limit(&self) -> u32 {
        self.max_compute_unit_limit
    }

    fn max_compute_unit_price(&self) -> u64 {
        self.max_compute_unit_price
    }

    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    fn fee_payer(&self) -> Address {
        Address::new(self.keypair.pubkey())
    }

    fn sign(
        &self,
        transaction: VersionedTransaction,
    ) -> Result<VersionedTransaction, SolanaChainProviderError> {
        let mut tx = transaction;
        let msg_bytes = tx.message.serialize();
        let signature = self
            .keypair
            .try_sign_message(msg_bytes.as_slice())
            .map_err(|e| SolanaChainProviderError::Sign(e.to_string()))?;

        let num_required = tx.message.header().num_required_signatures as usize;
        let static_keys = tx.message.static_account_keys();
        let pos = static_keys[..num_required]
            .iter()
            .position(|k| *k == self.keypair.pubkey())
            .ok_or_else(|| {
                SolanaChainProviderError::Sign("signer not found in required signers".to_string())
            })?;
        if tx.signatures.len() < num_required {
            tx.signatures.resize(num_required, Signature::default());
        }
        tx.signatures[pos] = signature;
        Ok(tx)
    }

    async fn simulate_transaction_with_config(
        &self,
        transaction: &VersionedTransaction,
        config: RpcSimulateTransactionConfig,
    ) -> Result<(), SolanaChainProviderError> {
        let sim = self
            .rpc_client
            .simulate_transaction_with_config(transaction, config)
            .await
            .map_err(|e| SolanaChainProviderError::Rpc(e.to_string()))?;
        if let Some(err) = sim.value.err {
            return Err(SolanaChainProviderError::SimulationFailed(err.to_string()));
        }
        Ok(())
    }

    async fn get_multiple_accounts(
        &self,
        pubkeys: &[Pubkey],
    ) -> Result<Vec<Option<Account>>, SolanaChainProviderError> {
        self.rpc_client
            .get_multiple_accounts(pubkeys)
            .await
            .map_err(|e| SolanaChainProviderError::Rpc(e.to_string()))
    }

    async fn send_and_confirm(
        &self,
        transaction: &VersionedTransaction,
        commitment_config: CommitmentConfig,
    ) -> Result<Signature, SolanaChainProviderError> {
        let tx_sig = *transaction.get_signature();

        use futures_util::stream::StreamExt;

        if let Some(pubsub_client) = self.pubsub_client.as_ref() {
            let config = RpcSignatureSubscribeConfig {
                commitment: Some(commitment_config),
                enable_received_notification: None,
            };
            let (mut stream, unsubscribe) = pubsub_client
                .signature_subscribe(&tx_sig, Some(config))
                .await
                .map_err(|e| SolanaChainProviderError::Rpc(e.to_string()))?;
            if let Err(e) = self.send(transaction).await {
                tracing::error!(error = %e, "Failed to send transaction");
                unsubscribe().await;
                return Err(e);
            }
            while let Some(response) = stream.next().await {
                let error = if let RpcSignatureResult::ProcessedSignature(r) = response.value {
                    r.err
                } else {
                    None
                };
                return match error {
                    None => Ok(tx_sig),
                    Some(error) => Err(SolanaChainProviderError::SimulationFailed(error.to_string())),
                };
            }
            Err(SolanaChainProviderError::Rpc(
                "signature subscription ended unexpectedly".to_string(),
            ))
        } else {
            self.send(transaction).await?;
            loop {
                let confirmed = self
                    .rpc_client
                    .confirm_transaction_with_commitment(&tx_sig, commitment_config)
                    .await
                    .map_err(|e| SolanaChainProviderError::Rpc(e.to_string()))?;
                if confirmed.value {
                    return Ok(tx_sig);
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }
}

#[async_trait::async_trait]
impl SolanaChainProviderLike for Arc<SolanaChainProvider> {
    fn max_compute_unit_limit(&self) -> u32 {
        (**self).max_compute_unit_limit()
    }

    fn max_compute_unit_price(&self) -> u64 {
        (**self).max_compute_unit_price()
    }

    fn pubkey(&self) -> Pubkey {
        (**self).pubkey()
    }

    fn fee_payer(&self) -> Address {
        (**self).fee_payer()
    }

    fn sign(
        &self,
        transaction: VersionedTransaction,
    ) -> Result<VersionedTransaction, SolanaChainProviderError> {
        (**self).sign(transaction)
    }

    async fn simulate_transaction_with_config(
        &self,
        transaction: &VersionedTransaction,
        config: RpcSimulateTransactionConfig,
    ) -> Result<(), SolanaChainProviderError> {
        (**self)
            .simulate_transaction_with_config(transaction, config)
            .await
    }

    async fn get_multiple_accounts(
        &self,
        pubkeys: &[Pubkey],
    ) -> Result<Vec<Option<Account>>, SolanaChainProviderError> {
        (**self).get_multiple_accounts(pubkeys).await
    }

    async fn send_and_confirm(
        &self,
        transaction: &VersionedTransaction,
        commitment_config: CommitmentConfig,
    ) -> Result<Signature, SolanaChainProviderError> {
        (**self).send_and_confirm(transaction, commitment_config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_reference_round_trips_through_chain_id() {
        let mainnet = SolanaChainReference::mainnet();
        let chain_id: ChainId = mainnet.into();
        assert_eq!(chain_id.to_string(), "solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp");

        let back: SolanaChainReference = chain_id.try_into().unwrap();
        assert_eq!(back, mainnet);
    }

    #[test]
    fn chain_reference_rejects_wrong_namespace() {
        let chain_id = ChainId::new("eip155", "8453");
        let err = SolanaChainReference::try_from(chain_id).unwrap_err();
        assert!(matches!(
            err,
            SolanaChainReferenceFormatError::InvalidNamespace(_)
        ));
    }

    #[test]
    fn address_round_trips_through_base58() {
        let address: Address = "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZ5nc4pb"
            .parse()
            .unwrap();
        assert_eq!(
            address.to_string(),
            "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZ5nc4pb"
        );
    }

    #[test]
    fn token_deployment_parses_decimal_amounts() {
        let deployment = SolanaTokenDeployment::new(
            SolanaChainReference::mainnet(),
            "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZ5nc4pb".parse().unwrap(),
            6,
        );
        let amount = deployment.parse("10.50").unwrap();
        assert_eq!(amount.amount, 10_500_000u64);

        let too_precise = deployment.parse("1.2345678");
        assert!(too_precise.is_err());
    }
}
