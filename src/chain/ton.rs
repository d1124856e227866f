//! TON chain support for t402 payments.
//!
//! Payments on TON are Jetton (TEP-74 fungible token) transfers. Unlike the EVM
//! and Solana backends, this module talks to the chain over a TonCenter-shaped
//! HTTP JSON API (`rpc` in [`crate::config::TonChainConfig`]) rather than a
//! dedicated RPC client crate — there is no such crate in this dependency stack,
//! only `tonlib-core`'s address/wallet/cell primitives.
//!
//! The CAIP-2 reference for a TON chain is its workchain id (`"-239"` for
//! mainnet, `"-3"` for the public testnet), following the informal `ton:`
//! namespace convention used by wallets that already speak CAIP-2.

use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tonlib_core::mnemonic::{KeyPair, Mnemonic};
use tonlib_core::wallet::{TonWallet, WalletVersion};
use tonlib_core::TonAddress;

use crate::chain::{ChainId, ChainProviderOps, FromConfig};
use crate::config::TonChainConfig;

/// The CAIP-2 namespace for TON.
pub const TON_NAMESPACE: &str = "ton";

/// A TON workchain reference (`"-239"` mainnet, `"-3"` testnet).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TonChainReference(String);

impl TonChainReference {
    pub fn new(workchain: impl Into<String>) -> Self {
        Self(workchain.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// TON mainnet (masterchain workchain id).
    pub fn mainnet() -> Self {
        Self("-239".to_string())
    }

    /// The public TON testnet.
    pub fn testnet() -> Self {
        Self("-3".to_string())
    }
}

impl fmt::Display for TonChainReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for TonChainReference {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TonChainReference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Self(String::deserialize(deserializer)?))
    }
}

impl From<TonChainReference> for ChainId {
    fn from(value: TonChainReference) -> Self {
        ChainId::new(TON_NAMESPACE, value.0)
    }
}

/// Error parsing a [`TonChainReference`] from a [`ChainId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TonChainReferenceFormatError {
    #[error("invalid namespace {0}, expected ton")]
    InvalidNamespace(String),
}

impl TryFrom<ChainId> for TonChainReference {
    type Error = TonChainReferenceFormatError;

    fn try_from(value: ChainId) -> Result<Self, Self::Error> {
        if value.namespace != TON_NAMESPACE {
            return Err(TonChainReferenceFormatError::InvalidNamespace(
                value.namespace,
            ));
        }
        Ok(Self(value.reference))
    }
}

/// A Jetton master contract deployment: the fungible token's master address and
/// its decimal precision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JettonDeployment {
    pub chain_reference: TonChainReference,
    pub master_address: TonAddress,
    pub decimals: u8,
}

impl JettonDeployment {
    pub fn new(chain_reference: TonChainReference, master_address: TonAddress, decimals: u8) -> Self {
        Self {
            chain_reference,
            master_address,
            decimals,
        }
    }

    /// Creates a token amount from a raw value already in the Jetton's smallest unit.
    #[allow(dead_code)] // Public for consumption by downstream crates.
    pub fn amount(&self, v: u64) -> crate::chain::DeployedTokenAmount<u64, JettonDeployment> {
        crate::chain::DeployedTokenAmount {
            amount: v,
            token: self.clone(),
        }
    }

    /// Parses a human-readable amount string (`"10.50"`, `"$10.50"`, `"1,000"`) into
    /// Jetton units, scaled by this deployment's decimals.
    #[allow(dead_code)] // Public for consumption by downstream crates.
    pub fn parse<V>(
        &self,
        v: V,
    ) -> Result<crate::chain::DeployedTokenAmount<u64, JettonDeployment>, crate::util::amount::MoneyAmountParseError>
    where
        V: TryInto<crate::util::amount::MoneyAmount>,
        crate::util::amount::MoneyAmountParseError: From<<V as TryInto<crate::util::amount::MoneyAmount>>::Error>,
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
        let multiplier = 10u128.pow(scale_diff);
        let digits = money_amount.mantissa();
        let value = digits
            .checked_mul(multiplier)
            .and_then(|v| u64::try_from(v).ok())
            .ok_or_else(|| {
                crate::util::amount::MoneyAmountParseError::InvalidFormat(format!("{digits}"))
            })?;
        Ok(crate::chain::DeployedTokenAmount {
            amount: value,
            token: self.clone(),
        })
    }
}

/// Errors from TON chain provider operations.
#[derive(Debug, thiserror::Error)]
pub enum TonChainProviderError {
    #[error("TON RPC error: {0}")]
    Rpc(String),
    #[error("invalid TON address: {0}")]
    InvalidAddress(String),
    #[error("transaction submission failed: {0}")]
    SubmissionFailed(String),
}

/// Operations a TON "exact" scheme facilitator needs from its chain provider.
#[async_trait::async_trait]
pub trait TonChainProviderLike {
    /// The facilitator's wallet address (the Jetton transfer's intended sender
    /// when settling, or the forwarded notification recipient when verifying).
    fn wallet_address(&self) -> &TonAddress;
    /// Looks up the Jetton wallet address (the per-owner token account) derived
    /// from a Jetton master contract, via the `runGetMethod` TonCenter endpoint.
    async fn jetton_wallet_address(
        &self,
        master: &TonAddress,
        owner: &TonAddress,
    ) -> Result<TonAddress, TonChainProviderError>;
    /// Fetches recent transactions for an address, most-recent first.
    async fn get_transactions(
        &self,
        address: &TonAddress,
        limit: u32,
    ) -> Result<serde_json::Value, TonChainProviderError>;
    /// Submits a base64-encoded, already-signed external message (BOC) for
    /// inclusion in a block.
    async fn send_boc(&self, boc_base64: &str) -> Result<(), TonChainProviderError>;
}

/// Provider for interacting with the TON blockchain via a TonCenter-shaped HTTP API.
pub struct TonChainProvider {
    wallet_address: TonAddress,
    keypair: KeyPair,
    chain: TonChainReference,
    http: Client,
    rpc_base: url::Url,
}

impl fmt::Debug for TonChainProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TonChainProvider")
            .field("wallet_address", &self.wallet_address.to_string())
            .field("chain", &self.chain)
            .field("rpc_base", &self.rpc_base.as_str())
            .finish()
    }
}

#[async_trait::async_trait]
impl FromConfig<TonChainConfig> for TonChainProvider {
    async fn from_config(config: &TonChainConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let rpc_base = config.rpc().clone();
        let chain = config.chain_reference();
        let mnemonic = config.signer().phrase().to_string();
        let words: Vec<&str> = mnemonic.split_whitespace().collect();
        let keypair = Mnemonic::new(words, &None)?.to_key_pair()?;
        let wallet = TonWallet::derive_default(WalletVersion::V4R2, &keypair)
            .map_err(|e| format!("failed to derive TON wallet address: {e}"))?;
        let wallet_address = wallet.address.clone();

        tracing::info!(
            chain = %chain,
            wallet = %wallet_address,
            rpc = %rpc_base,
            "Initialized TON provider"
        );

        Ok(Self {
            wallet_address,
            keypair,
            chain,
            http: Client::new(),
            rpc_base,
        })
    }
}

impl ChainProviderOps for TonChainProvider {
    fn signer_addresses(&self) -> Vec<String> {
        vec![self.wallet_address.to_string()]
    }

    fn chain_id(&self) -> ChainId {
        self.chain.clone().into()
    }
}

impl ChainProviderOps for Arc<TonChainProvider> {
    fn signer_addresses(&self) -> Vec<String> {
        (**self).signer_addresses()
    }

    fn chain_id(&self) -> ChainId {
        (**self).chain_id()
    }
}

impl TonChainProvider {
    /// Exposes the keypair used to sign outgoing wallet messages, for building
    /// and signing a settlement's internal Jetton transfer.
    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    async fn rpc_call(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, TonChainProviderError> {
        let url = self
            .rpc_base
            .join(method)
            .map_err(|e| TonChainProviderError::Rpc(e.to_string()))?;
        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TonChainProviderError::Rpc(e.to_string()))?;
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TonChainProviderError::Rpc(e.to_string()))?;
        if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
            let message = value
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown TonCenter error")
                .to_string();
            return Err(TonChainProviderError::Rpc(message));
        }
        Ok(value)
    }
}

#[async_trait::async_trait]
impl TonChainProviderLike for TonChainProvider {
    fn wallet_address(&self) -> &TonAddress {
        &self.wallet_address
    }

    async fn jetton_wallet_address(
        &self,
        master: &TonAddress,
        owner: &TonAddress,
    ) -> Result<TonAddress, TonChainProviderError> {
        let response = self
            .rpc_call(
                "runGetMethod",
                serde_json::json!({
                    "address": master.to_string(),
                    "method": "get_wallet_address",
                    "stack": [["tvm.Slice", owner.to_string()]],
                }),
            )
            .await?;
        let address_str = response
            .pointer("/result/stack/0/1")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                TonChainProviderError::Rpc("get_wallet_address returned no address".to_string())
            })?;
        TonAddress::from_str(address_str)
            .map_err(|e| TonChainProviderError::InvalidAddress(e.to_string()))
    }

    async fn get_transactions(
        &self,
        address: &TonAddress,
        limit: u32,
    ) -> Result<serde_json::Value, TonChainProviderError> {
        self.rpc_call(
            "getTransactions",
            serde_json::json!({ "address": address.to_string(), "limit": limit }),
        )
        .await
    }

    async fn send_boc(&self, boc_base64: &str) -> Result<(), TonChainProviderError> {
        self.rpc_call("sendBoc", serde_json::json!({ "boc": boc_base64 }))
            .await
            .map(|_| ())
            .map_err(|e| TonChainProviderError::SubmissionFailed(e.to_string()))
    }
}

#[async_trait::async_trait]
impl TonChainProviderLike for Arc<TonChainProvider> {
    fn wallet_address(&self) -> &TonAddress {
        (**self).wallet_address()
    }

    async fn jetton_wallet_address(
        &self,
        master: &TonAddress,
        owner: &TonAddress,
    ) -> Result<TonAddress, TonChainProviderError> {
        (**self).jetton_wallet_address(master, owner).await
    }

    async fn get_transactions(
        &self,
        address: &TonAddress,
        limit: u32,
    ) -> Result<serde_json::Value, TonChainProviderError> {
        (**self).get_transactions(address, limit).await
    }

    async fn send_boc(&self, boc_base64: &str) -> Result<(), TonChainProviderError> {
        (**self).send_boc(boc_base64).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_reference_round_trips_through_chain_id() {
        let mainnet = TonChainReference::mainnet();
        let chain_id: ChainId = mainnet.clone().into();
        assert_eq!(chain_id.to_string(), "ton:-239");

        let back: TonChainReference = chain_id.try_into().unwrap();
        assert_eq!(back, mainnet);
    }

    #[test]
    fn chain_reference_rejects_wrong_namespace() {
        let chain_id = ChainId::new("eip155", "8453");
        let err = TonChainReference::try_from(chain_id).unwrap_err();
        assert!(matches!(
            err,
            TonChainReferenceFormatError::InvalidNamespace(_)
        ));
    }
}
