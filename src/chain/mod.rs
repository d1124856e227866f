//! Blockchain-specific types and providers for t402 payment processing.
//!
//! This module provides abstractions for interacting with different blockchain networks
//! in the t402 protocol. It supports four chain families:
//!
//! - **EIP-155 (EVM)**: Ethereum and EVM-compatible chains like Base, Polygon, Avalanche
//! - **Solana**: The Solana blockchain
//! - **TON**: The Open Network, via Jetton transfers
//! - **TRON**: TRON, via TRC-20 transfers
//!
//! # Architecture
//!
//! The module is organized around the concept of chain providers and chain identifiers:
//!
//! - [`ChainId`] - A CAIP-2 compliant chain identifier (e.g., `eip155:8453` for Base)
//! - [`ChainIdPattern`] - Pattern matching for chain IDs (exact, wildcard, or set)
//! - [`ChainProvider`] - Enum wrapping chain-specific providers
//! - [`ChainRegistry`] - Registry of configured chain providers
//!
//! # Example
//!
//! ```
//! use t402_rs::chain::{ChainId, ChainIdPattern};
//!
//! let base = ChainId::new("eip155", "8453");
//! let all_evm = ChainIdPattern::wildcard("eip155");
//! assert!(all_evm.matches(&base));
//! ```

pub mod chain_id;
pub mod eip155;
pub mod namespace;
pub mod solana;
pub mod ton;
pub mod tron;

pub use chain_id::{ChainId, ChainIdFormatError, ChainIdPattern};
pub use namespace::Namespace;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ChainConfig, ChainsConfig};

/// Creates a value asynchronously from a chain-specific configuration section.
#[async_trait::async_trait]
pub trait FromConfig<C>: Sized {
    async fn from_config(config: &C) -> Result<Self, Box<dyn std::error::Error>>;
}

/// Narrows a [`ChainProvider`] down to a concrete provider type, if it matches.
pub trait FromChainProvider<P>: Sized {
    fn from_chain_provider(provider: &P) -> Option<Self>;
}

/// Operations common to every chain provider, regardless of chain family.
pub trait ChainProviderOps {
    /// Addresses this facilitator can sign with on this chain.
    fn signer_addresses(&self) -> Vec<String>;
    /// The CAIP-2 chain identifier this provider serves.
    fn chain_id(&self) -> ChainId;
}

/// An amount of some token, tagged with the token deployment it came from.
///
/// `V` is the on-chain integer representation (`U256` for EVM, `u64` for Solana, etc.)
/// and `T` identifies the token deployment (chain + address + decimals).
#[derive(Debug, Clone)]
pub struct DeployedTokenAmount<V, T> {
    pub amount: V,
    pub token: T,
}

/// A blockchain provider that can interact with EVM, Solana, TON, or TRON chains.
///
/// This enum wraps chain-specific providers and provides a unified interface
/// for the facilitator to interact with different blockchain networks.
#[derive(Debug, Clone)]
pub enum ChainProvider {
    /// EVM chain provider for EIP-155 compatible networks.
    Eip155(Arc<eip155::Eip155ChainProvider>),
    /// Solana chain provider.
    Solana(Arc<solana::SolanaChainProvider>),
    /// TON chain provider.
    Ton(Arc<ton::TonChainProvider>),
    /// TRON chain provider.
    Tron(Arc<tron::TronChainProvider>),
}

/// Creates a new chain provider from configuration.
///
/// This factory method inspects the configuration type and creates the appropriate
/// chain-specific provider (EVM, Solana, TON, or TRON).
///
/// # Errors
///
/// Returns an error if:
/// - RPC connection fails
/// - Signer configuration is invalid
/// - Required configuration is missing
#[async_trait::async_trait]
impl FromConfig<ChainConfig> for ChainProvider {
    async fn from_config(chains: &ChainConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let provider = match chains {
            ChainConfig::Eip155(config) => {
                let provider = eip155::Eip155ChainProvider::from_config(config).await?;
                ChainProvider::Eip155(Arc::new(provider))
            }
            ChainConfig::Solana(config) => {
                let provider = solana::SolanaChainProvider::from_config(config).await?;
                ChainProvider::Solana(Arc::new(provider))
            }
            ChainConfig::Ton(config) => {
                let provider = ton::TonChainProvider::from_config(config).await?;
                ChainProvider::Ton(Arc::new(provider))
            }
            ChainConfig::Tron(config) => {
                let provider = tron::TronChainProvider::from_config(config).await?;
                ChainProvider::Tron(Arc::new(provider))
            }
        };
        Ok(provider)
    }
}

impl ChainProviderOps for ChainProvider {
    fn signer_addresses(&self) -> Vec<String> {
        match self {
            ChainProvider::Eip155(provider) => provider.signer_addresses(),
            ChainProvider::Solana(provider) => provider.signer_addresses(),
            ChainProvider::Ton(provider) => provider.signer_addresses(),
            ChainProvider::Tron(provider) => provider.signer_addresses(),
        }
    }

    fn chain_id(&self) -> ChainId {
        match self {
            ChainProvider::Eip155(provider) => provider.chain_id(),
            ChainProvider::Solana(provider) => provider.chain_id(),
            ChainProvider::Ton(provider) => provider.chain_id(),
            ChainProvider::Tron(provider) => provider.chain_id(),
        }
    }
}

impl FromChainProvider<ChainProvider> for Arc<eip155::Eip155ChainProvider> {
    fn from_chain_provider(provider: &ChainProvider) -> Option<Self> {
        match provider {
            ChainProvider::Eip155(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }
}

impl FromChainProvider<ChainProvider> for Arc<solana::SolanaChainProvider> {
    fn from_chain_provider(provider: &ChainProvider) -> Option<Self> {
        match provider {
            ChainProvider::Solana(p) => Some(Arc::clone(p)),
            _ => None,
        }
    }
}

/// Registry of configured chain providers, keyed by CAIP-2 chain ID.
#[derive(Debug, Default, Clone)]
pub struct ChainRegistry(HashMap<ChainId, ChainProvider>);

impl ChainRegistry {
    pub fn new(providers: HashMap<ChainId, ChainProvider>) -> Self {
        Self(providers)
    }

    pub fn get(&self, chain_id: &ChainId) -> Option<&ChainProvider> {
        self.0.get(chain_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ChainId, &ChainProvider)> {
        self.0.iter()
    }

    /// Returns every registered provider whose chain ID matches the given pattern.
    pub fn by_chain_id_pattern(&self, pattern: &ChainIdPattern) -> Vec<&ChainProvider> {
        self.0
            .iter()
            .filter(|(chain_id, _)| pattern.matches(chain_id))
            .map(|(_, provider)| provider)
            .collect()
    }
}

/// Creates a new chain registry from configuration.
///
/// Initializes providers for all configured chains. Each chain configuration
/// is processed and a corresponding provider is created and stored.
///
/// # Errors
///
/// Returns an error if any chain provider fails to initialize.
#[async_trait::async_trait]
impl FromConfig<ChainsConfig> for ChainRegistry {
    async fn from_config(chains: &ChainsConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let mut providers = HashMap::new();
        for chain in chains.iter() {
            let chain_provider = ChainProvider::from_config(chain).await?;
            providers.insert(chain_provider.chain_id(), chain_provider);
        }
        Ok(Self::new(providers))
    }
}
