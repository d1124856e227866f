//! V2 TON "exact" payment scheme implementation.
//!
//! Payments are TEP-74 Jetton transfers. As with TRON, the facilitator never
//! co-signs: the payer builds and signs the whole external message themselves
//! (out of their own wallet, paying their own gas), and the facilitator's job
//! is to check the declared transfer against the payment requirements before
//! relaying the already-signed message to the network.
//!
//! Unlike TRON's ABI-encoded call data, a Jetton transfer body is a TL-B cell
//! this crate has no general decoder for, so verification here is limited to
//! the fields the payer declares alongside the BOC: the facilitator confirms
//! the claimed sender Jetton wallet is really the one the chain derives for
//! the claimed owner and asset, and that the declared amount matches the
//! requirements. It does not re-parse the signed message itself to confirm
//! those declared fields are what was actually signed — settlement relies on
//! the chain rejecting a BOC that doesn't match what the payer signed.

pub mod server;
pub mod types;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use tonlib_core::TonAddress;

use crate::chain::ChainProvider;
use crate::chain::ton::{JettonDeployment, TonChainProvider, TonChainProviderLike};
use crate::chain::{ChainId, ChainProviderOps, DeployedTokenAmount};
use crate::proto;
use crate::proto::PaymentVerificationError;
use crate::proto::util::U64String;
use crate::proto::v2;
use crate::scheme::{
    T402SchemeFacilitator, T402SchemeFacilitatorBuilder, T402SchemeFacilitatorError, T402SchemeId,
};
use types::ExactScheme;

pub struct V2TonExact;

impl V2TonExact {
    #[allow(dead_code)] // Public for consumption by downstream crates.
    pub fn price_tag(pay_to: TonAddress, asset: DeployedTokenAmount<u64, JettonDeployment>) -> v2::PriceTag {
        let chain_id: ChainId = asset.token.chain_reference.clone().into();
        let requirements = v2::PaymentRequirements {
            scheme: ExactScheme.to_string(),
            pay_to: pay_to.to_string(),
            asset: asset.token.master_address.to_string(),
            network: chain_id,
            amount: asset.amount.to_string(),
            max_timeout_seconds: 300,
            extra: None,
        };
        v2::PriceTag {
            requirements,
            enricher: None,
        }
    }
}

impl T402SchemeId for V2TonExact {
    fn namespace(&self) -> &str {
        "ton"
    }

    fn scheme(&self) -> &str {
        ExactScheme.as_ref()
    }
}

impl T402SchemeFacilitatorBuilder for V2TonExact {
    fn build(
        &self,
        provider: ChainProvider,
        _config: Option<serde_json::Value>,
    ) -> Result<Box<dyn T402SchemeFacilitator>, Box<dyn std::error::Error>> {
        let provider = match provider {
            ChainProvider::Ton(provider) => provider,
            _ => return Err("V2TonExact::build: provider must be a TonChainProvider".into()),
        };
        Ok(Box::new(V2TonExactFacilitator { provider }))
    }
}

pub struct V2TonExactFacilitator {
    provider: Arc<TonChainProvider>,
}

#[async_trait::async_trait]
impl T402SchemeFacilitator for V2TonExactFacilitator {
    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<proto::VerifyResponse, T402SchemeFacilitatorError> {
        let request = types::VerifyRequest::from_proto(request.clone())?;
        let verification = verify_transfer(&*self.provider, &self.provider.chain_id(), &request).await?;
        Ok(v2::VerifyResponse::valid(verification.payer.to_string()).into())
    }

    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<proto::SettleResponse, T402SchemeFacilitatorError> {
        let request = types::SettleRequest::from_proto(request.clone())?;
        let verification = verify_transfer(&*self.provider, &self.provider.chain_id(), &request).await?;
        self.provider
            .send_boc(&verification.boc)
            .await
            .map_err(|e| T402SchemeFacilitatorError::OnchainFailure(e.to_string()))?;
        Ok(v2::SettleResponse::Success {
            payer: verification.payer.to_string(),
            transaction: verification.boc,
            network: self.provider.chain_id().to_string(),
        }
        .into())
    }

    async fn supported(&self) -> Result<proto::SupportedResponse, T402SchemeFacilitatorError> {
        let chain_id = self.provider.chain_id();
        let kinds = vec![proto::SupportedPaymentKind {
            t402_version: v2::T402Version2.into(),
            scheme: ExactScheme.to_string(),
            network: chain_id.to_string(),
            extra: None,
        }];
        let signers = {
            let mut signers = HashMap::with_capacity(1);
            signers.insert(chain_id, self.provider.signer_addresses());
            signers
        };
        Ok(proto::SupportedResponse {
            kinds,
            extensions: Vec::new(),
            signers,
        })
    }
}

pub struct VerifyTransferResult {
    pub payer: TonAddress,
    pub boc: String,
}

/// Checks a declared Jetton transfer against the payment requirements,
/// confirming the claimed sender wallet is the one the chain actually derives
/// for the claimed owner and asset.
async fn verify_transfer<P: TonChainProviderLike>(
    provider: &P,
    chain_id: &ChainId,
    request: &types::VerifyRequest,
) -> Result<VerifyTransferResult, PaymentVerificationError> {
    let payload = &request.payment_payload;
    let requirements = &request.payment_requirements;

    if &payload.accepted != requirements {
        return Err(PaymentVerificationError::AcceptedRequirementsMismatch);
    }
    if &requirements.network != chain_id {
        return Err(PaymentVerificationError::ChainIdMismatch);
    }

    let declared = &payload.payload;
    if declared.amount != requirements.amount {
        return Err(PaymentVerificationError::InvalidPaymentAmount);
    }

    let owner: TonAddress = TonAddress::from_str(&declared.owner)
        .map_err(|e| PaymentVerificationError::InvalidFormat(e.to_string()))?;
    let declared_sender_wallet: TonAddress = TonAddress::from_str(&declared.sender_jetton_wallet)
        .map_err(|e| PaymentVerificationError::InvalidFormat(e.to_string()))?;
    let destination: TonAddress = TonAddress::from_str(&declared.destination)
        .map_err(|e| PaymentVerificationError::InvalidFormat(e.to_string()))?;
    let master: TonAddress = TonAddress::from_str(&requirements.asset)
        .map_err(|e| PaymentVerificationError::InvalidFormat(e.to_string()))?;
    let pay_to: TonAddress = TonAddress::from_str(&requirements.pay_to)
        .map_err(|e| PaymentVerificationError::InvalidFormat(e.to_string()))?;
    if destination != pay_to {
        return Err(PaymentVerificationError::RecipientMismatch);
    }

    let actual_sender_wallet = provider
        .jetton_wallet_address(&master, &owner)
        .await
        .map_err(|e| PaymentVerificationError::TransactionSimulation(e.to_string()))?;
    if actual_sender_wallet != declared_sender_wallet {
        return Err(PaymentVerificationError::AssetMismatch);
    }

    Ok(VerifyTransferResult {
        payer: owner,
        boc: declared.boc.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirements(pay_to: &str, asset: &str, amount: u64) -> types::PaymentRequirements {
        v2::PaymentRequirements {
            scheme: ExactScheme,
            network: ChainId::new("ton", "-239"),
            amount: U64String::from(amount),
            pay_to: pay_to.to_string(),
            max_timeout_seconds: 300,
            asset: asset.to_string(),
            extra: None,
        }
    }

    struct StubProvider {
        wallet: TonAddress,
    }

    #[async_trait::async_trait]
    impl TonChainProviderLike for StubProvider {
        fn wallet_address(&self) -> &TonAddress {
            &self.wallet
        }

        async fn jetton_wallet_address(
            &self,
            _master: &TonAddress,
            _owner: &TonAddress,
        ) -> Result<TonAddress, crate::chain::ton::TonChainProviderError> {
            Ok(self.wallet.clone())
        }

        async fn get_transactions(
            &self,
            _address: &TonAddress,
            _limit: u32,
        ) -> Result<serde_json::Value, crate::chain::ton::TonChainProviderError> {
            Ok(serde_json::Value::Null)
        }

        async fn send_boc(&self, _boc_base64: &str) -> Result<(), crate::chain::ton::TonChainProviderError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn rejects_sender_wallet_the_chain_does_not_derive() {
        let owner = "0:0000000000000000000000000000000000000000000000000000000000000001";
        let pay_to = "0:0000000000000000000000000000000000000000000000000000000000000002";
        let master = "0:0000000000000000000000000000000000000000000000000000000000000003";
        let claimed_wallet = "0:0000000000000000000000000000000000000000000000000000000000000004";
        let actual_wallet = TonAddress::from_str(
            "0:0000000000000000000000000000000000000000000000000000000000000005",
        )
        .unwrap();

        let requirements = requirements(pay_to, master, 1_000);
        let payload = types::ExactTonPayload {
            owner: owner.to_string(),
            sender_jetton_wallet: claimed_wallet.to_string(),
            destination: pay_to.to_string(),
            amount: U64String::from(1_000u64),
            boc: "deadbeef".to_string(),
        };
        let request = types::VerifyRequest {
            t402_version: v2::T402Version2,
            payment_payload: v2::PaymentPayload {
                accepted: requirements.clone(),
                payload,
                resource: v2::ResourceInfo {
                    description: "test resource".to_string(),
                    mime_type: "application/json".to_string(),
                    url: "https://example.com/resource".to_string(),
                },
                t402_version: v2::T402Version2,
            },
            payment_requirements: requirements,
        };

        let provider = StubProvider { wallet: actual_wallet };
        let chain_id = ChainId::new("ton", "-239");
        let err = verify_transfer(&provider, &chain_id, &request).await.unwrap_err();
        assert!(matches!(err, PaymentVerificationError::AssetMismatch));
    }
}
