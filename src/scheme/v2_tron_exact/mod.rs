//! V2 TRON "exact" payment scheme implementation.
//!
//! Payments are TRC-20 `transfer(address,uint256)` calls wrapped in a
//! `TriggerSmartContract` transaction. Unlike the EVM and Solana "exact"
//! schemes, the facilitator never co-signs: the payer signs and pays for the
//! whole transaction themselves, and the facilitator's job is to check that
//! the already-signed transaction actually pays what the requirements ask
//! for before relaying it to the network.

pub mod server;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::U256;

use crate::chain::ChainProvider;
use crate::chain::tron::{TronAddress, TronAddressParseError, TronChainProvider};
use crate::chain::{ChainId, ChainProviderOps};
use crate::proto;
use crate::proto::PaymentVerificationError;
use crate::proto::v2;
use crate::scheme::{
    T402SchemeFacilitator, T402SchemeFacilitatorBuilder, T402SchemeFacilitatorError, T402SchemeId,
};
use types::ExactScheme;

/// The 4-byte selector for `transfer(address,uint256)`.
const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

pub struct V2TronExact;

impl V2TronExact {
    #[allow(dead_code)] // Public for consumption by downstream crates.
    pub fn price_tag(
        pay_to: TronAddress,
        asset: crate::chain::DeployedTokenAmount<U256, crate::chain::tron::Trc20Deployment>,
    ) -> v2::PriceTag {
        let chain_id: ChainId = asset.token.chain_reference.clone().into();
        let requirements = v2::PaymentRequirements {
            scheme: ExactScheme.to_string(),
            pay_to: pay_to.to_string(),
            asset: asset.token.contract_address.to_string(),
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

impl T402SchemeId for V2TronExact {
    fn namespace(&self) -> &str {
        "tron"
    }

    fn scheme(&self) -> &str {
        ExactScheme.as_ref()
    }
}

impl T402SchemeFacilitatorBuilder for V2TronExact {
    fn build(
        &self,
        provider: ChainProvider,
        _config: Option<serde_json::Value>,
    ) -> Result<Box<dyn T402SchemeFacilitator>, Box<dyn std::error::Error>> {
        let provider = match provider {
            ChainProvider::Tron(provider) => provider,
            _ => return Err("V2TronExact::build: provider must be a TronChainProvider".into()),
        };
        Ok(Box::new(V2TronExactFacilitator { provider }))
    }
}

pub struct V2TronExactFacilitator {
    provider: Arc<TronChainProvider>,
}

#[async_trait::async_trait]
impl T402SchemeFacilitator for V2TronExactFacilitator {
    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<proto::VerifyResponse, T402SchemeFacilitatorError> {
        let request = types::VerifyRequest::from_proto(request.clone())?;
        let verification = verify_transfer(&self.provider.chain_id(), &request)?;
        Ok(v2::VerifyResponse::valid(verification.payer.to_string()).into())
    }

    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<proto::SettleResponse, T402SchemeFacilitatorError> {
        let request = types::SettleRequest::from_proto(request.clone())?;
        let verification = verify_transfer(&self.provider.chain_id(), &request)?;
        let result = self
            .provider
            .broadcast(verification.transaction)
            .await
            .map_err(|e| T402SchemeFacilitatorError::OnchainFailure(e.to_string()))?;
        let tx_id = result
            .get("txid")
            .or_else(|| result.get("txID"))
            .and_then(|v| v.as_str())
            .unwrap_or(&verification.tx_id)
            .to_string();
        Ok(v2::SettleResponse::Success {
            payer: verification.payer.to_string(),
            transaction: tx_id,
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
    pub payer: TronAddress,
    pub tx_id: String,
    pub transaction: serde_json::Value,
}

/// Decodes the TRC-20 `transfer` call carried in a `TriggerSmartContract`
/// transaction, checks it matches `requirements`, and checks the attached
/// signature was produced by the claimed owner.
fn verify_transfer(
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

    let transaction = payload.payload.transaction.clone();
    let contract = transaction
        .pointer("/raw_data/contract/0/parameter/value")
        .ok_or_else(|| {
            PaymentVerificationError::InvalidFormat("missing TriggerSmartContract parameter".into())
        })?;

    let contract_address: TronAddress = contract
        .get("contract_address")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PaymentVerificationError::InvalidFormat("missing contract_address".into()))?
        .parse()
        .map_err(|e: TronAddressParseError| PaymentVerificationError::InvalidFormat(e.to_string()))?;
    if contract_address != requirements.asset {
        return Err(PaymentVerificationError::AssetMismatch);
    }

    let owner_address: TronAddress = contract
        .get("owner_address")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PaymentVerificationError::InvalidFormat("missing owner_address".into()))?
        .parse()
        .map_err(|e: TronAddressParseError| PaymentVerificationError::InvalidFormat(e.to_string()))?;

    let data_hex = contract
        .get("data")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PaymentVerificationError::InvalidFormat("missing call data".into()))?;
    let (recipient, amount) = decode_transfer_call(data_hex)?;
    if recipient != requirements.pay_to {
        return Err(PaymentVerificationError::RecipientMismatch);
    }
    if amount != requirements.amount {
        return Err(PaymentVerificationError::InvalidPaymentAmount);
    }

    let expiration_ms = transaction
        .pointer("/raw_data/expiration")
        .and_then(|v| v.as_u64());
    if let Some(expiration_ms) = expiration_ms {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        if now_ms > expiration_ms {
            return Err(PaymentVerificationError::Expired);
        }
    }

    let tx_id = transaction
        .get("txID")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PaymentVerificationError::InvalidFormat("missing txID".into()))?
        .to_string();
    let tx_id_bytes = hex::decode(&tx_id)
        .map_err(|e| PaymentVerificationError::InvalidFormat(e.to_string()))?;
    let prehash = alloy_primitives::B256::try_from(tx_id_bytes.as_slice())
        .map_err(|_| PaymentVerificationError::InvalidFormat("txID is not 32 bytes".into()))?;

    let signature_hex = transaction
        .get("signature")
        .and_then(|v| v.as_array())
        .and_then(|sigs| sigs.first())
        .and_then(|v| v.as_str())
        .ok_or_else(|| PaymentVerificationError::InvalidSignature("missing signature".into()))?;
    let signature_bytes = hex::decode(signature_hex)
        .map_err(|e| PaymentVerificationError::InvalidSignature(e.to_string()))?;
    let signer = TronAddress::recover(&prehash, &signature_bytes)
        .map_err(|e| PaymentVerificationError::InvalidSignature(e.to_string()))?;
    if signer != owner_address {
        return Err(PaymentVerificationError::InvalidSignature(
            "signature does not match owner_address".to_string(),
        ));
    }

    Ok(VerifyTransferResult {
        payer: owner_address,
        tx_id,
        transaction,
    })
}

/// Decodes `transfer(address,uint256)` ABI call data: a 4-byte selector
/// followed by a 32-byte left-padded address and a 32-byte big-endian amount.
fn decode_transfer_call(
    data_hex: &str,
) -> Result<(TronAddress, U256), PaymentVerificationError> {
    let data = hex::decode(data_hex.trim_start_matches("0x"))
        .map_err(|e| PaymentVerificationError::InvalidFormat(e.to_string()))?;
    if data.len() != 68 {
        return Err(PaymentVerificationError::InvalidFormat(format!(
            "expected 68 bytes of transfer() call data, got {}",
            data.len()
        )));
    }
    if data[..4] != TRANSFER_SELECTOR {
        return Err(PaymentVerificationError::InvalidFormat(
            "call data is not a transfer(address,uint256) call".to_string(),
        ));
    }
    let mut hash20 = [0u8; 20];
    hash20.copy_from_slice(&data[16..36]);
    let recipient = TronAddress::from_hash20(hash20);
    let amount = U256::from_be_slice(&data[36..68]);
    Ok((recipient, amount))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_transfer_call_reads_recipient_and_amount() {
        let hash20 = [0x11u8; 20];
        let recipient = TronAddress::from_hash20(hash20);
        let mut data = TRANSFER_SELECTOR.to_vec();
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(&hash20);
        data.extend_from_slice(&U256::from(1_000_000u64).to_be_bytes::<32>());
        let data_hex = hex::encode(&data);

        let (decoded_recipient, decoded_amount) = decode_transfer_call(&data_hex).unwrap();
        assert_eq!(decoded_recipient, recipient);
        assert_eq!(decoded_amount, U256::from(1_000_000u64));
    }

    #[test]
    fn decode_transfer_call_rejects_wrong_selector() {
        let mut data = vec![0u8; 68];
        data[0] = 0xff;
        let data_hex = hex::encode(&data);
        assert!(decode_transfer_call(&data_hex).is_err());
    }
}
