use alloy_primitives::U256;

use crate::chain::eip155::{ChecksummedAddress, Eip155TokenDeployment};
use crate::chain::{ChainId, DeployedTokenAmount};
use crate::proto::v2;
use crate::scheme::v2_eip155_upto::types::{PaymentRequirementsExtra, UptoScheme};
use crate::scheme::IntoPriceTag;

#[derive(Debug, Clone)]
#[allow(dead_code)] // Public for consumption by downstream crates.
pub struct V2Eip155UptoPriceTag {
    pub pay_to: ChecksummedAddress,
    pub asset: DeployedTokenAmount<U256, Eip155TokenDeployment>,
    pub max_amount_required: Option<U256>,
    pub max_timeout_seconds: u64,
}

#[allow(dead_code)] // Public for consumption by downstream crates.
impl V2Eip155UptoPriceTag {
    pub fn new(pay_to: ChecksummedAddress, asset: DeployedTokenAmount<U256, Eip155TokenDeployment>) -> Self {
        Self {
            pay_to,
            asset,
            max_amount_required: None,
            max_timeout_seconds: 300,
        }
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = seconds;
        self
    }

    pub fn with_max_amount_required(mut self, max_amount_required: U256) -> Self {
        self.max_amount_required = Some(max_amount_required);
        self
    }
}

impl IntoPriceTag for V2Eip155UptoPriceTag {
    type PriceTag = v2::PriceTag;

    fn into_price_tag(self) -> Self::PriceTag {
        let chain_id: ChainId = self.asset.token.chain_reference.into();
        let eip712 = self.asset.token.eip712;
        let (name, version) = eip712
            .map(|eip712| (eip712.name, eip712.version))
            .unwrap_or_default();
        let extra = PaymentRequirementsExtra {
            name,
            version,
            max_amount_required: self.max_amount_required,
        };
        let requirements = v2::PaymentRequirements {
            scheme: UptoScheme.to_string(),
            pay_to: self.pay_to.to_string(),
            asset: self.asset.token.address.to_string(),
            network: chain_id,
            amount: self.asset.amount.into(),
            max_timeout_seconds: self.max_timeout_seconds,
            extra: Some(extra),
        };
        v2::PriceTag {
            requirements,
            enricher: None,
        }
    }
}
