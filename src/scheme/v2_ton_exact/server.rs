use tonlib_core::TonAddress;

use crate::chain::ton::JettonDeployment;
use crate::chain::{ChainId, DeployedTokenAmount};
use crate::proto::v2;
use crate::scheme::IntoPriceTag;

#[derive(Debug, Clone)]
#[allow(dead_code)] // Public for consumption by downstream crates.
pub struct V2TonExactPriceTag {
    pub pay_to: TonAddress,
    pub asset: DeployedTokenAmount<u64, JettonDeployment>,
    pub max_timeout_seconds: u64,
}

#[allow(dead_code)] // Public for consumption by downstream crates.
impl V2TonExactPriceTag {
    pub fn new(pay_to: TonAddress, asset: DeployedTokenAmount<u64, JettonDeployment>) -> Self {
        Self {
            pay_to,
            asset,
            max_timeout_seconds: 300,
        }
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = seconds;
        self
    }
}

impl IntoPriceTag for V2TonExactPriceTag {
    type PriceTag = v2::PriceTag;

    fn into_price_tag(self) -> Self::PriceTag {
        let chain_id: ChainId = self.asset.token.chain_reference.into();
        let requirements = v2::PaymentRequirements {
            scheme: "exact".to_string(),
            pay_to: self.pay_to.to_string(),
            asset: self.asset.token.master_address.to_string(),
            network: chain_id,
            amount: self.asset.amount.to_string(),
            max_timeout_seconds: self.max_timeout_seconds,
            extra: None,
        };
        v2::PriceTag {
            requirements,
            enricher: None,
        }
    }
}
