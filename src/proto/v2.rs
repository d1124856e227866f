use crate::chain::ChainId;
use crate::proto;
use crate::proto::v1;
use crate::proto::SupportedResponse;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Version 2 of the t402 protocol.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct T402Version2;

impl T402Version2 {
    pub const VALUE: u8 = 2;
}

impl From<T402Version2> for u8 {
    fn from(_: T402Version2) -> Self {
        T402Version2::VALUE
    }
}

impl Serialize for T402Version2 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(Self::VALUE)
    }
}

impl<'de> Deserialize<'de> for T402Version2 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let num = u8::deserialize(deserializer)?;
        if num == Self::VALUE {
            Ok(T402Version2)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected version {}, got {}",
                Self::VALUE,
                num
            )))
        }
    }
}

impl Display for T402Version2 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Self::VALUE)
    }
}

pub type VerifyResponse = v1::VerifyResponse;
pub type SettleResponse = v1::SettleResponse;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub description: String,
    pub mime_type: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest<TPayload, TRequirements> {
    pub t402_version: T402Version2,
    pub payment_payload: TPayload,
    pub payment_requirements: TRequirements,
}

impl<TPayload, TRequirements> VerifyRequest<TPayload, TRequirements>
where
    Self: DeserializeOwned,
{
    pub fn from_proto(
        request: proto::VerifyRequest,
    ) -> Result<Self, proto::PaymentVerificationError> {
        let deserialized: Self = serde_json::from_value(request.into_json())?;
        Ok(deserialized)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload<TAccepted, TPayload> {
    pub accepted: TAccepted,
    pub payload: TPayload,
    pub resource: ResourceInfo,
    pub t402_version: T402Version2,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements<TScheme, TAmount, TAddress, TExtra> {
    pub scheme: TScheme,
    pub network: ChainId,
    pub amount: TAmount,
    pub pay_to: TAddress,
    pub max_timeout_seconds: u64,
    pub asset: TAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<TExtra>,
}

/// Structured representation of a V2 Payment-Required header.
/// This provides proper typing for the payment required response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    pub t402_version: T402Version2,
    pub resource: ResourceInfo,
    pub accepts: Vec<serde_json::Value>,
}

/// Requirements as carried by a [`PriceTag`] — every scheme's price-tag helper
/// renders into this concrete shape (CAIP-2 network, stringified amount/address
/// fields) regardless of the scheme's own address/amount types.
pub type PriceTagRequirements = PaymentRequirements<String, String, String, serde_json::Value>;

/// Builder for creating a V2 payment requirement entry.
///
/// A `PriceTag` wraps [`PriceTagRequirements`] and provides enrichment
/// capabilities for adding facilitator-specific data (e.g. a fee payer address)
/// before the requirements are rendered into a `402 Payment Required` accepts
/// entry.
#[derive(Clone)]
#[allow(dead_code)] // Public for consumption by downstream crates.
pub struct PriceTag {
    pub requirements: PriceTagRequirements,
    #[doc(hidden)]
    pub enricher: Option<Enricher>,
}

impl fmt::Debug for PriceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriceTag")
            .field("requirements", &self.requirements)
            .finish()
    }
}

/// Enrichment function type for V2 price tags.
pub type Enricher = Arc<dyn Fn(&mut PriceTag, &SupportedResponse) + Send + Sync>;

impl PriceTag {
    #[allow(dead_code)]
    pub fn enrich(&mut self, capabilities: &SupportedResponse) {
        if let Some(enricher) = self.enricher.clone() {
            enricher(self, capabilities);
        }
    }

    #[allow(dead_code)]
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.requirements.max_timeout_seconds = seconds;
        self
    }
}
