//! Wire format types for the V2 TRON "exact" payment scheme.

pub use crate::scheme::v1_eip155_exact::types::ExactScheme;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::chain::tron::TronAddress;
use crate::proto::v2;

pub type VerifyRequest = v2::VerifyRequest<PaymentPayload, PaymentRequirements>;
pub type SettleRequest = VerifyRequest;
pub type PaymentPayload = v2::PaymentPayload<PaymentRequirements, ExactTronPayload>;
pub type PaymentRequirements =
    v2::PaymentRequirements<ExactScheme, U256, TronAddress, serde_json::Value>;

/// The payer's fully-signed TRON transaction, as returned by TronGrid's
/// `wallet/triggersmartcontract`: `raw_data`/`raw_data_hex`, `txID`, and a
/// non-empty `signature` array. Verified against the payment requirements
/// and then relayed to `wallet/broadcasttransaction` unmodified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExactTronPayload {
    pub transaction: serde_json::Value,
}
