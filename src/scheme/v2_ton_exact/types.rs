//! Wire format types for the V2 TON "exact" payment scheme.

pub use crate::scheme::v1_eip155_exact::types::ExactScheme;

use serde::{Deserialize, Serialize};

use crate::proto::util::U64String;
use crate::proto::v2;

pub type VerifyRequest = v2::VerifyRequest<PaymentPayload, PaymentRequirements>;
pub type SettleRequest = VerifyRequest;
pub type PaymentPayload = v2::PaymentPayload<PaymentRequirements, ExactTonPayload>;
pub type PaymentRequirements =
    v2::PaymentRequirements<ExactScheme, U64String, String, serde_json::Value>;

/// A payer-signed Jetton transfer, ready to relay once its declared fields are
/// checked against the payment requirements.
///
/// The payer already built and signed the external message carrying the
/// `transfer` body (TEP-74) themselves; the facilitator never co-signs for
/// TON, same as it doesn't for TRON. `boc` is forwarded to `sendBoc` verbatim
/// at settlement, so the declared fields below exist only to let the
/// facilitator check the payment before it relays anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactTonPayload {
    /// The payer's own wallet address (the `owner` of the sending Jetton wallet).
    pub owner: String,
    /// The payer's Jetton wallet for the asset being transferred, as declared
    /// by the payer. Checked against the chain's own derivation before settling.
    pub sender_jetton_wallet: String,
    /// The transfer body's `destination` field: the recipient's wallet owner
    /// address, expected to be the requirements' `pay_to`.
    pub destination: String,
    /// Amount of Jetton units carried in the transfer body.
    pub amount: U64String,
    /// The already-signed external message, base64-encoded BOC.
    pub boc: String,
}
