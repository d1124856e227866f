//! Local facilitator implementation for t402 payments.
//!
//! This module provides [`FacilitatorLocal`], a [`Facilitator`] implementation that
//! validates t402 payment payloads and performs on-chain settlements using the
//! scheme handlers registered in a [`SchemeRegistry`].
//!
//! # Architecture
//!
//! The local facilitator does not itself know how to verify or settle any particular
//! chain or scheme. It extracts a [`SchemeHandlerSlug`](crate::scheme::SchemeHandlerSlug)
//! from the incoming request and dispatches to whichever handler was registered for
//! that chain/version/scheme combination. If no handler matches, the request fails
//! as [`FacilitatorLocalError::UnsupportedKind`] — a dispatch miss, not a
//! payment-level outcome, surfaced by the HTTP layer as `400` rather than the
//! `200`/`422` used for verify/settle failures that did reach a handler.

use std::collections::HashMap;

use crate::facilitator::Facilitator;
use crate::proto;
use crate::proto::PaymentVerificationError;
use crate::scheme::{SchemeRegistry, T402SchemeFacilitatorError};

/// A [`Facilitator`] implementation that delegates to registered scheme handlers.
#[derive(Debug)]
pub struct FacilitatorLocal {
    handlers: SchemeRegistry,
}

impl FacilitatorLocal {
    /// Creates a new [`FacilitatorLocal`] backed by the given scheme handler registry.
    pub fn new(handlers: SchemeRegistry) -> Self {
        FacilitatorLocal { handlers }
    }
}

impl Facilitator for FacilitatorLocal {
    type Error = FacilitatorLocalError;

    async fn verify(&self, request: &proto::VerifyRequest) -> Result<proto::VerifyResponse, Self::Error> {
        let handler = request
            .scheme_handler_slug()
            .and_then(|slug| self.handlers.by_slug(&slug))
            .ok_or(FacilitatorLocalError::UnsupportedKind(
                PaymentVerificationError::UnsupportedScheme.into(),
            ))?;
        let response = handler
            .verify(request)
            .await
            .map_err(FacilitatorLocalError::Verification)?;
        Ok(response)
    }

    async fn settle(&self, request: &proto::SettleRequest) -> Result<proto::SettleResponse, Self::Error> {
        let handler = request
            .scheme_handler_slug()
            .and_then(|slug| self.handlers.by_slug(&slug))
            .ok_or(FacilitatorLocalError::UnsupportedKind(
                PaymentVerificationError::UnsupportedScheme.into(),
            ))?;
        let response = handler
            .settle(request)
            .await
            .map_err(FacilitatorLocalError::Settlement)?;
        Ok(response)
    }

    async fn supported(&self) -> Result<proto::SupportedResponse, Self::Error> {
        let mut kinds = vec![];
        let mut signers = HashMap::new();
        for handler in self.handlers.values() {
            if let Ok(mut supported) = handler.supported().await {
                kinds.append(&mut supported.kinds);
                for (chain_id, signer_addresses) in supported.signers {
                    signers.entry(chain_id).or_insert(signer_addresses);
                }
            }
        }
        Ok(proto::SupportedResponse {
            kinds,
            extensions: Vec::new(),
            signers,
        })
    }
}

/// Errors that can occur while routing a request through the local facilitator.
///
/// Distinguishes verification failures (occurring during `/verify`) from
/// settlement failures (occurring during `/settle`), since they carry different
/// HTTP status-code conventions at the handler layer. [`UnsupportedKind`] is
/// neither: it means no scheme handler could even be resolved for the request
/// (unknown `t402Version`/scheme/network, or a malformed slug), so it never
/// reached a handler that could produce a payment-level outcome. Dispatch
/// misses always surface as `400`, whether hit from `/verify` or `/settle`.
///
/// [`UnsupportedKind`]: FacilitatorLocalError::UnsupportedKind
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorLocalError {
    /// No scheme handler matched the request's version/scheme/network.
    #[error(transparent)]
    UnsupportedKind(T402SchemeFacilitatorError),
    /// Payment verification failed.
    #[error(transparent)]
    Verification(T402SchemeFacilitatorError),
    /// Payment settlement failed.
    #[error(transparent)]
    Settlement(T402SchemeFacilitatorError),
}
