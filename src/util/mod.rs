//! Utility types and functions for t402.
//!
//! This module provides various helper types used throughout the t402 crate:
//!
//! - [`amount`] - Amount parsing: human-readable money strings and the wire `Amount` newtype
//! - [`b64`] - Base64 encoding/decoding utilities
//! - [`lit_str`] - Compile-time string literal types
//! - [`sig_down`] - Graceful shutdown signal handling
//! - [`telemetry`] - OpenTelemetry tracing setup

pub mod amount;
pub mod b64;
pub mod lit_str;
pub mod sig_down;
pub mod telemetry;

pub use b64::*;
pub use sig_down::*;
pub use telemetry::*;
