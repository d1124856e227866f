//! Core Rust implementation of the t402 protocol.
//!
//! This crate provides the foundational data structures, protocol types, and a reference
//! facilitator implementation for on-chain verification and settlement of t402 payments.
//!
//! # Overview
//!
//! The t402 protocol enables HTTP-native payments using the `402 Payment Required` status code.
//! This crate supports EVM-compatible chains (via EIP-155), Solana, TON, and TRON, with multiple
//! protocol versions (V1 and V2) and payment schemes.
//!
//! # Roles
//!
//! This crate implements the facilitator role only: a server that verifies and settles t402
//! payments on-chain. See [`facilitator`] for the trait definition and [`facilitator_local`]
//! for the reference implementation. Client-side payment construction and resource-server
//! middlewares are out of scope for this crate.
//!
//! # Modules
//!
//! - [`auth`] — API-key authentication and authorization.
//! - [`cache`] — Fingerprint-based verify/settle deduplication, in-process and Redis-backed.
//! - [`chain`] — Blockchain-specific types and providers for EIP-155, Solana, TON, and TRON chains.
//! - [`config`] — Configuration types for the facilitator server, including chain and scheme settings.
//! - [`facilitator`] — The [`Facilitator`](facilitator::Facilitator) trait for payment verification and settlement.
//! - [`facilitator_local`] — Reference implementation of the facilitator using on-chain verification.
//! - [`handlers`] — HTTP endpoint handlers for the facilitator server (verify, settle, supported, health).
//! - [`metrics`] — Prometheus metrics collection and text-format export.
//! - [`networks`] — Registry of well-known blockchain networks and CAIP-2 chain identifiers.
//! - [`proto`] — Protocol types for t402 V1 and V2, including payment payloads and requirements.
//! - [`ratelimit`] — Fixed-window, Redis-backed rate limiting.
//! - [`scheme`] — Payment scheme implementations (e.g., `exact` scheme for EIP-155, Solana, TON, TRON).
//! - [`timestamp`] — Unix timestamp type for payment authorization windows.
//! - [`trace_id`] — Per-request trace/request identifiers.
//! - [`util`] — Utility types including base64 encoding, amount parsing, telemetry, and signal handling.
//!
//! # Feature Highlights
//!
//! - **Multi-chain support**: EVM chains via EIP-155, Solana, TON, and TRON
//! - **Protocol versions**: Both t402 V1 and V2 protocols
//! - **Payment schemes**: Extensible scheme system with built-in `exact` scheme
//! - **CAIP-2 identifiers**: Standard chain-agnostic blockchain identification
//! - **OpenTelemetry**: Built-in tracing and metrics support

pub mod auth;
pub mod cache;
pub mod chain;
pub mod config;
pub mod facilitator;
pub mod facilitator_local;
pub mod handlers;
pub mod metrics;
pub mod networks;
pub mod proto;
pub mod ratelimit;
pub mod scheme;
pub mod timestamp;
pub mod trace_id;
pub mod util;
