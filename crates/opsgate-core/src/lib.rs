#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Shared vocabulary types for the opsgate command-authorization gateway.
//!
//! Everything here is plain data: risk tiers, timestamps, approval ids and
//! execution results. The behavioral crates (`opsgate-classify`,
//! `opsgate-approval`, `opsgate-exec`, `opsgate-gateway`) all speak in these
//! types, so this crate has no internal dependencies.

pub mod types;

pub use types::{ApprovalId, ExecutionResult, RiskTier, Timestamp};
