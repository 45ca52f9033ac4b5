#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Human-in-the-loop approval ledger.
//!
//! The [`ApprovalLedger`] implements the authorization protocol that gates
//! mutating commands: a write command first appears without a token and is
//! registered as a [`PendingApproval`]; a human approver turns that into a
//! single-use [`ApprovedToken`]; presenting the token back with the *exact
//! same command string* consumes it and unlocks one execution.
//!
//! Every entry carries an absolute expiry (10 minutes by default) and a lazy
//! sweep removes expired entries on every ledger access, so no background
//! timer is needed.
//!
//! Misses are never errors: an absent, expired or mismatched token is a
//! normal `None`/`false` outcome that callers answer with a fresh approval
//! request.
//!
//! # Example
//!
//! ```
//! use opsgate_approval::ApprovalLedger;
//! use opsgate_classify::RiskClassifier;
//!
//! let ledger = ApprovalLedger::new(RiskClassifier::new());
//! let pending = ledger.request_approval("kubectl scale deployment/x --replicas=3");
//!
//! // The human approver signs off…
//! let token = ledger.approve(&pending.id).expect("pending and unexpired");
//!
//! // …and the token unlocks exactly one execution of that exact command.
//! assert!(ledger.validate_token("kubectl scale deployment/x --replicas=3", &token));
//! assert!(!ledger.validate_token("kubectl scale deployment/x --replicas=3", &token));
//! ```

mod ledger;
mod record;

pub use ledger::ApprovalLedger;
pub use record::{ApprovedToken, PendingApproval};
