//! Ledger record types: pending approvals and approved tokens.
//!
//! A [`PendingApproval`] and the [`ApprovedToken`] derived from it never
//! coexist for the same logical request: `approve` deletes the pending entry
//! and creates the token in one critical section.

use opsgate_core::{ApprovalId, RiskTier, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An unresolved authorization request awaiting a human decision.
///
/// Created when a write command first appears without a valid token. The
/// token is minted up front so that `approve` is a pure state transition;
/// it is worthless until the pending entry is approved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    /// Unique request identifier; ids are never reused.
    pub id: ApprovalId,
    /// The exact command string awaiting authorization.
    pub command: String,
    /// The token that will be issued if this request is approved.
    pub token: String,
    /// Severity of the mutation the command performs.
    pub risk_tier: RiskTier,
    /// When the request was created.
    pub created_at: Timestamp,
    /// Absolute expiry; the lazy sweep removes the entry after this.
    pub expires_at: Timestamp,
}

impl PendingApproval {
    /// Check if the request has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_past()
    }
}

impl fmt::Display for PendingApproval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.risk_tier, self.command, self.id)
    }
}

/// A single-use credential bound to one exact command string.
///
/// Created on approval, destroyed on first successful validation or by the
/// expiry sweep — whichever comes first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovedToken {
    /// The opaque token value.
    pub token: String,
    /// The exact command string the token authorizes.
    pub command: String,
    /// Absolute expiry, inherited from the pending request.
    pub expires_at: Timestamp,
}

impl ApprovedToken {
    /// Check if the token has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_past()
    }
}
