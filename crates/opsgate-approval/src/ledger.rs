//! The in-memory approval ledger.

use opsgate_classify::RiskClassifier;
use opsgate_core::{ApprovalId, RiskTier, Timestamp};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::record::{ApprovedToken, PendingApproval};

/// Default time-to-live for pending approvals and issued tokens.
const DEFAULT_TTL_MINUTES: i64 = 10;

/// Length of generated approval tokens in characters.
const TOKEN_LEN: usize = 32;

/// Pending approvals and issued one-time tokens, with lazy expiry.
///
/// Both sets live behind a single mutex: `approve` must delete the pending
/// entry and create the token as one atomic transition, and `validate_token`
/// must check and delete in one step so a token can never be consumed twice,
/// even by back-to-back callers.
///
/// Every public operation sweeps expired entries first, so expiry needs no
/// background timer.
pub struct ApprovalLedger {
    classifier: RiskClassifier,
    ttl: chrono::Duration,
    state: Mutex<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    pending: HashMap<ApprovalId, PendingApproval>,
    tokens: HashMap<String, ApprovedToken>,
}

impl ApprovalLedger {
    /// Create a ledger with the default 10-minute TTL.
    #[must_use]
    pub fn new(classifier: RiskClassifier) -> Self {
        Self::with_ttl(classifier, chrono::Duration::minutes(DEFAULT_TTL_MINUTES))
    }

    /// Create a ledger with an explicit TTL.
    #[must_use]
    pub fn with_ttl(classifier: RiskClassifier, ttl: chrono::Duration) -> Self {
        Self {
            classifier,
            ttl,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Register a new authorization request for `command`.
    ///
    /// Generates a fresh unguessable id and token, classifies the command
    /// (a command the classifier considers read-only is recorded at
    /// [`RiskTier::Low`]; the gateway never sends one here, but the ledger
    /// API is also used directly by approval UIs) and stores the request
    /// with `expires_at = now + ttl`.
    pub fn request_approval(&self, command: &str) -> PendingApproval {
        let mut state = self.lock_state();
        Self::sweep(&mut state);

        let risk_tier = self.classifier.classify(command).unwrap_or(RiskTier::Low);
        let pending = PendingApproval {
            id: ApprovalId::new(),
            command: command.to_string(),
            token: generate_token(),
            risk_tier,
            created_at: Timestamp::now(),
            expires_at: Timestamp::after(self.ttl),
        };
        tracing::info!(id = %pending.id, tier = %risk_tier, "approval requested");
        state.pending.insert(pending.id.clone(), pending.clone());
        pending
    }

    /// Approve a pending request, issuing its token.
    ///
    /// The pending entry is deleted and the token created in the same
    /// critical section; the two never coexist. Returns `None` when the
    /// request is missing or expired (the sweep has already deleted it).
    pub fn approve(&self, id: &ApprovalId) -> Option<String> {
        let mut state = self.lock_state();
        Self::sweep(&mut state);

        let pending = state.pending.remove(id)?;
        let token = pending.token.clone();
        tracing::info!(%id, tier = %pending.risk_tier, "approval granted");
        state.tokens.insert(
            token.clone(),
            ApprovedToken {
                token: token.clone(),
                command: pending.command,
                expires_at: pending.expires_at,
            },
        );
        Some(token)
    }

    /// Reject a pending request. No token is ever issued for it.
    pub fn reject(&self, id: &ApprovalId) {
        let mut state = self.lock_state();
        Self::sweep(&mut state);
        if state.pending.remove(id).is_some() {
            tracing::info!(%id, "approval rejected");
        }
    }

    /// Validate and consume a token for the exact command string.
    ///
    /// Check-and-delete in one critical section: true is returned at most
    /// once per token. A command mismatch leaves the token in place (the
    /// approver authorized a different command, not this one).
    pub fn validate_token(&self, command: &str, token: &str) -> bool {
        let mut state = self.lock_state();
        Self::sweep(&mut state);

        let Some(stored) = state.tokens.get(token) else {
            return false;
        };
        if stored.command != command {
            tracing::warn!("token presented for a different command, refusing");
            return false;
        }
        state.tokens.remove(token);
        true
    }

    /// Look up a pending request by id.
    #[must_use]
    pub fn get_pending(&self, id: &ApprovalId) -> Option<PendingApproval> {
        let mut state = self.lock_state();
        Self::sweep(&mut state);
        state.pending.get(id).cloned()
    }

    /// All pending requests, oldest first.
    ///
    /// Used by approval UIs to present the queue to a human.
    #[must_use]
    pub fn list_pending(&self) -> Vec<PendingApproval> {
        let mut state = self.lock_state();
        Self::sweep(&mut state);
        let mut pending: Vec<PendingApproval> = state.pending.values().cloned().collect();
        pending.sort_by_key(|p| p.created_at);
        pending
    }

    /// Number of live pending requests.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        let mut state = self.lock_state();
        Self::sweep(&mut state);
        state.pending.len()
    }

    /// Number of live (issued, unconsumed) tokens.
    #[must_use]
    pub fn token_count(&self) -> usize {
        let mut state = self.lock_state();
        Self::sweep(&mut state);
        state.tokens.len()
    }

    /// Remove all expired entries now. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let mut state = self.lock_state();
        Self::sweep(&mut state)
    }

    fn lock_state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| {
            tracing::warn!("approval ledger lock poisoned, recovering");
            e.into_inner()
        })
    }

    fn sweep(state: &mut LedgerState) -> usize {
        let before = state.pending.len().saturating_add(state.tokens.len());
        state.pending.retain(|_, p| !p.is_expired());
        state.tokens.retain(|_, t| !t.is_expired());
        before.saturating_sub(state.pending.len().saturating_add(state.tokens.len()))
    }
}

impl fmt::Debug for ApprovalLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("ApprovalLedger")
            .field("pending", &state.pending.len())
            .field("tokens", &state.tokens.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Generate an unguessable token.
fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
#[path = "ledger_tests.rs"]
mod tests;
