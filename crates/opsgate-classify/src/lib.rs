#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Mutation-risk classification of shell commands.
//!
//! Given an arbitrary command string, [`RiskClassifier::classify`] decides
//! whether it can mutate cluster, repository or filesystem state and, if so,
//! how severe that mutation is ([`RiskTier`]). Read-only commands get `None`
//! and bypass the approval gate entirely.
//!
//! Classification is pure: no I/O, no state, the same string always yields
//! the same answer. It must run before any execution decision is made.
//!
//! # Example
//!
//! ```
//! use opsgate_classify::RiskClassifier;
//! use opsgate_core::RiskTier;
//!
//! let classifier = RiskClassifier::new();
//! assert_eq!(
//!     classifier.classify("kubectl delete namespace prod"),
//!     Some(RiskTier::Critical)
//! );
//! assert_eq!(classifier.classify("kubectl get pods -A"), None);
//! ```

mod rules;

pub use rules::RuleOutcome;

use opsgate_core::RiskTier;

/// Classifies shell commands by mutation risk.
///
/// Internally a single ordered rule table evaluated top to bottom; the first
/// matching rule wins. A command matching only the broad write-verb rules at
/// the bottom of the table defaults to [`RiskTier::Low`]; a command matching
/// nothing is read-only.
#[derive(Debug, Default, Clone, Copy)]
pub struct RiskClassifier;

impl RiskClassifier {
    /// Create a new classifier.
    ///
    /// The rule table is compiled once per process and shared, so this is
    /// free to call anywhere a classifier is needed.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Classify a command string.
    ///
    /// Returns `None` for read-only commands and `Some(tier)` for anything
    /// that can mutate state.
    #[must_use]
    pub fn classify(&self, command: &str) -> Option<RiskTier> {
        match rules::first_match(command) {
            Some(RuleOutcome::NotWrite) | None => None,
            Some(RuleOutcome::Write(tier)) => Some(tier),
        }
    }

    /// Whether the command is classified as state-mutating at all.
    #[must_use]
    pub fn is_write(&self, command: &str) -> bool {
        self.classify(command).is_some()
    }
}
