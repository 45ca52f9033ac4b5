//! The ordered mutation-rule table.
//!
//! One table, evaluated top to bottom, first match wins. Each rule tags its
//! match as either [`RuleOutcome::NotWrite`] (explicitly read-only, e.g.
//! `--dry-run`) or [`RuleOutcome::Write`] with a tier. The broad write-verb
//! rules at the bottom carry [`RiskTier::Low`], so a mutating command that no
//! explicit tier rule names still lands in the approval gate instead of
//! slipping through untiered.
//!
//! The `regex` crate has no lookahead, so exceptions are expressed as
//! earlier rules: recursive `rm` under `/tmp` is ranked `Medium` by a rule
//! placed above the critical catch-anywhere rule.

use opsgate_core::RiskTier;
use regex::Regex;
use std::sync::LazyLock;

/// What a matching rule says about the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    /// Explicitly read-only; stop evaluating, no gate.
    NotWrite,
    /// State-mutating at the given tier.
    Write(RiskTier),
}

/// A single entry in the rule table.
struct Rule {
    /// Name of the rule (for tracing and debugging).
    #[allow(dead_code)]
    name: &'static str,
    /// Compiled pattern.
    regex: Regex,
    /// Verdict when the pattern matches.
    outcome: RuleOutcome,
}

impl Rule {
    fn new(name: &'static str, pattern: &str, outcome: RuleOutcome) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("invalid classifier rule pattern"),
            outcome,
        }
    }
}

fn write(tier: RiskTier) -> RuleOutcome {
    RuleOutcome::Write(tier)
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    use RiskTier::{Critical, High, Low, Medium};
    vec![
        // ── Explicit read-only escapes ──────────────────────────────────
        Rule::new("dry_run", r"--dry-run\b", RuleOutcome::NotWrite),
        Rule::new("kubectl_diff", r"\bkubectl\s+diff\b", RuleOutcome::NotWrite),
        Rule::new(
            "kubectl_auth_check",
            r"\bkubectl\s+auth\s+can-i\b",
            RuleOutcome::NotWrite,
        ),
        // ── Exceptions that outrank the critical rules below ────────────
        Rule::new(
            "recursive_rm_in_temp",
            r"\brm\s+(?:-\w+\s+)*-\w*r\w*\s+(?:/tmp|/var/tmp)\b",
            write(Medium),
        ),
        // ── Critical ────────────────────────────────────────────────────
        Rule::new(
            "namespace_deletion",
            r"\bkubectl\s+delete\s+(?:ns|namespaces?)\b",
            write(Critical),
        ),
        Rule::new(
            "cluster_scope_deletion",
            r"\bkubectl\s+delete\s+.*--all\b",
            write(Critical),
        ),
        Rule::new(
            "force_push",
            r"\bgit\s+push\b.*(?:--force\b|\s-f\b)",
            write(Critical),
        ),
        Rule::new(
            "recursive_rm",
            r"\brm\s+(?:-\w+\s+)*-\w*r\w*\b",
            write(Critical),
        ),
        Rule::new(
            "release_uninstall",
            r"\bhelm\s+(?:uninstall|delete)\b",
            write(Critical),
        ),
        Rule::new(
            "package_removal",
            r"\b(?:apt-get|apt|yum|dnf)\s+(?:remove|purge|erase|autoremove)\b",
            write(Critical),
        ),
        // ── High ────────────────────────────────────────────────────────
        Rule::new("resource_deletion", r"\bkubectl\s+delete\b", write(High)),
        Rule::new(
            "node_drain_cordon",
            r"\bkubectl\s+(?:drain|cordon)\b",
            write(High),
        ),
        Rule::new("hard_reset", r"\bgit\s+reset\s+--hard\b", write(High)),
        Rule::new("git_push", r"\bgit\s+push\b", write(High)),
        Rule::new(
            "release_install",
            r"\bhelm\s+(?:install|upgrade|rollback)\b",
            write(High),
        ),
        // ── Medium ──────────────────────────────────────────────────────
        Rule::new("workload_scaling", r"\bkubectl\s+scale\b", write(Medium)),
        Rule::new(
            "rollout_mutation",
            r"\bkubectl\s+rollout\s+(?:restart|undo|pause|resume)\b",
            write(Medium),
        ),
        Rule::new(
            "resource_mutation",
            r"\bkubectl\s+(?:apply|create|patch|edit|replace|label|annotate|set)\b",
            write(Medium),
        ),
        Rule::new(
            "history_mutation",
            r"\bgit\s+(?:commit|merge|rebase)\b",
            write(Medium),
        ),
        // ── Catch-all write verbs (default: low) ────────────────────────
        Rule::new(
            "kubectl_write_verb",
            r"\bkubectl\s+(?:uncordon|taint|exec|cp)\b",
            write(Low),
        ),
        Rule::new(
            "git_write_verb",
            r"\bgit\s+(?:reset|cherry-pick|revert|am|stash\s+(?:pop|drop)|tag\s+\S+)",
            write(Low),
        ),
        Rule::new(
            "filesystem_write",
            r"(?:^|[;&|]\s*|\bsudo\s+)(?:rm|mv|cp|mkdir|rmdir|touch|chmod|chown|ln|truncate|tee|dd)\b",
            write(Low),
        ),
        Rule::new("shell_redirect", r"(?:^|[^<>])>>?\s*[^\s>&]", write(Low)),
        Rule::new("in_place_edit", r"\bsed\s+(?:-\w+\s+)*-i\b", write(Low)),
        Rule::new(
            "package_mutation",
            r"\b(?:apt-get|apt|yum|dnf|apk|brew|pip3?|npm|yarn|cargo|gem)\s+(?:install|uninstall|remove|purge|upgrade|update|add|dist-upgrade)\b",
            write(Low),
        ),
        Rule::new(
            "service_mutation",
            r"\bsystemctl\s+(?:start|stop|restart|reload|enable|disable|mask|unmask|kill)\b",
            write(Low),
        ),
        Rule::new(
            "service_legacy_mutation",
            r"\bservice\s+\S+\s+(?:start|stop|restart|reload)\b",
            write(Low),
        ),
        Rule::new(
            "container_lifecycle",
            r"\b(?:docker|podman|nerdctl)\s+(?:run|start|stop|restart|kill|rm|rmi|build|push|pull|create|prune|tag|load|import)\b",
            write(Low),
        ),
    ]
});

/// Evaluate the table top to bottom and return the first matching outcome.
pub(crate) fn first_match(command: &str) -> Option<RuleOutcome> {
    RULES
        .iter()
        .find(|rule| rule.regex.is_match(command))
        .map(|rule| rule.outcome)
}
