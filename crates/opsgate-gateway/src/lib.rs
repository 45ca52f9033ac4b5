#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! The opsgate command gateway.
//!
//! [`CommandGateway::run`] is the single entry point the agent's
//! tool-calling layer invokes. Per call it decides one of three things:
//!
//! 1. the command is read-only — execute it immediately;
//! 2. the command mutates state and a currently-valid token was presented —
//!    consume the token and execute;
//! 3. the command mutates state and no valid token exists — register a
//!    pending approval and return its id and risk tier, touching no backend.
//!
//! All executed output is redacted before it is returned. Backend failures
//! come back as `executed = true` with a populated error, never as a panic
//! or a thrown error: the gateway's job is to turn "not authorized yet"
//! into a well-formed "please approve" response, not an error path.
//!
//! The collaborators (classifier, ledger, backend) are constructed by the
//! caller and injected, giving them explicit lifecycles and making the
//! gateway trivially testable with a scripted backend.

mod redact;

pub use redact::Redactor;

use opsgate_approval::{ApprovalLedger, PendingApproval};
use opsgate_classify::RiskClassifier;
use opsgate_core::{ApprovalId, ExecutionResult, RiskTier};
use opsgate_exec::ExecutionBackend;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The outcome of one [`CommandGateway::run`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse {
    /// Whether the command was executed.
    pub executed: bool,
    /// The redacted execution result, when executed.
    pub result: Option<ExecutionResult>,
    /// Whether the caller must obtain human approval and retry.
    pub requires_approval: bool,
    /// The pending approval to present to the human, when approval is
    /// required.
    pub approval_id: Option<ApprovalId>,
    /// Risk tier of the command, when it is a write command.
    pub risk_tier: Option<RiskTier>,
    /// Backend failure description, when execution was attempted but the
    /// backend itself failed.
    pub error: Option<String>,
}

impl GatewayResponse {
    /// An executed command with its redacted result.
    #[must_use]
    fn executed(result: ExecutionResult, risk_tier: Option<RiskTier>) -> Self {
        Self {
            executed: true,
            result: Some(result),
            requires_approval: false,
            approval_id: None,
            risk_tier,
            error: None,
        }
    }

    /// An execution attempt whose backend failed.
    #[must_use]
    fn failed(error: String, risk_tier: Option<RiskTier>) -> Self {
        Self {
            executed: true,
            result: None,
            requires_approval: false,
            approval_id: None,
            risk_tier,
            error: Some(error),
        }
    }

    /// A write command awaiting human approval.
    #[must_use]
    fn needs_approval(pending: &PendingApproval) -> Self {
        Self {
            executed: false,
            result: None,
            requires_approval: true,
            approval_id: Some(pending.id.clone()),
            risk_tier: Some(pending.risk_tier),
            error: None,
        }
    }
}

/// The command gateway: classification, approval gating and redacted
/// execution behind one entry point.
pub struct CommandGateway {
    classifier: RiskClassifier,
    ledger: Arc<ApprovalLedger>,
    backend: Arc<dyn ExecutionBackend>,
    redactor: Redactor,
}

impl CommandGateway {
    /// Create a gateway from its injected collaborators.
    #[must_use]
    pub fn new(
        classifier: RiskClassifier,
        ledger: Arc<ApprovalLedger>,
        backend: Arc<dyn ExecutionBackend>,
    ) -> Self {
        Self {
            classifier,
            ledger,
            backend,
            redactor: Redactor::new(),
        }
    }

    /// The approval ledger, for approval-UI collaborators that share this
    /// gateway instance.
    #[must_use]
    pub fn ledger(&self) -> &ApprovalLedger {
        &self.ledger
    }

    /// Run a command, optionally presenting an approval token.
    ///
    /// Write commands never reach the backend without a valid token: an
    /// absent, expired, consumed or mismatched token falls through to a
    /// fresh approval request, and that path performs no backend call at
    /// all.
    pub async fn run(&self, command: &str, approval_token: Option<&str>) -> GatewayResponse {
        let tier = self.classifier.classify(command);

        let Some(tier) = tier else {
            tracing::debug!("read-only command, executing");
            return self.execute_redacted(command, None).await;
        };

        if let Some(token) = approval_token {
            if self.ledger.validate_token(command, token) {
                tracing::info!(%tier, "token accepted, executing write command");
                return self.execute_redacted(command, Some(tier)).await;
            }
            tracing::warn!(%tier, "token invalid or expired, requesting fresh approval");
        }

        let pending = self.ledger.request_approval(command);
        tracing::info!(id = %pending.id, %tier, "write command held for approval");
        GatewayResponse::needs_approval(&pending)
    }

    async fn execute_redacted(
        &self,
        command: &str,
        risk_tier: Option<RiskTier>,
    ) -> GatewayResponse {
        match self.backend.execute(command).await {
            Ok(mut result) => {
                result.stdout = self.redactor.redact(&result.stdout);
                result.stderr = self.redactor.redact(&result.stderr);
                GatewayResponse::executed(result, risk_tier)
            },
            Err(error) => {
                tracing::warn!(%error, "backend execution failed");
                GatewayResponse::failed(error.to_string(), risk_tier)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use opsgate_exec::{ExecError, ExecResult};
    use std::sync::Mutex;

    const SCALE_CMD: &str = "kubectl scale deployment/payments --replicas=3";

    /// A scripted backend that records every executed command.
    struct RecordingBackend {
        calls: Mutex<Vec<String>>,
        stdout: String,
        fail: bool,
    }

    impl RecordingBackend {
        fn new(stdout: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                stdout: stdout.to_string(),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                stdout: String::new(),
                fail: true,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExecutionBackend for RecordingBackend {
        async fn execute(&self, command: &str) -> ExecResult<ExecutionResult> {
            self.calls.lock().unwrap().push(command.to_string());
            if self.fail {
                return Err(ExecError::Connection("session lost".to_string()));
            }
            Ok(ExecutionResult::success(self.stdout.clone()))
        }

        async fn read_file(&self, _path: &str) -> ExecResult<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn list_dir(&self, _path: &str) -> ExecResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn make_gateway(backend: Arc<RecordingBackend>) -> CommandGateway {
        let classifier = RiskClassifier::new();
        let ledger = Arc::new(ApprovalLedger::new(classifier));
        CommandGateway::new(classifier, ledger, backend)
    }

    // -------------------------------------------------------------------
    // Read-only path
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_read_only_executes_immediately() {
        let backend = Arc::new(RecordingBackend::new("payments-7d4b9   1/1   Running\n"));
        let gateway = make_gateway(Arc::clone(&backend));

        let response = gateway.run("kubectl get pods -n prod", None).await;
        assert!(response.executed);
        assert!(!response.requires_approval);
        assert!(response.risk_tier.is_none());
        assert!(response.result.unwrap().stdout.contains("Running"));
        assert_eq!(backend.calls(), vec!["kubectl get pods -n prod"]);
    }

    // -------------------------------------------------------------------
    // Write path: gating
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_write_without_token_requires_approval() {
        let backend = Arc::new(RecordingBackend::new(""));
        let gateway = make_gateway(Arc::clone(&backend));

        let response = gateway.run(SCALE_CMD, None).await;
        assert!(!response.executed);
        assert!(response.requires_approval);
        assert_eq!(response.risk_tier, Some(RiskTier::Medium));
        assert!(response.approval_id.is_some());
        assert!(response.result.is_none());
        // The backend was never touched.
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_every_write_tier_is_gated() {
        let backend = Arc::new(RecordingBackend::new(""));
        let gateway = make_gateway(Arc::clone(&backend));

        for command in [
            "kubectl delete namespace prod",
            "kubectl delete pod x",
            "kubectl scale deployment/x --replicas=0",
            "touch /srv/flag",
        ] {
            let response = gateway.run(command, None).await;
            assert!(response.requires_approval, "{command} should be gated");
            assert!(response.risk_tier.is_some());
        }
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_token_falls_back_to_fresh_approval() {
        let backend = Arc::new(RecordingBackend::new(""));
        let gateway = make_gateway(Arc::clone(&backend));

        let response = gateway.run(SCALE_CMD, Some("bogus-token")).await;
        assert!(!response.executed);
        assert!(response.requires_approval);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_token_bound_to_exact_command() {
        let backend = Arc::new(RecordingBackend::new(""));
        let gateway = make_gateway(Arc::clone(&backend));

        let pending = gateway.ledger().request_approval(SCALE_CMD);
        let token = gateway.ledger().approve(&pending.id).unwrap();

        // Presenting the token with a different command does not execute.
        let response = gateway
            .run("kubectl delete namespace prod", Some(&token))
            .await;
        assert!(!response.executed);
        assert!(response.requires_approval);
        assert!(backend.calls().is_empty());

        // The token still works for the command it was issued for.
        let response = gateway.run(SCALE_CMD, Some(&token)).await;
        assert!(response.executed);
    }

    // -------------------------------------------------------------------
    // Write path: end to end
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_end_to_end_approval_flow() {
        let backend = Arc::new(RecordingBackend::new("deployment.apps/payments scaled\n"));
        let gateway = make_gateway(Arc::clone(&backend));

        // 1. First attempt is held for approval.
        let held = gateway.run(SCALE_CMD, None).await;
        let approval_id = held.approval_id.unwrap();

        // 2. The human approves.
        let token = gateway.ledger().approve(&approval_id).unwrap();

        // 3. Retried with the token, the command executes.
        let response = gateway.run(SCALE_CMD, Some(&token)).await;
        assert!(response.executed);
        assert_eq!(response.risk_tier, Some(RiskTier::Medium));
        assert!(response.result.unwrap().stdout.contains("scaled"));
        assert_eq!(backend.calls(), vec![SCALE_CMD]);

        // 4. The token was consumed: the same call now needs fresh approval.
        let replay = gateway.run(SCALE_CMD, Some(&token)).await;
        assert!(!replay.executed);
        assert!(replay.requires_approval);
        let new_id = replay.approval_id.unwrap();
        assert_ne!(new_id, approval_id);
        // Still exactly one execution.
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_approval_never_executes() {
        let backend = Arc::new(RecordingBackend::new(""));
        let gateway = make_gateway(Arc::clone(&backend));

        let held = gateway.run(SCALE_CMD, None).await;
        let approval_id = held.approval_id.unwrap();
        gateway.ledger().reject(&approval_id);

        assert!(gateway.ledger().approve(&approval_id).is_none());
        assert!(backend.calls().is_empty());
    }

    // -------------------------------------------------------------------
    // Backend failures & redaction
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_backend_failure_is_reported_not_thrown() {
        let backend = Arc::new(RecordingBackend::failing());
        let gateway = make_gateway(Arc::clone(&backend));

        let response = gateway.run("kubectl get pods", None).await;
        assert!(response.executed);
        assert!(response.result.is_none());
        assert!(response.error.unwrap().contains("session lost"));
    }

    #[tokio::test]
    async fn test_output_is_redacted() {
        let backend = Arc::new(RecordingBackend::new(
            "Authorization: Bearer abc123\npassword=hunter2\n",
        ));
        let gateway = make_gateway(Arc::clone(&backend));

        let response = gateway.run("env", None).await;
        let stdout = response.result.unwrap().stdout;
        assert!(!stdout.contains("abc123"));
        assert!(!stdout.contains("hunter2"));
        assert!(stdout.contains("[REDACTED]"));
    }
}
