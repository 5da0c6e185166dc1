//! Per-scenario driver
//!
//! A scenario walks `Setup → Act → Verify → [FaultInject → Reverify] →
//! Teardown`. Every query, oracle access, fault, and check is recorded
//! against the phase it ran in, and teardown resumes any container the
//! scenario left paused so later scenarios start from a healthy cluster.

use super::assertions::{assert_exact, assert_fails, AssertionResult, ErrorExpectation};
use super::cluster::ClusterHandle;
use super::config::ClusterConfig;
use super::error::{HarnessError, HarnessResult};
use super::report::{ScenarioReport, StepRecord};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// Scenario phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    Act,
    Verify,
    FaultInject,
    Reverify,
    Teardown,
}

impl Phase {
    fn can_follow(self, previous: Option<Phase>) -> bool {
        use Phase::*;
        match previous {
            None => matches!(self, Setup | Teardown),
            Some(prev) if prev == self && prev != Teardown => true,
            Some(Setup) => matches!(self, Act | FaultInject | Teardown),
            Some(Act) => matches!(self, Verify | Teardown),
            Some(Verify) => matches!(self, Act | FaultInject | Teardown),
            Some(FaultInject) => matches!(self, Reverify | Teardown),
            Some(Reverify) => matches!(self, FaultInject | Teardown),
            Some(Teardown) => false,
        }
    }

    fn allows_statements(self) -> bool {
        matches!(
            self,
            Phase::Setup | Phase::Act | Phase::Verify | Phase::Reverify
        )
    }

    fn allows_checks(self) -> bool {
        matches!(self, Phase::Verify | Phase::Reverify)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Setup => "SETUP",
            Phase::Act => "ACT",
            Phase::Verify => "VERIFY",
            Phase::FaultInject => "FAULT_INJECT",
            Phase::Reverify => "REVERIFY",
            Phase::Teardown => "TEARDOWN",
        };
        f.write_str(name)
    }
}

/// Fault applied during [`Phase::FaultInject`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultInjection {
    PauseContainer(String),
    UnpauseContainer(String),
    /// Wait long enough for every cached ticket to expire
    ExpireCredentials,
    Sleep(Duration),
}

impl fmt::Display for FaultInjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultInjection::PauseContainer(name) => write!(f, "pause {}", name),
            FaultInjection::UnpauseContainer(name) => write!(f, "unpause {}", name),
            FaultInjection::ExpireCredentials => f.write_str("expire credentials"),
            FaultInjection::Sleep(d) => write!(f, "sleep {:?}", d),
        }
    }
}

/// Settings shared by every scenario of a run
#[derive(Debug, Clone)]
pub struct ScenarioContext {
    /// Wait applied by [`FaultInjection::ExpireCredentials`]
    pub expiry_wait: Duration,
}

impl ScenarioContext {
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            expiry_wait: config.expiry_wait(),
        }
    }

    pub fn with_expiry_wait(mut self, wait: Duration) -> Self {
        self.expiry_wait = wait;
        self
    }
}

/// Driver for one scenario against an injected cluster
pub struct Scenario<'a> {
    name: String,
    cluster: &'a ClusterHandle,
    ctx: &'a ScenarioContext,
    phase: Option<Phase>,
    started: Instant,
    started_at: chrono::DateTime<chrono::Utc>,
    steps: Vec<StepRecord>,
    assertions: Vec<AssertionResult>,
    paused: Vec<String>,
}

impl<'a> Scenario<'a> {
    pub fn new(name: &str, cluster: &'a ClusterHandle, ctx: &'a ScenarioContext) -> Self {
        Self {
            name: name.to_string(),
            cluster,
            ctx,
            phase: None,
            started: Instant::now(),
            started_at: chrono::Utc::now(),
            steps: Vec::new(),
            assertions: Vec::new(),
            paused: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cluster(&self) -> &'a ClusterHandle {
        self.cluster
    }

    pub fn config(&self) -> &'a ClusterConfig {
        self.cluster.config()
    }

    pub fn current_phase(&self) -> Option<Phase> {
        self.phase
    }

    /// Move to `phase`; out-of-order transitions are rejected
    pub fn enter(&mut self, phase: Phase) -> HarnessResult<()> {
        if !phase.can_follow(self.phase) {
            return Err(HarnessError::config(format!(
                "scenario '{}': cannot enter {} after {}",
                self.name,
                phase,
                self.phase
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "start".to_string())
            )));
        }
        if self.phase != Some(phase) {
            log::debug!("[{}] -> {}", self.name, phase);
        }
        self.phase = Some(phase);
        Ok(())
    }

    /// Send a statement to the database node.
    ///
    /// The outcome is returned as-is; callers expecting a failure pass it to
    /// [`verify_error`](Self::verify_error) instead of using `?`.
    pub async fn query(&mut self, statement: &str) -> HarnessResult<String> {
        let phase = self.require(Phase::allows_statements, "query")?;
        let outcome = self.cluster.node().query(statement).await;
        self.record(phase, format!("query: {}", statement), outcome.is_ok());
        outcome
    }

    /// Write through the oracle, bypassing the database node
    pub async fn write_data(&mut self, path: &str, data: &str) -> HarnessResult<()> {
        let phase = self.require(Phase::allows_statements, "write_data")?;
        let outcome = self.cluster.oracle().write_data(path, data).await;
        self.record(phase, format!("oracle write: {}", path), outcome.is_ok());
        outcome
    }

    /// Read through the oracle, bypassing the database node
    pub async fn read_data(&mut self, path: &str) -> HarnessResult<String> {
        let phase = self.require(Phase::allows_statements, "read_data")?;
        let outcome = self.cluster.oracle().read_data(path).await;
        self.record(phase, format!("oracle read: {}", path), outcome.is_ok());
        outcome
    }

    /// Oracle existence check
    pub async fn data_exists(&mut self, path: &str) -> HarnessResult<bool> {
        let phase = self.require(Phase::allows_statements, "data_exists")?;
        let outcome = self.cluster.oracle().exists(path).await;
        self.record(phase, format!("oracle exists: {}", path), outcome.is_ok());
        outcome
    }

    pub fn verify_exact(&mut self, label: &str, expected: &str, actual: &str) -> HarnessResult<()> {
        self.verify(assert_exact(label, expected, actual))
    }

    pub fn verify_error<T: fmt::Debug>(
        &mut self,
        outcome: &HarnessResult<T>,
        expectation: &ErrorExpectation,
    ) -> HarnessResult<()> {
        self.verify(assert_fails(outcome, expectation))
    }

    /// Record an assertion result, failing the scenario if it did not pass
    pub fn verify(&mut self, result: AssertionResult) -> HarnessResult<()> {
        let phase = self.require(Phase::allows_checks, "verify")?;
        self.record(
            phase,
            format!("check {}: {}", result.assertion_type, result.message),
            result.passed,
        );
        self.assertions.push(result.clone());
        result.into_result()
    }

    pub async fn inject(&mut self, fault: FaultInjection) -> HarnessResult<()> {
        let phase = self.require(|p| p == Phase::FaultInject, "inject")?;
        log::info!("[{}] injecting fault: {}", self.name, fault);

        let outcome = match &fault {
            FaultInjection::PauseContainer(name) => {
                let outcome = self.cluster.pause_container(name).await;
                if outcome.is_ok() && !self.paused.contains(name) {
                    self.paused.push(name.clone());
                }
                outcome
            }
            FaultInjection::UnpauseContainer(name) => {
                let outcome = self.cluster.unpause_container(name).await;
                if outcome.is_ok() {
                    self.paused.retain(|p| p != name);
                }
                outcome
            }
            FaultInjection::ExpireCredentials => {
                self.cluster.clock().sleep(self.ctx.expiry_wait).await;
                Ok(())
            }
            FaultInjection::Sleep(duration) => {
                self.cluster.clock().sleep(*duration).await;
                Ok(())
            }
        };

        self.record(phase, format!("fault: {}", fault), outcome.is_ok());
        outcome
    }

    /// Enter teardown and resume anything this scenario left paused
    pub async fn teardown(&mut self) {
        self.phase = Some(Phase::Teardown);
        for name in std::mem::take(&mut self.paused) {
            log::info!("[{}] teardown: unpausing '{}'", self.name, name);
            let outcome = self.cluster.unpause_container(&name).await;
            if let Err(ref e) = outcome {
                log::warn!("[{}] failed to unpause '{}': {}", self.name, name, e);
            }
            self.record(
                Phase::Teardown,
                format!("unpause leftover: {}", name),
                outcome.is_ok(),
            );
        }
    }

    /// Close the scenario with its final outcome
    pub fn finish(self, outcome: HarnessResult<()>) -> ScenarioReport {
        let error = outcome.err();
        if let Some(ref e) = error {
            log::warn!("[{}] FAILED: {}", self.name, e);
        } else {
            log::info!("[{}] passed", self.name);
        }
        ScenarioReport {
            name: self.name,
            passed: error.is_none(),
            error: error.map(|e| e.to_string()),
            started_at: self.started_at,
            duration_ms: self.started.elapsed().as_millis() as u64,
            steps: self.steps,
            assertions: self.assertions,
        }
    }

    fn require(&self, allowed: impl Fn(Phase) -> bool, operation: &str) -> HarnessResult<Phase> {
        match self.phase {
            Some(phase) if allowed(phase) => Ok(phase),
            other => Err(HarnessError::config(format!(
                "scenario '{}': {} is not allowed in phase {}",
                self.name,
                operation,
                other
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "start".to_string())
            ))),
        }
    }

    fn record(&mut self, phase: Phase, action: String, ok: bool) {
        self.steps.push(StepRecord {
            phase,
            action,
            ok,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_transitions() {
        assert!(Phase::Setup.can_follow(None));
        assert!(Phase::Act.can_follow(Some(Phase::Setup)));
        assert!(Phase::Verify.can_follow(Some(Phase::Act)));
        assert!(Phase::FaultInject.can_follow(Some(Phase::Verify)));
        assert!(Phase::Reverify.can_follow(Some(Phase::FaultInject)));
        assert!(Phase::Teardown.can_follow(Some(Phase::Reverify)));
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!Phase::Act.can_follow(None));
        assert!(!Phase::Verify.can_follow(Some(Phase::Setup)));
        assert!(!Phase::Reverify.can_follow(Some(Phase::Verify)));
        assert!(!Phase::Setup.can_follow(Some(Phase::Teardown)));
        assert!(!Phase::Teardown.can_follow(Some(Phase::Teardown)));
    }

    #[test]
    fn test_fault_display() {
        assert_eq!(
            FaultInjection::PauseContainer("hdfskerberos".to_string()).to_string(),
            "pause hdfskerberos"
        );
        assert_eq!(FaultInjection::ExpireCredentials.to_string(), "expire credentials");
    }

    #[test]
    fn test_context_from_config() {
        let ctx = ScenarioContext::from_config(&ClusterConfig::default());
        assert_eq!(ctx.expiry_wait, Duration::from_secs(45));
        let ctx = ctx.with_expiry_wait(Duration::from_secs(1));
        assert_eq!(ctx.expiry_wait, Duration::from_secs(1));
    }
}
