//! Structured operation results
//!
//! Every controller operation returns an `OperationReport`: the outcome,
//! the release record before and after, and a stage-by-stage log precise
//! enough for a CI job to tell whether traffic actually moved.

use crate::state::ReleaseState;
use serde::Serialize;
use std::fmt;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    /// Nothing to do: target already active, or canary already at 100%
    AlreadyAtState,
    /// Traffic moved, but a cleanup step failed (old color left scaled up,
    /// or a canary record lagging the live weight)
    Degraded,
    /// Traffic moved, but the record still names the previous color;
    /// rerun the same switch to save it
    StateNotSaved,
    HealthCheckFailed,
    OrchestratorUnavailable,
    /// Rollback ran every step, at least one of them failed
    PartialRollback,
}

impl Outcome {
    /// Whether a pipeline may proceed to its next stage
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Outcome::Completed | Outcome::AlreadyAtState | Outcome::Degraded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::AlreadyAtState => "already_at_state",
            Outcome::Degraded => "degraded",
            Outcome::StateNotSaved => "state_not_saved",
            Outcome::HealthCheckFailed => "health_check_failed",
            Outcome::OrchestratorUnavailable => "orchestrator_unavailable",
            Outcome::PartialRollback => "partial_rollback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlueGreenPhase {
    Idle,
    Deploying,
    HealthChecking,
    Switching,
    ScalingDown,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CanaryPhase {
    Disabled,
    Deploying,
    Promoting,
    Monitoring,
    Promoted,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Phase {
    BlueGreen(BlueGreenPhase),
    Canary(CanaryPhase),
}

impl From<BlueGreenPhase> for Phase {
    fn from(p: BlueGreenPhase) -> Self {
        Phase::BlueGreen(p)
    }
}

impl From<CanaryPhase> for Phase {
    fn from(p: CanaryPhase) -> Self {
        Phase::Canary(p)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Serialized form doubles as the display name
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Ok,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub phase: Phase,
    pub stage: &'static str,
    pub status: StageStatus,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationReport {
    pub operation: &'static str,
    pub outcome: Outcome,
    /// Terminal phase of the operation's state machine
    pub phase: Phase,
    pub message: String,
    pub before: ReleaseState,
    pub after: ReleaseState,
    pub stages: Vec<StageReport>,
}

impl OperationReport {
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == name)
    }

    pub fn failed_stages(&self) -> impl Iterator<Item = &StageReport> {
        self.stages.iter().filter(|s| s.status == StageStatus::Failed)
    }
}

impl fmt::Display for OperationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} ({})",
            self.operation,
            self.outcome.as_str(),
            self.phase
        )?;
        for s in &self.stages {
            let mark = match s.status {
                StageStatus::Ok => "ok",
                StageStatus::Failed => "FAILED",
                StageStatus::Skipped => "skipped",
            };
            writeln!(f, "  [{mark:>7}] {:<20} {}", s.stage, s.detail)?;
        }
        writeln!(
            f,
            "  active color: {} -> {}",
            self.before.active_color(),
            self.after.active_color()
        )?;
        writeln!(
            f,
            "  canary weight: {} -> {}",
            self.before.canary.weight(),
            self.after.canary.weight()
        )?;
        write!(f, "{}", self.message)
    }
}

/// Accumulates stages while an operation runs
pub struct Recorder {
    operation: &'static str,
    phase: Phase,
    before: ReleaseState,
    stages: Vec<StageReport>,
}

impl Recorder {
    pub fn new(operation: &'static str, phase: impl Into<Phase>, before: &ReleaseState) -> Self {
        Recorder {
            operation,
            phase: phase.into(),
            before: before.clone(),
            stages: Vec::new(),
        }
    }

    pub fn enter(&mut self, phase: impl Into<Phase>) {
        self.phase = phase.into();
    }

    pub fn failed_stage_names(&self) -> Vec<&'static str> {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Failed)
            .map(|s| s.stage)
            .collect()
    }

    pub fn ok(&mut self, stage: &'static str, detail: impl Into<String>) {
        let detail = detail.into();
        info!(operation = self.operation, stage, %detail, "Stage succeeded");
        self.push(stage, StageStatus::Ok, detail);
    }

    pub fn failed(&mut self, stage: &'static str, detail: impl Into<String>) {
        let detail = detail.into();
        error!(operation = self.operation, stage, %detail, "Stage failed");
        self.push(stage, StageStatus::Failed, detail);
    }

    pub fn skipped(&mut self, stage: &'static str, detail: impl Into<String>) {
        let detail = detail.into();
        warn!(operation = self.operation, stage, %detail, "Stage skipped");
        self.push(stage, StageStatus::Skipped, detail);
    }

    fn push(&mut self, stage: &'static str, status: StageStatus, detail: String) {
        self.stages.push(StageReport {
            phase: self.phase,
            stage,
            status,
            detail,
        });
    }

    pub fn finish(
        self,
        outcome: Outcome,
        phase: impl Into<Phase>,
        after: ReleaseState,
        message: impl Into<String>,
    ) -> OperationReport {
        let report = OperationReport {
            operation: self.operation,
            outcome,
            phase: phase.into(),
            message: message.into(),
            before: self.before,
            after,
            stages: self.stages,
        };
        info!(
            operation = report.operation,
            outcome = report.outcome.as_str(),
            phase = %report.phase,
            "Operation finished"
        );
        report
    }

    /// Finish with the record unchanged
    pub fn finish_unchanged(
        self,
        outcome: Outcome,
        phase: impl Into<Phase>,
        message: impl Into<String>,
    ) -> OperationReport {
        let after = self.before.clone();
        self.finish(outcome, phase, after, message)
    }
}
