//! Release strategies
//!
//! - `BlueGreenController`: stage a new image on the idle color, then cut
//!   traffic over atomically by patching the service selector
//! - `CanaryController`: walk a canary through the fixed weight ladder via
//!   the ingress traffic-split annotation, with an always-available rollback
//!
//! Both gate every traffic increase on the health gate.

pub mod blue_green;
pub mod canary;

pub use blue_green::BlueGreenController;
pub use canary::CanaryController;

use crate::controller::context::Context;
use crate::controller::health::HealthVerdict;
use crate::controller::report::{Outcome, Phase, Recorder};
use crate::orchestrator::OrchestratorError;
use crate::state::{StateError, VersionTarget};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Errors that stop an operation before it produces a report
///
/// Failures inside an operation (orchestrator calls, health gates) are
/// reported through `OperationReport` instead, with the failed stage named.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("release state error: {0}")]
    State(#[from] StateError),

    #[error("live cluster state is inconsistent: {0}")]
    InconsistentLiveState(String),
}

/// Why staging a new version did not reach a healthy state
#[derive(Debug)]
pub(crate) enum StageFailure {
    Orchestrator,
    Unhealthy,
}

impl StageFailure {
    pub(crate) fn outcome(&self) -> Outcome {
        match self {
            StageFailure::Orchestrator => Outcome::OrchestratorUnavailable,
            StageFailure::Unhealthy => Outcome::HealthCheckFailed,
        }
    }
}

/// Set image, scale up, then wait for rollout and pod health
///
/// The rollout wait and the health gate share one deadline of `timeout`.
/// Stops at the first failed step.
pub(crate) async fn stage_version(
    ctx: &Context,
    rec: &mut Recorder,
    target: VersionTarget,
    image: &str,
    replicas: i32,
    timeout: Duration,
    verify_phase: impl Into<Phase>,
) -> Result<HealthVerdict, StageFailure> {
    let deployment = ctx.config.deployment_for(target);

    if let Err(e) = ctx.orchestrator.set_image(&deployment, image).await {
        rec.failed("set-image", format!("{deployment}: {e}"));
        return Err(StageFailure::Orchestrator);
    }
    rec.ok("set-image", format!("{deployment} -> {image}"));

    if let Err(e) = ctx.orchestrator.scale(&deployment, replicas).await {
        rec.failed("scale-up", format!("{deployment}: {e}"));
        return Err(StageFailure::Orchestrator);
    }
    rec.ok("scale-up", format!("{deployment} -> {replicas} replicas"));

    rec.enter(verify_phase);
    let deadline = Instant::now() + timeout;

    match ctx.orchestrator.wait_for_rollout(&deployment, timeout).await {
        Ok(()) => rec.ok("wait-for-rollout", format!("{deployment} rolled out")),
        Err(e @ OrchestratorError::Timeout { .. }) => {
            rec.failed("wait-for-rollout", e.to_string());
            return Err(StageFailure::Unhealthy);
        }
        Err(e) => {
            rec.failed("wait-for-rollout", e.to_string());
            return Err(StageFailure::Orchestrator);
        }
    }

    let remaining = deadline.saturating_duration_since(Instant::now());
    match ctx.await_healthy(target, remaining).await {
        Ok(verdict) if verdict.is_healthy() => {
            rec.ok("health-check", verdict.to_string());
            Ok(verdict)
        }
        Ok(verdict) => {
            rec.failed("health-check", verdict.to_string());
            Err(StageFailure::Unhealthy)
        }
        Err(e) => {
            rec.failed("health-check", e.to_string());
            Err(StageFailure::Orchestrator)
        }
    }
}
