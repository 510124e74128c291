//! Health gate
//!
//! Polls pod readiness for one version target until every matching pod is
//! Running and Ready, or the timeout elapses. Purely observational.

use crate::orchestrator::{Orchestrator, OrchestratorError, PodReadiness};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Result of waiting on a target's pods
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum HealthVerdict {
    Healthy { pods: usize },
    /// No pods match the selector at all
    Unhealthy { reason: String },
    TimedOut { ready: usize, total: usize, seconds: u64 },
}

impl HealthVerdict {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthVerdict::Healthy { .. })
    }
}

impl fmt::Display for HealthVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthVerdict::Healthy { pods } => write!(f, "healthy ({pods} pods ready)"),
            HealthVerdict::Unhealthy { reason } => write!(f, "unhealthy: {reason}"),
            HealthVerdict::TimedOut {
                ready,
                total,
                seconds,
            } => write!(f, "timed out after {seconds}s with {ready}/{total} pods ready"),
        }
    }
}

/// Count of healthy pods in a readiness listing
pub fn ready_count(pods: &[PodReadiness]) -> usize {
    pods.iter().filter(|p| p.is_healthy()).count()
}

pub struct HealthGate<'a> {
    orchestrator: &'a dyn Orchestrator,
    poll_interval: Duration,
}

impl<'a> HealthGate<'a> {
    pub fn new(orchestrator: &'a dyn Orchestrator, poll_interval: Duration) -> Self {
        HealthGate {
            orchestrator,
            poll_interval,
        }
    }

    /// Wait until all pods behind `selector` are healthy
    ///
    /// Zero matching pods is `Unhealthy` right away; pods that exist but are
    /// not ready yet are polled until `timeout`. Orchestrator errors are
    /// returned as-is, never folded into a verdict.
    pub async fn await_healthy(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<HealthVerdict, OrchestratorError> {
        let deadline = Instant::now() + timeout;

        loop {
            let pods = self.orchestrator.get_pod_readiness(selector).await?;
            let total = pods.len();

            if total == 0 {
                warn!(selector, "No pods match selector");
                return Ok(HealthVerdict::Unhealthy {
                    reason: format!("no pods match {selector}"),
                });
            }

            let ready = ready_count(&pods);
            if ready == total {
                info!(selector, pods = total, "All pods healthy");
                return Ok(HealthVerdict::Healthy { pods: total });
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(selector, ready, total, "Health check timed out");
                return Ok(HealthVerdict::TimedOut {
                    ready,
                    total,
                    seconds: timeout.as_secs(),
                });
            }

            debug!(selector, ready, total, "Waiting for pods to become ready");
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}
