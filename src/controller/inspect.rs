//! Read-only views of a service
//!
//! `status` puts the persisted record next to live cluster reads and lists
//! where they disagree. `health_check` reports pod readiness per target.
//! Neither changes anything.

use crate::controller::context::Context;
use crate::controller::health::ready_count;
use crate::controller::strategies::ControllerError;
use crate::orchestrator::PodReadiness;
use crate::state::{Color, LadderWeight, ReleaseState, VersionTarget};
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use tracing::warn;

/// Observed state of one target's deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    pub target: VersionTarget,
    pub name: String,
    pub replicas: Option<i32>,
    pub ready_replicas: Option<i32>,
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persisted record next to what the cluster actually shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub namespace: String,
    pub service: String,
    pub record: ReleaseState,
    /// Version value of the service selector, as live
    pub live_selector: Option<String>,
    /// Raw canary weight annotation, as live
    pub live_canary_weight: Option<String>,
    pub deployments: Vec<DeploymentStatus>,
    /// Disagreements between the record and the cluster
    pub drift: Vec<String>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "status: {}/{}", self.namespace, self.service)?;
        writeln!(
            f,
            "  active color:  {} (live selector: {})",
            self.record.active_color(),
            self.live_selector.as_deref().unwrap_or("-")
        )?;
        writeln!(
            f,
            "  canary weight: {} stage {} (live annotation: {})",
            self.record.canary.weight(),
            self.record.canary.promotion_stage(),
            self.live_canary_weight.as_deref().unwrap_or("-")
        )?;
        if let Some(at) = self.record.last_transition_time {
            writeln!(f, "  last transition: {}", at.to_rfc3339())?;
        }
        for d in &self.deployments {
            match &d.error {
                Some(e) => writeln!(f, "  {:<7} {:<20} {e}", d.target, d.name)?,
                None => writeln!(
                    f,
                    "  {:<7} {:<20} {}/{} ready  {}",
                    d.target,
                    d.name,
                    d.ready_replicas.unwrap_or(0),
                    d.replicas.unwrap_or(0),
                    d.image.as_deref().unwrap_or("-")
                )?,
            }
        }
        if self.drift.is_empty() {
            write!(f, "  no drift")
        } else {
            let notes: Vec<String> = self.drift.iter().map(|d| format!("  drift: {d}")).collect();
            write!(f, "{}", notes.join("\n"))
        }
    }
}

/// Pod readiness of one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetHealth {
    pub target: VersionTarget,
    pub selector: String,
    pub ready: usize,
    pub total: usize,
    pub pods: Vec<PodReadiness>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub active_color: Color,
    pub targets: Vec<TargetHealth>,
    /// Every pod of the live color is Running and Ready
    pub active_color_healthy: bool,
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "health-check: active color {}", self.active_color)?;
        for t in &self.targets {
            match &t.error {
                Some(e) => writeln!(f, "  {:<7} {e}", t.target)?,
                None => writeln!(f, "  {:<7} {}/{} pods ready", t.target, t.ready, t.total)?,
            }
            for pod in &t.pods {
                let mark = if pod.is_healthy() { "ready" } else { "NOT READY" };
                writeln!(f, "    {:<40} {:<10} {mark}", pod.name, pod.phase)?;
            }
        }
        write!(
            f,
            "active color {}",
            if self.active_color_healthy {
                "healthy"
            } else {
                "UNHEALTHY"
            }
        )
    }
}

/// Record plus live cluster view; read-only
pub async fn status(ctx: &Context) -> Result<StatusReport, ControllerError> {
    let cfg = &ctx.config;
    let record = ctx.store.load().await?;
    let mut drift = Vec::new();

    let live_selector = match ctx
        .orchestrator
        .get_service_selector(&cfg.service, &cfg.version_label)
        .await
    {
        Ok(value) => value,
        Err(e) => {
            drift.push(format!("could not read service {}: {e}", cfg.service));
            None
        }
    };
    let live_canary_weight = match ctx
        .orchestrator
        .get_ingress_annotation(&cfg.canary_ingress, &cfg.weight_annotation)
        .await
    {
        Ok(value) => value,
        Err(e) => {
            drift.push(format!("could not read ingress {}: {e}", cfg.canary_ingress));
            None
        }
    };

    let deployments = join_all(VersionTarget::ALL.map(|target| async move {
        let name = cfg.deployment_for(target);
        match ctx.orchestrator.get_deployment(&name).await {
            Ok(info) => DeploymentStatus {
                target,
                name,
                replicas: Some(info.replicas),
                ready_replicas: Some(info.ready_replicas),
                image: info.image,
                error: None,
            },
            Err(e) => DeploymentStatus {
                target,
                name,
                replicas: None,
                ready_replicas: None,
                image: None,
                error: Some(e.to_string()),
            },
        }
    }))
    .await;

    drift.extend(detect_drift(
        &record,
        live_selector.as_deref(),
        live_canary_weight.as_deref(),
        &deployments,
    ));
    for note in &drift {
        warn!(service = %cfg.service, drift = %note, "Release state drift");
    }

    Ok(StatusReport {
        namespace: cfg.namespace.clone(),
        service: cfg.service.clone(),
        record,
        live_selector,
        live_canary_weight,
        deployments,
        drift,
    })
}

/// Per-pod readiness for every target; read-only, no waiting
pub async fn health_check(ctx: &Context) -> Result<HealthReport, ControllerError> {
    let record = ctx.store.load().await?;
    let active = record.active_color();
    let targets = join_all(VersionTarget::ALL.map(|target| async move {
        let selector = ctx.config.selector_for(target);
        match ctx.orchestrator.get_pod_readiness(&selector).await {
            Ok(pods) => TargetHealth {
                target,
                selector,
                ready: ready_count(&pods),
                total: pods.len(),
                pods,
                error: None,
            },
            Err(e) => TargetHealth {
                target,
                selector,
                ready: 0,
                total: 0,
                pods: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }))
    .await;

    let active_color_healthy = targets
        .iter()
        .find(|t| t.target == VersionTarget::from(active))
        .is_some_and(|t| t.error.is_none() && t.total > 0 && t.ready == t.total);

    Ok(HealthReport {
        active_color: active,
        targets,
        active_color_healthy,
    })
}

/// Compare the record against live reads
pub fn detect_drift(
    record: &ReleaseState,
    live_selector: Option<&str>,
    live_canary_weight: Option<&str>,
    deployments: &[DeploymentStatus],
) -> Vec<String> {
    let mut drift = Vec::new();
    let active = record.active_color();

    match live_selector {
        Some(live) if live == active.as_str() => {}
        Some(live) => drift.push(format!(
            "service selects {live:?} but the record says {active} is active"
        )),
        None => drift.push("service has no version selector".to_string()),
    }

    let stored = record.canary.weight();
    match live_canary_weight.map(|raw| (raw, raw.parse::<LadderWeight>())) {
        None if stored.percent() > 0 => drift.push(format!(
            "record says canary at {stored} but the ingress has no weight annotation"
        )),
        None => {}
        Some((raw, Err(_))) => drift.push(format!(
            "ingress canary weight {raw:?} is not a ladder stage"
        )),
        Some((_, Ok(live))) if live != stored => drift.push(format!(
            "ingress sends {live} to the canary but the record says {stored}"
        )),
        Some(_) => {}
    }

    // The idle color is the one the selector is not pointing at
    let serving = live_selector
        .and_then(|s| s.parse::<Color>().ok())
        .unwrap_or(active);
    let idle = VersionTarget::from(serving.other());
    if let Some(d) = deployments
        .iter()
        .find(|d| d.target == idle && d.replicas.is_some_and(|r| r > 0))
    {
        drift.push(format!(
            "idle color {} still runs {} replicas ({}); staged for a switch or left over from one",
            idle,
            d.replicas.unwrap_or(0),
            d.name
        ));
    }
    drift
}
