//! Canary release strategy
//!
//! The canary deployment receives a share of traffic through an ingress
//! weight annotation. The weight only ever takes ladder values
//! (`0, 10, 25, 50, 100`) and promotion moves exactly one stage at a time.
//! Reaching 100% does not replace the stable version; that is a separate
//! blue-green step.

use super::{stage_version, ControllerError};
use crate::controller::context::Context;
use crate::controller::report::{CanaryPhase, OperationReport, Outcome, Recorder};
use crate::state::{LadderWeight, ReleaseState, VersionTarget};
use tracing::{info, warn};

/// Phase a canary rests in at a given weight
pub fn resting_phase(weight: LadderWeight) -> CanaryPhase {
    match weight.percent() {
        0 => CanaryPhase::Disabled,
        100 => CanaryPhase::Promoted,
        _ => CanaryPhase::Monitoring,
    }
}

/// Result of writing a weight to the ingress and the record
enum Applied {
    Persisted(ReleaseState),
    /// Traffic moved but the record could not be saved
    Unpersisted(ReleaseState),
    NotApplied,
}

pub struct CanaryController;

impl CanaryController {
    /// Stage `image` on the canary and open it to the first ladder stage
    pub async fn deploy(
        &self,
        ctx: &Context,
        image: &str,
    ) -> Result<OperationReport, ControllerError> {
        let state = ctx.store.load().await?;
        let mut rec = Recorder::new(
            "canary-deploy",
            resting_phase(state.canary.weight()),
            &state,
        );
        rec.enter(CanaryPhase::Deploying);

        // An unproven image never serves traffic: pull the old canary out
        // first. The ingress decides, the record can lag it after a rollback
        // whose annotation patch failed.
        let live_traffic = match read_live_weight(ctx).await {
            Ok(live) => live.is_some_and(|w| w.percent() > 0),
            Err(LiveRead::OffLadder(raw)) => {
                warn!(raw = %raw, "Live canary weight is off the ladder, withdrawing it");
                true
            }
            Err(LiveRead::Unavailable(e)) => {
                rec.failed("read-live-weight", e);
                return Ok(rec.finish_unchanged(
                    Outcome::OrchestratorUnavailable,
                    resting_phase(state.canary.weight()),
                    "could not read the live canary weight; image not changed",
                ));
            }
        };
        if live_traffic && !state.canary.enabled() {
            warn!("Ingress still routes to the canary although the record says disabled");
        }

        let mut base = state.clone();
        if live_traffic || state.canary.enabled() {
            match apply_weight(ctx, &mut rec, &state, LadderWeight::ZERO, "withdraw-traffic")
                .await
            {
                Applied::Persisted(s) | Applied::Unpersisted(s) => base = s,
                Applied::NotApplied => {
                    return Ok(rec.finish_unchanged(
                        Outcome::OrchestratorUnavailable,
                        resting_phase(state.canary.weight()),
                        "could not withdraw traffic from the running canary; image not changed",
                    ));
                }
            }
            rec.enter(CanaryPhase::Deploying);
        }

        if let Err(failure) = stage_version(
            ctx,
            &mut rec,
            VersionTarget::Canary,
            image,
            ctx.config.canary_replicas,
            ctx.config.deploy_health_timeout,
            CanaryPhase::Monitoring,
        )
        .await
        {
            return Ok(rec.finish(
                failure.outcome(),
                CanaryPhase::Disabled,
                base,
                format!("canary {image} failed to become healthy; it receives no traffic"),
            ));
        }

        let first = LadderWeight::at_stage(1).unwrap_or(LadderWeight::ZERO);
        Ok(
            match apply_weight(ctx, &mut rec, &base, first, "annotate-weight").await {
                Applied::Persisted(after) => rec.finish(
                    Outcome::Completed,
                    CanaryPhase::Monitoring,
                    after,
                    format!("canary {image} live at {first}"),
                ),
                Applied::Unpersisted(after) => rec.finish(
                    Outcome::Degraded,
                    CanaryPhase::Monitoring,
                    after,
                    format!("canary {image} live at {first}; release state not saved"),
                ),
                Applied::NotApplied => rec.finish(
                    Outcome::OrchestratorUnavailable,
                    CanaryPhase::Disabled,
                    base,
                    format!("canary {image} is healthy but its weight could not be set"),
                ),
            },
        )
    }

    /// Move the canary directly to a ladder weight
    pub async fn set_weight(
        &self,
        ctx: &Context,
        weight: LadderWeight,
    ) -> Result<OperationReport, ControllerError> {
        let state = ctx.store.load().await?;
        let current_phase = resting_phase(state.canary.weight());
        let mut rec = Recorder::new("canary-set-weight", current_phase, &state);

        let live = match read_live_weight(ctx).await {
            Ok(live) => live,
            Err(LiveRead::Unavailable(e)) => {
                warn!(error = %e, "Could not read live canary weight, applying anyway");
                None
            }
            Err(LiveRead::OffLadder(raw)) => {
                warn!(raw = %raw, "Live canary weight is off the ladder, overwriting");
                None
            }
        };

        if live == Some(weight) && state.canary.weight() == weight {
            rec.skipped("annotate-weight", format!("already at {weight}"));
            return Ok(rec.finish_unchanged(
                Outcome::Completed,
                current_phase,
                format!("canary already at {weight}"),
            ));
        }

        Ok(self.gated_apply(ctx, rec, &state, weight).await)
    }

    /// Advance the canary one ladder stage
    pub async fn promote(&self, ctx: &Context) -> Result<OperationReport, ControllerError> {
        let state = ctx.store.load().await?;
        let stored = state.canary.weight();
        let mut rec = Recorder::new("canary-promote", resting_phase(stored), &state);

        let current = match read_live_weight(ctx).await {
            Ok(Some(live)) => {
                if live != stored {
                    warn!(
                        live = live.percent(),
                        stored = stored.percent(),
                        "Live canary weight differs from release state, using live"
                    );
                }
                live
            }
            Ok(None) => stored,
            Err(LiveRead::Unavailable(e)) => {
                rec.failed("read-live-weight", e);
                return Ok(rec.finish_unchanged(
                    Outcome::OrchestratorUnavailable,
                    resting_phase(stored),
                    "could not read the live canary weight; nothing changed",
                ));
            }
            Err(LiveRead::OffLadder(raw)) => {
                return Err(ControllerError::InconsistentLiveState(format!(
                    "ingress {} carries canary weight {raw:?}, which is not a ladder stage; \
                     set a weight or roll back explicitly",
                    ctx.config.canary_ingress
                )));
            }
        };
        rec.ok("read-live-weight", format!("current weight {current}"));

        let Some(next) = current.next() else {
            rec.skipped("annotate-weight", "canary already receives 100%");
            return Ok(rec.finish_unchanged(
                Outcome::AlreadyAtState,
                CanaryPhase::Promoted,
                "canary already at 100%; finish the release by deploying the canary image to \
                 the idle color and switching to it",
            ));
        };

        info!(from = current.percent(), to = next.percent(), "Promoting canary");
        Ok(self.gated_apply(ctx, rec, &state, next).await)
    }

    /// Withdraw all canary traffic and scale the canary to zero
    ///
    /// Never stops early and never waits on health: every step runs even if
    /// an earlier one failed, and the record always ends with the canary
    /// disabled.
    pub async fn rollback(&self, ctx: &Context) -> OperationReport {
        let loaded = ctx.store.load().await;
        let state = match &loaded {
            Ok(state) => state.clone(),
            Err(_) => ReleaseState::default(),
        };
        let mut rec = Recorder::new(
            "canary-rollback",
            resting_phase(state.canary.weight()),
            &state,
        );
        rec.enter(CanaryPhase::RolledBack);
        if let Err(e) = &loaded {
            rec.failed("load-state", e.to_string());
        }

        let mut traffic_withdrawn = false;
        let attempts = ctx.config.rollback_attempts.max(1);
        for attempt in 1..=attempts {
            match ctx
                .orchestrator
                .annotate_ingress(
                    &ctx.config.canary_ingress,
                    &ctx.config.weight_annotation,
                    "0",
                )
                .await
            {
                Ok(()) => {
                    rec.ok("annotate-weight", format!("weight 0% (attempt {attempt})"));
                    traffic_withdrawn = true;
                    break;
                }
                Err(e) if attempt < attempts => {
                    warn!(attempt, error = %e, "Zeroing canary weight failed, retrying");
                    tokio::time::sleep(ctx.config.poll_interval).await;
                }
                Err(e) => {
                    rec.failed(
                        "annotate-weight",
                        format!("{e} (gave up after {attempts} attempts)"),
                    );
                }
            }
        }

        let canary = ctx.config.deployment_for(VersionTarget::Canary);
        match ctx.orchestrator.scale(&canary, 0).await {
            Ok(()) => rec.ok("scale-down-canary", format!("{canary} -> 0 replicas")),
            Err(e) => rec.failed("scale-down-canary", format!("{canary}: {e}")),
        }

        let after = if traffic_withdrawn {
            state.with_canary_weight(LadderWeight::ZERO, ctx.clock.now())
        } else {
            ReleaseState {
                canary: crate::state::CanaryState::disabled(),
                ..state.clone()
            }
        };

        if loaded.is_ok() {
            match ctx.store.save(&after).await {
                Ok(()) => rec.ok("persist-state", "canary disabled"),
                Err(e) => rec.failed("persist-state", e.to_string()),
            }
        } else {
            rec.skipped("persist-state", "release state unreadable; record left as is");
        }

        let failed = rec.failed_stage_names();
        if failed.is_empty() {
            rec.finish(
                Outcome::Completed,
                CanaryPhase::RolledBack,
                after,
                "canary rolled back: 0% traffic, 0 replicas",
            )
        } else {
            rec.finish(
                Outcome::PartialRollback,
                CanaryPhase::RolledBack,
                after,
                format!("rollback finished with failed steps: {}", failed.join(", ")),
            )
        }
    }

    /// Health-gate a traffic increase, then apply it
    async fn gated_apply(
        &self,
        ctx: &Context,
        mut rec: Recorder,
        state: &ReleaseState,
        weight: LadderWeight,
    ) -> OperationReport {
        let resting = resting_phase(state.canary.weight());

        if weight.percent() > 0 {
            rec.enter(CanaryPhase::Monitoring);
            match ctx
                .await_healthy(VersionTarget::Canary, ctx.config.promote_health_timeout)
                .await
            {
                Ok(verdict) if verdict.is_healthy() => rec.ok("health-check", verdict.to_string()),
                Ok(verdict) => {
                    rec.failed("health-check", verdict.to_string());
                    return rec.finish_unchanged(
                        Outcome::HealthCheckFailed,
                        resting,
                        format!("canary unhealthy; weight stays at {}", state.canary.weight()),
                    );
                }
                Err(e) => {
                    rec.failed("health-check", e.to_string());
                    return rec.finish_unchanged(
                        Outcome::OrchestratorUnavailable,
                        resting,
                        format!("could not verify canary; weight stays at {}", state.canary.weight()),
                    );
                }
            }
        }

        match apply_weight(ctx, &mut rec, state, weight, "annotate-weight").await {
            Applied::Persisted(after) => rec.finish(
                Outcome::Completed,
                resting_phase(weight),
                after,
                format!("canary weight {} -> {weight}", state.canary.weight()),
            ),
            Applied::Unpersisted(after) => rec.finish(
                Outcome::Degraded,
                resting_phase(weight),
                after,
                format!("canary weight set to {weight}; release state not saved"),
            ),
            Applied::NotApplied => rec.finish_unchanged(
                Outcome::OrchestratorUnavailable,
                resting,
                format!("weight patch failed; canary stays at {}", state.canary.weight()),
            ),
        }
    }
}

/// Patch the annotation, then persist the matching record
async fn apply_weight(
    ctx: &Context,
    rec: &mut Recorder,
    state: &ReleaseState,
    weight: LadderWeight,
    stage: &'static str,
) -> Applied {
    rec.enter(CanaryPhase::Promoting);
    let ingress = &ctx.config.canary_ingress;

    if let Err(e) = ctx
        .orchestrator
        .annotate_ingress(
            ingress,
            &ctx.config.weight_annotation,
            &weight.percent().to_string(),
        )
        .await
    {
        rec.failed(stage, format!("{ingress}: {e}"));
        return Applied::NotApplied;
    }
    rec.ok(stage, format!("{ingress} weight {weight}"));

    let after = state.with_canary_weight(weight, ctx.clock.now());
    match ctx.store.save(&after).await {
        Ok(()) => {
            rec.ok(
                "persist-state",
                format!(
                    "canaryWeight={} promotionStage={}",
                    weight.percent(),
                    weight.stage()
                ),
            );
            Applied::Persisted(after)
        }
        Err(e) => {
            rec.failed("persist-state", e.to_string());
            Applied::Unpersisted(after)
        }
    }
}

enum LiveRead {
    Unavailable(String),
    OffLadder(String),
}

/// Canary weight as the ingress currently carries it
async fn read_live_weight(ctx: &Context) -> Result<Option<LadderWeight>, LiveRead> {
    let raw = ctx
        .orchestrator
        .get_ingress_annotation(&ctx.config.canary_ingress, &ctx.config.weight_annotation)
        .await
        .map_err(|e| LiveRead::Unavailable(e.to_string()))?;

    match raw {
        None => Ok(None),
        Some(raw) => raw
            .parse::<LadderWeight>()
            .map(Some)
            .map_err(|_| LiveRead::OffLadder(raw)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "canary_test.rs"]
mod tests;
