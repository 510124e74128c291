//! Blue-green release strategy
//!
//! Two full-size colors behind one service. `deploy` stages a new image on
//! a color without touching traffic; `switch` moves all traffic at once by
//! patching the service selector, and only then scales the old color down.
//!
//! Failure before the selector patch leaves the previous color live and
//! scaled up. Failure after it leaves an extra idle replica set, which is
//! reported but never undoes the cut-over.

use super::{stage_version, ControllerError};
use crate::controller::context::Context;
use crate::controller::report::{BlueGreenPhase, OperationReport, Outcome, Recorder};
use crate::state::{Color, VersionTarget};
use tracing::{info, warn};

pub struct BlueGreenController;

impl BlueGreenController {
    /// Stage `image` on `target` and prove it healthy; traffic is unchanged
    pub async fn deploy(
        &self,
        ctx: &Context,
        target: Color,
        image: &str,
    ) -> Result<OperationReport, ControllerError> {
        let state = ctx.store.load().await?;
        let active = state.active_color();
        let mut rec = Recorder::new("blue-green-deploy", BlueGreenPhase::Idle, &state);

        if target == active {
            warn!(
                service = %ctx.config.service,
                target = %target,
                "Deploying to the live color: clients see the new image as it rolls out"
            );
        }

        info!(target = %target, image, "Staging blue-green version");
        rec.enter(BlueGreenPhase::Deploying);

        match stage_version(
            ctx,
            &mut rec,
            VersionTarget::from(target),
            image,
            ctx.config.standard_replicas,
            ctx.config.deploy_health_timeout,
            BlueGreenPhase::HealthChecking,
        )
        .await
        {
            Ok(_) => Ok(rec.finish_unchanged(
                Outcome::Completed,
                BlueGreenPhase::Complete,
                format!("{target} staged with {image}; traffic unchanged ({active} active)"),
            )),
            Err(failure) => Ok(rec.finish_unchanged(
                failure.outcome(),
                BlueGreenPhase::Failed,
                format!("rollout of {target} failed; {active} keeps serving all traffic"),
            )),
        }
    }

    /// Cut all traffic over to `target`
    pub async fn switch(
        &self,
        ctx: &Context,
        target: Color,
    ) -> Result<OperationReport, ControllerError> {
        let state = ctx.store.load().await?;
        let recorded = state.active_color();
        // Color traffic moves away from; the live selector wins over the record
        let mut previous = recorded;
        let mut rec = Recorder::new("blue-green-switch", BlueGreenPhase::Idle, &state);

        if target == recorded {
            // The record alone is not proof: a switch whose save failed leaves
            // it naming the old color while the selector points elsewhere
            let service = &ctx.config.service;
            match ctx
                .orchestrator
                .get_service_selector(service, &ctx.config.version_label)
                .await
            {
                Ok(Some(live)) if live == target.as_str() => {
                    warn!(target = %target, "Switch requested to the already active color");
                    rec.skipped("switch", format!("{target} is already active"));
                    return Ok(rec.finish_unchanged(
                        Outcome::AlreadyAtState,
                        BlueGreenPhase::Complete,
                        format!("{target} already receives all traffic"),
                    ));
                }
                Ok(live) => {
                    warn!(
                        target = %target,
                        live = live.as_deref().unwrap_or("<none>"),
                        "Record says target is active but the selector disagrees, switching"
                    );
                    rec.ok(
                        "read-live-selector",
                        format!("{service} selects {}", live.as_deref().unwrap_or("nothing")),
                    );
                    if let Some(color) = live.and_then(|l| l.parse::<Color>().ok()) {
                        previous = color;
                    }
                }
                Err(e) => {
                    rec.failed("read-live-selector", format!("{service}: {e}"));
                    return Ok(rec.finish_unchanged(
                        Outcome::OrchestratorUnavailable,
                        BlueGreenPhase::Failed,
                        format!("could not confirm {target} is live; nothing changed"),
                    ));
                }
            }
        }

        // 1. Target must be healthy before it sees any traffic
        rec.enter(BlueGreenPhase::HealthChecking);
        match ctx
            .await_healthy(target.into(), ctx.config.switch_health_timeout)
            .await
        {
            Ok(verdict) if verdict.is_healthy() => rec.ok("health-check", verdict.to_string()),
            Ok(verdict) => {
                rec.failed("health-check", format!("{target}: {verdict}"));
                return Ok(rec.finish_unchanged(
                    Outcome::HealthCheckFailed,
                    BlueGreenPhase::Failed,
                    format!("{target} is not healthy; traffic stays on {previous}"),
                ));
            }
            Err(e) => {
                rec.failed("health-check", e.to_string());
                return Ok(rec.finish_unchanged(
                    Outcome::OrchestratorUnavailable,
                    BlueGreenPhase::Failed,
                    format!("could not verify {target}; traffic stays on {previous}"),
                ));
            }
        }

        // 2. The cut-over: the only step that changes what clients see
        rec.enter(BlueGreenPhase::Switching);
        let service = &ctx.config.service;
        if let Err(e) = ctx
            .orchestrator
            .patch_service_selector(service, &ctx.config.version_label, target.as_str())
            .await
        {
            rec.failed("patch-selector", format!("{service}: {e}"));
            return Ok(rec.finish_unchanged(
                Outcome::OrchestratorUnavailable,
                BlueGreenPhase::Failed,
                format!("selector patch failed; traffic stays on {previous}, still scaled up"),
            ));
        }
        rec.ok(
            "patch-selector",
            format!("{service} {}={target}", ctx.config.version_label),
        );
        let after = state.with_active_color(target, ctx.clock.now());

        // 3. Scale the old color down only after traffic left it
        rec.enter(BlueGreenPhase::ScalingDown);
        let scaled_down = if previous == target {
            rec.skipped("scale-down-previous", "selector named no other color");
            true
        } else {
            let old = ctx.config.deployment_for(previous.into());
            match ctx.orchestrator.scale(&old, 0).await {
                Ok(()) => {
                    rec.ok("scale-down-previous", format!("{old} -> 0 replicas"));
                    true
                }
                Err(e) => {
                    rec.failed(
                        "scale-down-previous",
                        format!("{old}: {e}; idle replicas left running"),
                    );
                    false
                }
            }
        };

        // 4. Record the new live color
        let saved = match ctx.store.save(&after).await {
            Ok(()) => {
                rec.ok("persist-state", format!("activeColor={target}"));
                true
            }
            Err(e) => {
                rec.failed("persist-state", e.to_string());
                false
            }
        };

        let (outcome, message) = match (saved, scaled_down) {
            (false, _) => (
                Outcome::StateNotSaved,
                format!(
                    "traffic switched {previous} -> {target} but the release record still \
                     says {recorded}; rerun the switch to {target}"
                ),
            ),
            (true, false) => (
                Outcome::Degraded,
                format!("traffic switched {previous} -> {target}; {previous} still scaled up"),
            ),
            (true, true) => (
                Outcome::Completed,
                format!("traffic switched {previous} -> {target}"),
            ),
        };
        Ok(rec.finish(outcome, BlueGreenPhase::Complete, after, message))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "blue_green_test.rs"]
mod tests;
