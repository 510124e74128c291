//! Action routing
//!
//! Turns a raw action request into a typed `Command`, rejecting anything
//! outside its domain before a single orchestrator call, then runs it
//! against the matching controller. Mutating commands run under the
//! service's lock.

use crate::controller::context::Context;
use crate::controller::inspect::{self, HealthReport, StatusReport};
use crate::controller::locks::ServiceLocks;
use crate::controller::report::OperationReport;
use crate::controller::strategies::{BlueGreenController, CanaryController, ControllerError};
use crate::state::{Color, LadderWeight};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// An action as it arrives from the CLI, unvalidated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionRequest {
    pub action: String,
    pub target: Option<String>,
    pub image: Option<String>,
    pub weight: Option<String>,
}

impl ActionRequest {
    pub fn new(action: &str) -> Self {
        ActionRequest {
            action: action.to_string(),
            ..Default::default()
        }
    }

    pub fn target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn image(mut self, image: &str) -> Self {
        self.image = Some(image.to_string());
        self
    }

    pub fn weight(mut self, weight: &str) -> Self {
        self.weight = Some(weight.to_string());
        self
    }
}

/// A validated action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    BlueGreenDeploy { target: Color, image: String },
    BlueGreenSwitch { target: Color },
    CanaryDeploy { image: String },
    CanarySetWeight { weight: LadderWeight },
    CanaryPromote,
    CanaryRollback,
    HealthCheck,
}

/// Action names accepted by `Command::parse`
pub const ACTIONS: [&str; 8] = [
    "status",
    "blue-green-deploy",
    "blue-green-switch",
    "canary-deploy",
    "canary-set-weight",
    "canary-promote",
    "canary-rollback",
    "health-check",
];

impl Command {
    pub fn parse(req: &ActionRequest) -> Result<Command, ControllerError> {
        let action = req.action.trim();
        let command = match action {
            "status" => {
                only_params(req, &[])?;
                Command::Status
            }
            "blue-green-deploy" => {
                only_params(req, &["target", "image"])?;
                Command::BlueGreenDeploy {
                    target: parse_color(req)?,
                    image: parse_image(req)?,
                }
            }
            "blue-green-switch" => {
                only_params(req, &["target"])?;
                Command::BlueGreenSwitch {
                    target: parse_color(req)?,
                }
            }
            "canary-deploy" => {
                only_params(req, &["image"])?;
                Command::CanaryDeploy {
                    image: parse_image(req)?,
                }
            }
            "canary-set-weight" => {
                only_params(req, &["weight"])?;
                let raw = required(action, "weight", &req.weight)?;
                Command::CanarySetWeight {
                    weight: raw.parse().map_err(ControllerError::InvalidInput)?,
                }
            }
            "canary-promote" => {
                only_params(req, &[])?;
                Command::CanaryPromote
            }
            "canary-rollback" => {
                only_params(req, &[])?;
                Command::CanaryRollback
            }
            "health-check" => {
                only_params(req, &[])?;
                Command::HealthCheck
            }
            other => {
                return Err(ControllerError::InvalidInput(format!(
                    "unknown action {other:?}; expected one of: {}",
                    ACTIONS.join(", ")
                )))
            }
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Status => "status",
            Command::BlueGreenDeploy { .. } => "blue-green-deploy",
            Command::BlueGreenSwitch { .. } => "blue-green-switch",
            Command::CanaryDeploy { .. } => "canary-deploy",
            Command::CanarySetWeight { .. } => "canary-set-weight",
            Command::CanaryPromote => "canary-promote",
            Command::CanaryRollback => "canary-rollback",
            Command::HealthCheck => "health-check",
        }
    }

    /// Whether the command may change cluster state or the release record
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Command::Status | Command::HealthCheck)
    }
}

fn only_params(req: &ActionRequest, allowed: &[&str]) -> Result<(), ControllerError> {
    let given = [
        ("target", req.target.is_some()),
        ("image", req.image.is_some()),
        ("weight", req.weight.is_some()),
    ];
    match given
        .iter()
        .find(|(name, present)| *present && !allowed.contains(name))
    {
        Some((name, _)) => Err(ControllerError::InvalidInput(format!(
            "{} does not take --{name}",
            req.action.trim()
        ))),
        None => Ok(()),
    }
}

fn required<'a>(
    action: &str,
    param: &str,
    value: &'a Option<String>,
) -> Result<&'a str, ControllerError> {
    value
        .as_deref()
        .ok_or_else(|| ControllerError::InvalidInput(format!("{action} requires --{param}")))
}

fn parse_color(req: &ActionRequest) -> Result<Color, ControllerError> {
    required(req.action.trim(), "target", &req.target)?
        .parse()
        .map_err(ControllerError::InvalidInput)
}

fn parse_image(req: &ActionRequest) -> Result<String, ControllerError> {
    let image = required(req.action.trim(), "image", &req.image)?;
    if image.is_empty() || image.chars().any(char::is_whitespace) {
        return Err(ControllerError::InvalidInput(format!(
            "image must be a non-empty reference without whitespace, got {image:?}"
        )));
    }
    Ok(image.to_string())
}

/// Result of a dispatched command
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    Operation(OperationReport),
    Status(StatusReport),
    Health(HealthReport),
}

impl Response {
    /// Whether a pipeline may proceed
    pub fn is_success(&self) -> bool {
        match self {
            Response::Operation(report) => report.outcome.is_success(),
            Response::Status(_) => true,
            Response::Health(report) => report.active_color_healthy,
        }
    }

    pub fn operation(&self) -> Option<&OperationReport> {
        match self {
            Response::Operation(report) => Some(report),
            _ => None,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Operation(report) => write!(f, "{report}"),
            Response::Status(report) => write!(f, "{report}"),
            Response::Health(report) => write!(f, "{report}"),
        }
    }
}

/// Entry point: routes commands to the controllers
pub struct Dispatcher {
    ctx: Context,
    locks: ServiceLocks,
}

impl Dispatcher {
    pub fn new(ctx: Context) -> Self {
        Dispatcher {
            ctx,
            locks: ServiceLocks::new(),
        }
    }

    /// Validate `req`, then run it
    pub async fn dispatch(&self, req: &ActionRequest) -> Result<Response, ControllerError> {
        let command = match Command::parse(req) {
            Ok(command) => command,
            Err(e) => {
                warn!(action = %req.action, error = %e, "Rejected action");
                return Err(e);
            }
        };
        self.handle(command).await
    }

    pub async fn handle(&self, command: Command) -> Result<Response, ControllerError> {
        let ctx = &self.ctx;
        let _guard = if command.is_mutating() {
            let key = format!("{}/{}", ctx.config.namespace, ctx.config.service);
            Some(self.locks.acquire(&key).await)
        } else {
            None
        };
        info!(
            action = command.name(),
            service = %ctx.config.service,
            namespace = %ctx.config.namespace,
            "Running action"
        );

        let response = match command {
            Command::Status => Response::Status(inspect::status(ctx).await?),
            Command::HealthCheck => Response::Health(inspect::health_check(ctx).await?),
            Command::BlueGreenDeploy { target, image } => {
                Response::Operation(BlueGreenController.deploy(ctx, target, &image).await?)
            }
            Command::BlueGreenSwitch { target } => {
                Response::Operation(BlueGreenController.switch(ctx, target).await?)
            }
            Command::CanaryDeploy { image } => {
                Response::Operation(CanaryController.deploy(ctx, &image).await?)
            }
            Command::CanarySetWeight { weight } => {
                Response::Operation(CanaryController.set_weight(ctx, weight).await?)
            }
            Command::CanaryPromote => Response::Operation(CanaryController.promote(ctx).await?),
            Command::CanaryRollback => Response::Operation(CanaryController.rollback(ctx).await),
        };
        Ok(response)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "dispatch_test.rs"]
mod tests;
