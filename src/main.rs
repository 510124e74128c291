use clap::{Parser, ValueEnum};
use kube::Client;
use std::process::ExitCode;
use std::sync::Arc;
use switchyard::config::ControllerConfig;
use switchyard::controller::clock::SystemClock;
use switchyard::controller::{ActionRequest, Command, Context, ControllerError, Dispatcher, Response};
use switchyard::orchestrator::KubeOrchestrator;
use switchyard::shutdown::{listen_for_signals, run_until_shutdown, Interrupted};
use switchyard::state::{ConfigMapStateStore, MemoryStateStore, StateStore};
use tracing::{error, info, warn};

/// Exit code for a usable result: completed, already at state, degraded
const EXIT_OK: u8 = 0;

/// Exit code for an operation that ran and failed, or was cancelled
const EXIT_FAILED: u8 = 1;

/// Exit code for rejected input or configuration
const EXIT_INVALID: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Blue-green and canary releases for one Kubernetes service
#[derive(Debug, Parser)]
#[command(name = "switchyard", version)]
pub struct Cli {
    /// status, blue-green-deploy, blue-green-switch, canary-deploy,
    /// canary-set-weight, canary-promote, canary-rollback or health-check
    pub action: String,

    /// Blue-green color: blue or green
    #[arg(long)]
    pub target: Option<String>,

    /// Container image reference
    #[arg(long)]
    pub image: Option<String>,

    /// Canary weight: 0, 10, 25, 50 or 100
    #[arg(long, allow_hyphen_values = true)]
    pub weight: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Overrides SWITCHYARD_NAMESPACE
    #[arg(long)]
    pub namespace: Option<String>,

    /// Overrides SWITCHYARD_APP
    #[arg(long)]
    pub app: Option<String>,

    /// Keep the release record in memory instead of a ConfigMap
    #[arg(long)]
    pub memory_state: bool,
}

impl Cli {
    pub fn request(&self) -> ActionRequest {
        ActionRequest {
            action: self.action.clone(),
            target: self.target.clone(),
            image: self.image.clone(),
            weight: self.weight.clone(),
        }
    }
}

pub fn exit_code(response: &Response) -> u8 {
    if response.is_success() {
        EXIT_OK
    } else {
        EXIT_FAILED
    }
}

pub fn error_exit_code(error: &ControllerError) -> u8 {
    match error {
        ControllerError::InvalidInput(_) => EXIT_INVALID,
        ControllerError::State(_) | ControllerError::InconsistentLiveState(_) => EXIT_FAILED,
    }
}

/// Caveat for running `command` without a persisted record
pub fn memory_state_warning(command: &Command) -> Option<String> {
    command.is_mutating().then(|| {
        format!(
            "{} starts from the default record and its result is not kept; \
             only live cluster reads guard this run",
            command.name()
        )
    })
}

fn print_response(response: &Response, output: OutputFormat) -> anyhow::Result<()> {
    match output {
        OutputFormat::Text => println!("{response}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(response)?),
    }
    Ok(())
}

fn print_error(message: &str, output: OutputFormat) -> anyhow::Result<()> {
    match output {
        OutputFormat::Text => eprintln!("error: {message}"),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "kind": "error",
                "error": message,
            }))?
        ),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // stdout carries only the report
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Reject bad input before touching the cluster
    let command = match Command::parse(&cli.request()) {
        Ok(command) => command,
        Err(e) => {
            print_error(&e.to_string(), cli.output)?;
            return Ok(ExitCode::from(error_exit_code(&e)));
        }
    };

    let config = match ControllerConfig::from_env(cli.namespace.clone(), cli.app.clone()) {
        Ok(config) => config,
        Err(e) => {
            print_error(&e.to_string(), cli.output)?;
            return Ok(ExitCode::from(EXIT_INVALID));
        }
    };

    let client = match Client::try_default().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to create Kubernetes client");
            return Err(e.into());
        }
    };
    info!(
        namespace = %config.namespace,
        service = %config.service,
        action = command.name(),
        "Connected to Kubernetes cluster"
    );

    let orchestrator = Arc::new(KubeOrchestrator::new(
        client.clone(),
        &config.namespace,
        &config.container,
    ));
    let store: Arc<dyn StateStore> = if cli.memory_state {
        match memory_state_warning(&command) {
            Some(caveat) => warn!(action = command.name(), "{caveat}"),
            None => info!("Release state kept in memory for this run"),
        }
        Arc::new(MemoryStateStore::new())
    } else {
        Arc::new(ConfigMapStateStore::new(
            client,
            &config.namespace,
            &config.state_configmap,
        ))
    };
    let ctx = Context::new(orchestrator, store, Arc::new(SystemClock), config);
    let dispatcher = Dispatcher::new(ctx);

    let mut signal = listen_for_signals();
    let cancellable = command != Command::CanaryRollback;
    let result = match run_until_shutdown(dispatcher.handle(command), &mut signal, cancellable).await
    {
        Interrupted::Finished(result) => result,
        Interrupted::Cancelled(name) => {
            print_error(&format!("cancelled by {name}"), cli.output)?;
            return Ok(ExitCode::from(EXIT_FAILED));
        }
    };

    match result {
        Ok(response) => {
            print_response(&response, cli.output)?;
            Ok(ExitCode::from(exit_code(&response)))
        }
        Err(e) => {
            error!(error = %e, "Action failed");
            print_error(&e.to_string(), cli.output)?;
            Ok(ExitCode::from(error_exit_code(&e)))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[path = "main_test.rs"]
mod tests;
