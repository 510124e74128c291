//! Signal handling for one CLI invocation
//!
//! SIGTERM or SIGINT cancels an in-flight action at its next await point.
//! Actions marked uncancellable (canary rollback) run to completion; the
//! signal is only logged.

use std::future::Future;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Receiving side: resolves once a signal was delivered
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<Option<&'static str>>,
}

impl ShutdownSignal {
    /// Wait for a signal and return its name
    ///
    /// Never resolves if the trigger is dropped without firing.
    pub async fn wait(&mut self) -> &'static str {
        loop {
            if let Some(name) = *self.receiver.borrow() {
                return name;
            }
            if self.receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Name of the signal received so far, if any
    pub fn received(&self) -> Option<&'static str> {
        *self.receiver.borrow()
    }
}

pub struct ShutdownTrigger {
    sender: watch::Sender<Option<&'static str>>,
}

impl ShutdownTrigger {
    pub fn trigger(&self, signal: &'static str) {
        let _ = self.sender.send(Some(signal));
    }
}

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (sender, receiver) = watch::channel(None);
    (ShutdownTrigger { sender }, ShutdownSignal { receiver })
}

/// Spawn a task forwarding the first SIGTERM/SIGINT into a `ShutdownSignal`
pub fn listen_for_signals() -> ShutdownSignal {
    let (trigger, signal) = shutdown_channel();
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => trigger.trigger(name),
            // Keep the trigger alive so waiters stay pending
            Err(e) => {
                error!(error = %e, "Failed to register signal handlers");
                std::future::pending::<()>().await;
            }
        }
    });
    signal
}

/// Wait for SIGTERM or SIGINT and return the signal name
#[cfg(unix)]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    info!(signal = name, "Received signal");
    Ok(name)
}

/// Wait for Ctrl+C (non-unix)
#[cfg(not(unix))]
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    Ok("CTRL_C")
}

#[derive(Debug, PartialEq, Eq)]
pub enum Interrupted<T> {
    Finished(T),
    Cancelled(&'static str),
}

/// Drive `action` until it finishes or, if `cancellable`, a signal arrives
pub async fn run_until_shutdown<F: Future>(
    action: F,
    signal: &mut ShutdownSignal,
    cancellable: bool,
) -> Interrupted<F::Output> {
    tokio::pin!(action);
    let mut noted = false;
    loop {
        tokio::select! {
            out = &mut action => return Interrupted::Finished(out),
            name = signal.wait(), if !noted => {
                if cancellable {
                    warn!(signal = name, "Cancelling in-flight action");
                    return Interrupted::Cancelled(name);
                }
                warn!(signal = name, "Signal received, action runs to completion");
                noted = true;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[path = "shutdown_test.rs"]
mod tests;
