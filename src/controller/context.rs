use crate::config::ControllerConfig;
use crate::controller::clock::Clock;
use crate::controller::health::{HealthGate, HealthVerdict};
use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::state::{StateStore, VersionTarget};
use std::sync::Arc;
use std::time::Duration;

/// Everything a controller operation needs
pub struct Context {
    pub orchestrator: Arc<dyn Orchestrator>,
    pub store: Arc<dyn StateStore>,
    pub clock: Arc<dyn Clock>,
    pub config: ControllerConfig,
}

impl Context {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        config: ControllerConfig,
    ) -> Self {
        Context {
            orchestrator,
            store,
            clock,
            config,
        }
    }

    pub fn health_gate(&self) -> HealthGate<'_> {
        HealthGate::new(self.orchestrator.as_ref(), self.config.poll_interval)
    }

    /// Wait for every pod of `target` to be Running and Ready
    pub async fn await_healthy(
        &self,
        target: VersionTarget,
        timeout: Duration,
    ) -> Result<HealthVerdict, OrchestratorError> {
        self.health_gate()
            .await_healthy(&self.config.selector_for(target), timeout)
            .await
    }

    /// Context over a mock cluster and an in-memory store
    ///
    /// Returns the concrete handles so tests can seed and inspect them.
    #[cfg(test)]
    pub fn new_mock(
        orchestrator: crate::orchestrator::mock::MockOrchestrator,
        state: crate::state::ReleaseState,
    ) -> (
        Self,
        Arc<crate::orchestrator::mock::MockOrchestrator>,
        Arc<crate::state::MemoryStateStore>,
    ) {
        let orchestrator = Arc::new(orchestrator);
        let store = Arc::new(crate::state::MemoryStateStore::with_state(state));
        let ctx = Context::new(
            orchestrator.clone(),
            store.clone(),
            Arc::new(crate::controller::clock::FixedClock::new_year()),
            ControllerConfig::for_app("default", "web"),
        );
        (ctx, orchestrator, store)
    }
}
