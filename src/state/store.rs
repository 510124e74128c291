use super::{ReleaseState, StateError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, Patch, PatchParams};
use std::sync::Mutex;
use tracing::{debug, info};

/// Field manager used for server-side apply of the state ConfigMap
const FIELD_MANAGER: &str = "switchyard";

/// Key inside the ConfigMap holding the JSON record
pub const STATE_KEY: &str = "state.json";

/// Persistence for the release record
///
/// `load` never fails for a missing record: a service with no record yet
/// starts from `ReleaseState::default()`.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<ReleaseState, StateError>;
    async fn save(&self, state: &ReleaseState) -> Result<(), StateError>;
}

/// In-process store, used by tests and `--memory-state` runs
#[derive(Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<ReleaseState>>,
    fail_saves: Mutex<bool>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: ReleaseState) -> Self {
        MemoryStateStore {
            state: Mutex::new(Some(state)),
            fail_saves: Mutex::new(false),
        }
    }

    /// Last saved record (None if nothing was ever saved)
    pub fn snapshot(&self) -> Option<ReleaseState> {
        self.state.lock().map(|s| s.clone()).unwrap_or(None)
    }

    /// Make subsequent saves fail
    pub fn fail_saves(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_saves.lock() {
            *flag = fail;
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<ReleaseState, StateError> {
        let state = self
            .state
            .lock()
            .map_err(|_| StateError::Unavailable("memory store lock poisoned".to_string()))?;
        Ok(state.clone().unwrap_or_default())
    }

    async fn save(&self, state: &ReleaseState) -> Result<(), StateError> {
        let failing = self.fail_saves.lock().map(|f| *f).unwrap_or(false);
        if failing {
            return Err(StateError::Unavailable("memory store save rejected".to_string()));
        }
        let mut slot = self
            .state
            .lock()
            .map_err(|_| StateError::Unavailable("memory store lock poisoned".to_string()))?;
        *slot = Some(state.clone());
        Ok(())
    }
}

/// Store backed by a ConfigMap next to the managed service
///
/// The record is readable by anything with ConfigMap read access
/// (dashboards, `kubectl get cm <app>-release-state -o yaml`).
pub struct ConfigMapStateStore {
    api: Api<ConfigMap>,
    name: String,
}

impl ConfigMapStateStore {
    pub fn new(client: kube::Client, namespace: &str, name: &str) -> Self {
        ConfigMapStateStore {
            api: Api::namespaced(client, namespace),
            name: name.to_string(),
        }
    }
}

/// Extract the release record from a ConfigMap's data
pub fn decode_configmap(cm: &ConfigMap) -> Result<ReleaseState, StateError> {
    match cm.data.as_ref().and_then(|d| d.get(STATE_KEY)) {
        Some(raw) => ReleaseState::from_json(raw),
        None => Ok(ReleaseState::default()),
    }
}

#[async_trait]
impl StateStore for ConfigMapStateStore {
    async fn load(&self) -> Result<ReleaseState, StateError> {
        let cm = self
            .api
            .get_opt(&self.name)
            .await
            .map_err(|e| StateError::Unavailable(e.to_string()))?;

        match cm {
            Some(cm) => decode_configmap(&cm),
            None => {
                debug!(configmap = %self.name, "No release state yet, using defaults");
                Ok(ReleaseState::default())
            }
        }
    }

    async fn save(&self, state: &ReleaseState) -> Result<(), StateError> {
        let record = state.to_json()?;
        let patch = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": self.name,
                "labels": { "app.kubernetes.io/managed-by": FIELD_MANAGER },
            },
            "data": { STATE_KEY: record },
        });

        self.api
            .patch(
                &self.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&patch),
            )
            .await
            .map_err(|e| StateError::Unavailable(e.to_string()))?;

        info!(
            configmap = %self.name,
            active_color = %state.active_color(),
            canary_weight = state.canary.weight().percent(),
            "Release state persisted"
        );
        Ok(())
    }
}
