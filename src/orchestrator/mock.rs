//! In-memory orchestrator for controller tests
//!
//! Records every call as a short string (`"scale web-blue 0"`) so tests can
//! assert on ordering, and lets tests fail individual operations.

#![allow(clippy::unwrap_used)]

use super::{DeploymentInfo, Orchestrator, OrchestratorError, PodReadiness};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct MockOrchestrator {
    deployments: Mutex<HashMap<String, DeploymentInfo>>,
    selectors: Mutex<HashMap<(String, String), String>>,
    annotations: Mutex<HashMap<(String, String), String>>,
    /// Pods keyed by the value of their version label
    pods: Mutex<HashMap<String, Vec<PodReadiness>>>,
    /// Operation names (`"scale web-blue"`, `"annotate"`, ...) that fail
    failing: Mutex<HashSet<String>>,
    /// Remaining failures per operation name, for transient errors
    flaky: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<String>>,
}

pub fn healthy_pods(prefix: &str, count: usize) -> Vec<PodReadiness> {
    (0..count)
        .map(|i| PodReadiness {
            name: format!("{prefix}-{i}"),
            phase: "Running".to_string(),
            ready: true,
        })
        .collect()
}

pub fn unready_pods(prefix: &str, count: usize) -> Vec<PodReadiness> {
    (0..count)
        .map(|i| PodReadiness {
            name: format!("{prefix}-{i}"),
            phase: "Running".to_string(),
            ready: false,
        })
        .collect()
}

impl MockOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deployment(self, name: &str, replicas: i32, image: &str) -> Self {
        self.deployments.lock().unwrap().insert(
            name.to_string(),
            DeploymentInfo {
                replicas,
                ready_replicas: replicas,
                image: Some(image.to_string()),
            },
        );
        self
    }

    pub fn set_pods(&self, version: &str, pods: Vec<PodReadiness>) {
        self.pods.lock().unwrap().insert(version.to_string(), pods);
    }

    pub fn set_selector(&self, service: &str, key: &str, value: &str) {
        self.selectors
            .lock()
            .unwrap()
            .insert((service.to_string(), key.to_string()), value.to_string());
    }

    pub fn set_annotation(&self, ingress: &str, key: &str, value: &str) {
        self.annotations
            .lock()
            .unwrap()
            .insert((ingress.to_string(), key.to_string()), value.to_string());
    }

    /// Fail every call to `op`; `op` is either the bare operation name
    /// (`"scale"`) or operation plus first argument (`"scale web-blue"`)
    pub fn fail(&self, op: &str) {
        self.failing.lock().unwrap().insert(op.to_string());
    }

    /// Fail the next `times` calls to `op`, then succeed
    pub fn fail_times(&self, op: &str, times: u32) {
        self.flaky.lock().unwrap().insert(op.to_string(), times);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that change cluster state
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| {
                ["set-image", "scale", "patch-selector", "annotate"]
                    .iter()
                    .any(|op| c.starts_with(op))
            })
            .collect()
    }

    pub fn deployment(&self, name: &str) -> Option<DeploymentInfo> {
        self.deployments.lock().unwrap().get(name).cloned()
    }

    pub fn selector(&self, service: &str, key: &str) -> Option<String> {
        self.selectors
            .lock()
            .unwrap()
            .get(&(service.to_string(), key.to_string()))
            .cloned()
    }

    pub fn annotation(&self, ingress: &str, key: &str) -> Option<String> {
        self.annotations
            .lock()
            .unwrap()
            .get(&(ingress.to_string(), key.to_string()))
            .cloned()
    }

    async fn record(&self, op: &str, subject: &str, rest: &str) -> Result<(), OrchestratorError> {
        // Yield so concurrent callers interleave the way real network calls do
        tokio::task::yield_now().await;
        let entry = if rest.is_empty() {
            format!("{op} {subject}")
        } else {
            format!("{op} {subject} {rest}")
        };
        self.calls.lock().unwrap().push(entry);

        let scoped = format!("{op} {subject}");
        let failing = self.failing.lock().unwrap();
        if failing.contains(op) || failing.contains(&scoped) {
            return Err(OrchestratorError::Unavailable(format!("injected failure: {scoped}")));
        }
        drop(failing);

        let mut flaky = self.flaky.lock().unwrap();
        for key in [op.to_string(), scoped.clone()] {
            if let Some(left) = flaky.get_mut(&key) {
                if *left > 0 {
                    *left -= 1;
                    return Err(OrchestratorError::Unavailable(format!(
                        "injected transient failure: {scoped}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Orchestrator for MockOrchestrator {
    async fn get_deployment(&self, name: &str) -> Result<DeploymentInfo, OrchestratorError> {
        self.record("get-deployment", name, "").await?;
        self.deployment(name).ok_or(OrchestratorError::NotFound {
            kind: "deployment",
            name: name.to_string(),
        })
    }

    async fn set_image(&self, deployment: &str, image: &str) -> Result<(), OrchestratorError> {
        self.record("set-image", deployment, image).await?;
        let mut deployments = self.deployments.lock().unwrap();
        let entry = deployments
            .entry(deployment.to_string())
            .or_insert(DeploymentInfo {
                replicas: 0,
                ready_replicas: 0,
                image: None,
            });
        entry.image = Some(image.to_string());
        Ok(())
    }

    async fn scale(&self, deployment: &str, replicas: i32) -> Result<(), OrchestratorError> {
        self.record("scale", deployment, &replicas.to_string()).await?;
        let mut deployments = self.deployments.lock().unwrap();
        let entry = deployments
            .entry(deployment.to_string())
            .or_insert(DeploymentInfo {
                replicas: 0,
                ready_replicas: 0,
                image: None,
            });
        entry.replicas = replicas;
        entry.ready_replicas = replicas;
        Ok(())
    }

    async fn wait_for_rollout(
        &self,
        deployment: &str,
        timeout: Duration,
    ) -> Result<(), OrchestratorError> {
        self.record("wait-for-rollout", deployment, "")
            .await
            .map_err(|_| OrchestratorError::Timeout {
                what: format!("rollout of deployment {deployment}"),
                seconds: timeout.as_secs(),
            })
    }

    async fn patch_service_selector(
        &self,
        service: &str,
        key: &str,
        value: &str,
    ) -> Result<(), OrchestratorError> {
        self.record("patch-selector", service, &format!("{key}={value}")).await?;
        self.set_selector(service, key, value);
        Ok(())
    }

    async fn annotate_ingress(
        &self,
        ingress: &str,
        key: &str,
        value: &str,
    ) -> Result<(), OrchestratorError> {
        self.record("annotate", ingress, value).await?;
        self.set_annotation(ingress, key, value);
        Ok(())
    }

    async fn get_pod_readiness(
        &self,
        label_selector: &str,
    ) -> Result<Vec<PodReadiness>, OrchestratorError> {
        self.record("get-pods", label_selector, "").await?;
        let version = label_selector
            .split(',')
            .filter_map(|kv| kv.split_once('='))
            .find(|(k, _)| *k == "version")
            .map(|(_, v)| v.to_string())
            .unwrap_or_default();
        Ok(self
            .pods
            .lock()
            .unwrap()
            .get(&version)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_service_selector(
        &self,
        service: &str,
        key: &str,
    ) -> Result<Option<String>, OrchestratorError> {
        self.record("get-selector", service, "").await?;
        Ok(self.selector(service, key))
    }

    async fn get_ingress_annotation(
        &self,
        ingress: &str,
        key: &str,
    ) -> Result<Option<String>, OrchestratorError> {
        self.record("get-annotation", ingress, "").await?;
        Ok(self.annotation(ingress, key))
    }
}
