//! Orchestration client seam
//!
//! The controllers only ever talk to the cluster through `Orchestrator`.
//! `KubeOrchestrator` is the production implementation; tests drive the
//! controllers against `MockOrchestrator`.

pub mod cluster;
#[cfg(test)]
pub mod mock;

pub use cluster::KubeOrchestrator;

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("timed out after {seconds}s waiting for {what}")]
    Timeout { what: String, seconds: u64 },

    #[error("{0}")]
    Unavailable(String),
}

/// Observed shape of one deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentInfo {
    pub replicas: i32,
    pub ready_replicas: i32,
    pub image: Option<String>,
}

/// Readiness of one pod as reported by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodReadiness {
    pub name: String,
    pub phase: String,
    pub ready: bool,
}

impl PodReadiness {
    /// Running and passing its readiness condition
    pub fn is_healthy(&self) -> bool {
        self.phase == "Running" && self.ready
    }
}

/// Primitives the release controllers need from the control plane
///
/// Every call is awaited to completion; nothing here is fire-and-forget.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn get_deployment(&self, name: &str) -> Result<DeploymentInfo, OrchestratorError>;

    async fn set_image(&self, deployment: &str, image: &str) -> Result<(), OrchestratorError>;

    async fn scale(&self, deployment: &str, replicas: i32) -> Result<(), OrchestratorError>;

    /// Wait until the deployment's latest generation is fully rolled out
    async fn wait_for_rollout(
        &self,
        deployment: &str,
        timeout: Duration,
    ) -> Result<(), OrchestratorError>;

    async fn patch_service_selector(
        &self,
        service: &str,
        key: &str,
        value: &str,
    ) -> Result<(), OrchestratorError>;

    async fn annotate_ingress(
        &self,
        ingress: &str,
        key: &str,
        value: &str,
    ) -> Result<(), OrchestratorError>;

    async fn get_pod_readiness(
        &self,
        label_selector: &str,
    ) -> Result<Vec<PodReadiness>, OrchestratorError>;

    async fn get_service_selector(
        &self,
        service: &str,
        key: &str,
    ) -> Result<Option<String>, OrchestratorError>;

    async fn get_ingress_annotation(
        &self,
        ingress: &str,
        key: &str,
    ) -> Result<Option<String>, OrchestratorError>;
}
