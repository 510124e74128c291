use super::{DeploymentInfo, Orchestrator, OrchestratorError, PodReadiness};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::wait::{await_condition, Condition};
use std::time::Duration;
use tracing::{debug, error, info};

/// Orchestrator backed by the Kubernetes API of one namespace
pub struct KubeOrchestrator {
    deployments: Api<Deployment>,
    services: Api<Service>,
    ingresses: Api<Ingress>,
    pods: Api<Pod>,
    /// Container whose image `set_image` replaces
    container: String,
}

impl KubeOrchestrator {
    pub fn new(client: kube::Client, namespace: &str, container: &str) -> Self {
        KubeOrchestrator {
            deployments: Api::namespaced(client.clone(), namespace),
            services: Api::namespaced(client.clone(), namespace),
            ingresses: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client, namespace),
            container: container.to_string(),
        }
    }
}

/// Map a 404 to a typed NotFound, keep everything else as an API error
fn not_found_or(kind: &'static str, name: &str, err: kube::Error) -> OrchestratorError {
    match err {
        kube::Error::Api(ref resp) if resp.code == 404 => OrchestratorError::NotFound {
            kind,
            name: name.to_string(),
        },
        other => OrchestratorError::KubeError(other),
    }
}

/// Summarize a Deployment for callers
///
/// The image is taken from the named container, falling back to the first.
pub fn deployment_info(deployment: &Deployment, container: &str) -> DeploymentInfo {
    let replicas = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(0);
    let ready_replicas = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    let containers = deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(|p| p.containers.as_slice())
        .unwrap_or_default();
    let image = containers
        .iter()
        .find(|c| c.name == container)
        .or_else(|| containers.first())
        .and_then(|c| c.image.clone());

    DeploymentInfo {
        replicas,
        ready_replicas,
        image,
    }
}

/// Readiness of a pod: phase plus the `Ready` condition
pub fn pod_readiness(pod: &Pod) -> PodReadiness {
    let status = pod.status.as_ref();
    let phase = status
        .and_then(|s| s.phase.clone())
        .unwrap_or_else(|| "Unknown".to_string());
    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false);

    PodReadiness {
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase,
        ready,
    }
}

/// True once the controller has observed the latest generation and every
/// desired replica is updated and available
pub fn is_rolled_out(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };
    let generation = deployment.metadata.generation.unwrap_or(0);
    let observed = status.observed_generation.unwrap_or(0);

    observed >= generation
        && status.updated_replicas.unwrap_or(0) >= desired
        && status.available_replicas.unwrap_or(0) >= desired
        && status.replicas.unwrap_or(0) == desired
}

fn rollout_complete() -> impl Condition<Deployment> {
    |obj: Option<&Deployment>| obj.map(is_rolled_out).unwrap_or(false)
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn get_deployment(&self, name: &str) -> Result<DeploymentInfo, OrchestratorError> {
        let deployment = self
            .deployments
            .get(name)
            .await
            .map_err(|e| not_found_or("deployment", name, e))?;
        Ok(deployment_info(&deployment, &self.container))
    }

    async fn set_image(&self, deployment: &str, image: &str) -> Result<(), OrchestratorError> {
        // Strategic merge keys containers by name
        let patch = serde_json::json!({
            "spec": { "template": { "spec": {
                "containers": [{ "name": self.container, "image": image }]
            }}}
        });
        self.deployments
            .patch(deployment, &PatchParams::default(), &Patch::Strategic(&patch))
            .await
            .map_err(|e| not_found_or("deployment", deployment, e))?;
        info!(deployment, image, "Deployment image updated");
        Ok(())
    }

    async fn scale(&self, deployment: &str, replicas: i32) -> Result<(), OrchestratorError> {
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        self.deployments
            .patch(deployment, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| not_found_or("deployment", deployment, e))?;
        info!(deployment, replicas, "Deployment scaled");
        Ok(())
    }

    async fn wait_for_rollout(
        &self,
        deployment: &str,
        timeout: Duration,
    ) -> Result<(), OrchestratorError> {
        debug!(deployment, timeout_secs = timeout.as_secs(), "Waiting for rollout");
        let wait = await_condition(self.deployments.clone(), deployment, rollout_complete());
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(OrchestratorError::Unavailable(format!(
                "watch on deployment {deployment} failed: {e}"
            ))),
            Err(_) => Err(OrchestratorError::Timeout {
                what: format!("rollout of deployment {deployment}"),
                seconds: timeout.as_secs(),
            }),
        }
    }

    async fn patch_service_selector(
        &self,
        service: &str,
        key: &str,
        value: &str,
    ) -> Result<(), OrchestratorError> {
        let patch = serde_json::json!({ "spec": { "selector": { key: value } } });
        match self
            .services
            .patch(service, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => {
                info!(service, key, value, "Service selector patched");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, service, "Failed to patch service selector");
                Err(not_found_or("service", service, e))
            }
        }
    }

    async fn annotate_ingress(
        &self,
        ingress: &str,
        key: &str,
        value: &str,
    ) -> Result<(), OrchestratorError> {
        let patch = serde_json::json!({ "metadata": { "annotations": { key: value } } });
        match self
            .ingresses
            .patch(ingress, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => {
                info!(ingress, key, value, "Ingress annotated");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, ingress, "Failed to annotate ingress");
                Err(not_found_or("ingress", ingress, e))
            }
        }
    }

    async fn get_pod_readiness(
        &self,
        label_selector: &str,
    ) -> Result<Vec<PodReadiness>, OrchestratorError> {
        let pods = self
            .pods
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(pods.items.iter().map(pod_readiness).collect())
    }

    async fn get_service_selector(
        &self,
        service: &str,
        key: &str,
    ) -> Result<Option<String>, OrchestratorError> {
        let svc = self
            .services
            .get(service)
            .await
            .map_err(|e| not_found_or("service", service, e))?;
        Ok(svc
            .spec
            .and_then(|s| s.selector)
            .and_then(|mut sel| sel.remove(key)))
    }

    async fn get_ingress_annotation(
        &self,
        ingress: &str,
        key: &str,
    ) -> Result<Option<String>, OrchestratorError> {
        let ing = self
            .ingresses
            .get(ingress)
            .await
            .map_err(|e| not_found_or("ingress", ingress, e))?;
        Ok(ing.metadata.annotations.and_then(|mut a| a.remove(key)))
    }
}
