//! Worker pod lifecycle.
//!
//! Each `NetworkPerformanceTest` is served by exactly one pod with the same name in
//! the configured worker namespace. The pod runs the netperf orchestrator, which
//! launches its own client/server pods and prints a CSV result block to stdout.
//! All state lives in the cluster; `WorkerManager` holds nothing between calls.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, LogParams, PostParams};
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::crds::NetworkPerformanceTestSpec;
use crate::tasks::config::WorkerConfig;
use crate::tasks::types::{is_already_exists, is_not_found, Error, Result};

/// Marks pods owned by this controller
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Name of the test a worker pod belongs to
pub const TEST_NAME_LABEL: &str = "networkmachinery.io/networkperformancetest";

/// Observed phase of a worker pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl WorkerPhase {
    /// A pod without a reported phase has not been scheduled yet
    #[must_use]
    pub fn from_pod(pod: &Pod) -> Self {
        match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
            None | Some("Pending") => Self::Pending,
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed") => Self::Failed,
            Some(_) => Self::Unknown,
        }
    }
}

/// Worker pod as seen by the reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worker {
    pub name: String,
    pub phase: WorkerPhase,
}

/// Pod operations the worker lifecycle depends on
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkerSubstrate: Send + Sync {
    async fn get_pod(&self, name: &str) -> Result<Pod>;

    async fn create_pod(&self, pod: &Pod) -> Result<Pod>;

    async fn delete_pod(&self, name: &str) -> Result<()>;

    /// Complete stdout of the pod so far
    async fn read_logs(&self, name: &str) -> Result<String>;
}

/// `WorkerSubstrate` over the pods API of one namespace
pub struct KubePodSubstrate {
    pods: Api<Pod>,
}

impl KubePodSubstrate {
    #[must_use]
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            pods: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl WorkerSubstrate for KubePodSubstrate {
    async fn get_pod(&self, name: &str) -> Result<Pod> {
        Ok(self.pods.get(name).await?)
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        Ok(self.pods.create(&PostParams::default(), pod).await?)
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        self.pods.delete(name, &DeleteParams::background()).await?;
        Ok(())
    }

    async fn read_logs(&self, name: &str) -> Result<String> {
        // `limitBytes` keeps the head of the stream and would cut off the result block
        Ok(self.pods.logs(name, &LogParams::default()).await?)
    }
}

/// Creates, inspects, and deletes worker pods
pub struct WorkerManager {
    substrate: Arc<dyn WorkerSubstrate>,
    config: WorkerConfig,
}

impl WorkerManager {
    #[must_use]
    pub fn new(substrate: Arc<dyn WorkerSubstrate>, config: WorkerConfig) -> Self {
        Self { substrate, config }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Orchestrator arguments for a test
    #[must_use]
    pub fn worker_args(&self, spec: &NetworkPerformanceTestSpec) -> Vec<String> {
        vec![
            format!("--image={}", self.config.tool_image),
            format!("--iterations={}", spec.iterations),
        ]
    }

    /// Create the worker unless it already exists.
    ///
    /// Returns `true` when this call created the pod. Losing a creation race is
    /// reported as `false`, not as an error.
    pub async fn ensure_worker(&self, name: &str, args: Vec<String>) -> Result<bool> {
        if self.get_worker(name).await?.is_some() {
            debug!(worker = %name, "Worker already exists");
            return Ok(false);
        }

        let pod = self.build_pod(name, args)?;
        match self.substrate.create_pod(&pod).await {
            Ok(created) => {
                info!(
                    worker = %created.name_any(),
                    namespace = %self.config.namespace,
                    "Created worker pod"
                );
                Ok(true)
            }
            Err(Error::KubeError(e)) if is_already_exists(&e) => {
                debug!(worker = %name, "Worker created concurrently");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_worker(&self, name: &str) -> Result<Option<Worker>> {
        match self.substrate.get_pod(name).await {
            Ok(pod) => Ok(Some(Worker {
                name: pod.name_any(),
                phase: WorkerPhase::from_pod(&pod),
            })),
            Err(Error::KubeError(e)) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete the worker; a worker that is already gone counts as deleted
    pub async fn delete_worker(&self, name: &str) -> Result<()> {
        match self.substrate.delete_pod(name).await {
            Ok(()) => {
                info!(worker = %name, "Deleted worker pod");
                Ok(())
            }
            Err(Error::KubeError(e)) if is_not_found(&e) => {
                debug!(worker = %name, "Worker already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn worker_logs(&self, name: &str) -> Result<String> {
        self.substrate.read_logs(name).await
    }

    /// Pod manifest for the worker of test `name`
    pub fn build_pod(&self, name: &str, args: Vec<String>) -> Result<Pod> {
        let labels = Self::worker_labels(name);

        let pod = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": name,
                "namespace": self.config.namespace,
                "labels": labels
            },
            "spec": {
                "restartPolicy": "OnFailure",
                "serviceAccountName": self.config.service_account_name,
                "containers": [{
                    "name": name,
                    "image": self.config.image,
                    "imagePullPolicy": self.config.image_pull_policy,
                    "args": args
                }]
            }
        });

        Ok(serde_json::from_value(pod)?)
    }

    fn worker_labels(name: &str) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(
            MANAGED_BY_LABEL.to_string(),
            crate::CONTROLLER_NAME.to_string(),
        );
        labels.insert(TEST_NAME_LABEL.to_string(), sanitize_label_value(name));
        labels
    }
}

/// Trim a value to the 63 character label limit, ending on an alphanumeric
fn sanitize_label_value(value: &str) -> String {
    let truncated: String = value.chars().take(63).collect();
    truncated
        .trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}
