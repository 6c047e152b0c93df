use crate::crds::NetworkPerformanceTest;
use crate::tasks::config::ControllerConfig;
use crate::tasks::events::EventPublisher;
use crate::tasks::finalizer::ObjectStore;
use crate::tasks::netperf::worker::{WorkerManager, WorkerSubstrate};
use crate::tasks::retry::ErrorBackoff;
use std::sync::Arc;

/// Finalizer guarding worker cleanup for `NetworkPerformanceTest`
pub const FINALIZER_NAME: &str = "networkmachinery.io/networkperformance";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing object key")]
    MissingObjectKey,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Gave up updating {name} after {attempts} conflicting writes")]
    ConflictRetriesExhausted { name: String, attempts: u32 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Reconciler context, built once in the composition root
pub struct Context {
    pub tests: Arc<dyn ObjectStore<NetworkPerformanceTest>>,
    pub workers: WorkerManager,
    pub events: Arc<dyn EventPublisher>,
    pub config: Arc<ControllerConfig>,
    pub backoff: ErrorBackoff,
}

impl Context {
    #[must_use]
    pub fn new(
        tests: Arc<dyn ObjectStore<NetworkPerformanceTest>>,
        substrate: Arc<dyn WorkerSubstrate>,
        events: Arc<dyn EventPublisher>,
        config: Arc<ControllerConfig>,
    ) -> Self {
        let workers = WorkerManager::new(substrate, config.worker.clone());
        Self {
            tests,
            workers,
            events,
            config,
            backoff: ErrorBackoff::default(),
        }
    }
}

/// HTTP status code carried by an API error response, if any
fn api_code(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    }
}

#[must_use]
pub fn is_not_found(err: &kube::Error) -> bool {
    api_code(err) == Some(404)
}

/// 409 covers both optimistic-concurrency conflicts and "already exists"
#[must_use]
pub fn is_conflict(err: &kube::Error) -> bool {
    api_code(err) == Some(409)
}

/// Create calls report an existing object as 409 `AlreadyExists`
#[must_use]
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists")
}
