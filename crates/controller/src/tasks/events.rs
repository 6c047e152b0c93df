//! Kubernetes Events for test lifecycle milestones.
//!
//! Publishing is fire-and-forget: a failed event is logged and never fails the
//! reconciliation that produced it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    #[must_use]
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Discards every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Values for the REASON column of `kubectl get events`
pub mod reasons {
    pub const WORKER_CREATED: &str = "WorkerCreated";
    pub const RESULTS_RECORDED: &str = "ResultsRecorded";
    pub const DELETING: &str = "Deleting";
    pub const DELETED: &str = "Deleted";
}

/// Values for the ACTION column of `kubectl get events`
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const CLEANUP: &str = "Cleanup";
}
