//! Derived reconciliation states of a `NetworkPerformanceTest`.
//!
//! Nothing here is persisted: the state is recomputed from the resource and its
//! worker pod on every reconcile.

use crate::crds::NetworkPerformanceTest;
use crate::tasks::finalizer::has_finalizer;
use crate::tasks::netperf::worker::{WorkerManager, WorkerPhase};
use crate::tasks::types::{Result, FINALIZER_NAME};
use kube::ResourceExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestState {
    /// Deletion requested
    Deleting,
    /// Results recorded, nothing left to do
    Terminal,
    /// Finalizer not added yet
    Uninitialized,
    /// Worker absent, or present but not producing output
    AwaitingWorker { worker: Option<WorkerPhase> },
    /// Worker running or finished, results not recorded yet
    Monitoring { worker: WorkerPhase },
}

impl TestState {
    /// States decided by the resource alone, in priority order
    #[must_use]
    pub fn from_resource(test: &NetworkPerformanceTest) -> Option<Self> {
        if test.is_being_deleted() {
            Some(Self::Deleting)
        } else if test.is_succeeded() {
            Some(Self::Terminal)
        } else if !has_finalizer(test, FINALIZER_NAME) {
            Some(Self::Uninitialized)
        } else {
            None
        }
    }

    #[must_use]
    pub fn from_worker(worker: Option<WorkerPhase>) -> Self {
        match worker {
            Some(phase @ (WorkerPhase::Running | WorkerPhase::Succeeded)) => {
                Self::Monitoring { worker: phase }
            }
            other => Self::AwaitingWorker { worker: other },
        }
    }

    /// Classify `test`, consulting its worker pod only when the resource alone
    /// does not decide the state
    pub async fn observe(test: &NetworkPerformanceTest, workers: &WorkerManager) -> Result<Self> {
        if let Some(state) = Self::from_resource(test) {
            return Ok(state);
        }

        let worker = workers.get_worker(&test.name_any()).await?;
        Ok(Self::from_worker(worker.map(|w| w.phase)))
    }
}
