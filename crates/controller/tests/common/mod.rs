//! In-memory stand-ins for the API server used by the reconcile tests.
//!
//! Both fakes append to a shared journal so tests can assert the order of side
//! effects across the object store, the pod substrate and event publishing.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{ObjectReference, Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::runtime::events::EventType;
use kube::ResourceExt;
use networkperformance_controller::crds::{
    NetworkPerformanceTest, NetworkPerformanceTestPhase, NetworkPerformanceTestSpec,
    NetworkPerformanceTestStatus,
};
use networkperformance_controller::tasks::events::EventPublisher;
use networkperformance_controller::tasks::finalizer::ObjectStore;
use networkperformance_controller::tasks::netperf::WorkerSubstrate;
use networkperformance_controller::tasks::types::FINALIZER_NAME;
use networkperformance_controller::{Context, ControllerConfig, Error, Result};

pub type Journal = Arc<Mutex<Vec<String>>>;

pub const NETPERF_LOG: &str = "\
Starting netperf orchestrator
MSS                                          , Maximum, 96, 352, 608, 864,
1 iperf TCP. Same VM using Pod IP            ,4470.0, 1234.5, 2345.6, 3456.7, 4470.0,
2 iperf TCP. Same VM using Virtual IP        ,4210.0, 1100.1, 2200.2, 3300.3, 4210.0,

Test concluded.
";

pub fn api_error(code: u16, reason: &str) -> Error {
    Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} (fake)"),
        reason: reason.to_string(),
        code,
    }))
}

pub fn new_test(name: &str) -> NetworkPerformanceTest {
    NetworkPerformanceTest::new(
        name,
        NetworkPerformanceTestSpec {
            test_type: "pod2pod".to_string(),
            iterations: 1,
        },
    )
}

pub fn with_finalizer(mut test: NetworkPerformanceTest) -> NetworkPerformanceTest {
    test.metadata.finalizers = Some(vec![FINALIZER_NAME.to_string()]);
    test
}

pub fn with_phase(
    mut test: NetworkPerformanceTest,
    phase: NetworkPerformanceTestPhase,
) -> NetworkPerformanceTest {
    test.status = Some(NetworkPerformanceTestStatus {
        phase,
        ..Default::default()
    });
    test
}

pub fn deleting(mut test: NetworkPerformanceTest) -> NetworkPerformanceTest {
    test.metadata.deletion_timestamp = Some(Time(Utc::now()));
    test
}

fn bump(meta: &mut ObjectMeta) {
    let rv = meta
        .resource_version
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    meta.resource_version = Some((rv + 1).to_string());
}

/// Cluster-scoped object store with resourceVersion checks.
///
/// `replace` only persists metadata and spec, `replace_status` only status, and an
/// object marked for deletion disappears once its last finalizer is removed.
pub struct FakeTestStore {
    objects: Mutex<BTreeMap<String, NetworkPerformanceTest>>,
    pending_conflicts: Mutex<u32>,
    journal: Journal,
}

impl FakeTestStore {
    pub fn new(journal: Journal) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            pending_conflicts: Mutex::new(0),
            journal,
        }
    }

    pub fn insert(&self, mut test: NetworkPerformanceTest) {
        if test.metadata.resource_version.is_none() {
            test.metadata.resource_version = Some("1".to_string());
        }
        self.objects
            .lock()
            .unwrap()
            .insert(test.name_any(), test);
    }

    pub fn object(&self, name: &str) -> Option<NetworkPerformanceTest> {
        self.objects.lock().unwrap().get(name).cloned()
    }

    /// The next `n` writes lose a race against another writer
    pub fn inject_conflicts(&self, n: u32) {
        *self.pending_conflicts.lock().unwrap() = n;
    }

    fn write(
        &self,
        name: &str,
        obj: &NetworkPerformanceTest,
        apply: impl FnOnce(&mut NetworkPerformanceTest, &NetworkPerformanceTest),
    ) -> Result<NetworkPerformanceTest> {
        let mut objects = self.objects.lock().unwrap();
        let Some(current) = objects.get_mut(name) else {
            return Err(api_error(404, "NotFound"));
        };

        let mut conflicts = self.pending_conflicts.lock().unwrap();
        if *conflicts > 0 {
            *conflicts -= 1;
            bump(&mut current.metadata);
        }
        if obj.metadata.resource_version.is_some()
            && obj.metadata.resource_version != current.metadata.resource_version
        {
            return Err(api_error(409, "Conflict"));
        }

        apply(current, obj);
        bump(&mut current.metadata);
        let stored = current.clone();

        if stored.metadata.deletion_timestamp.is_some() && stored.finalizers().is_empty() {
            objects.remove(name);
        }
        Ok(stored)
    }
}

#[async_trait]
impl ObjectStore<NetworkPerformanceTest> for FakeTestStore {
    async fn get(&self, name: &str) -> Result<Option<NetworkPerformanceTest>> {
        Ok(self.object(name))
    }

    async fn replace(
        &self,
        name: &str,
        obj: &NetworkPerformanceTest,
    ) -> Result<NetworkPerformanceTest> {
        let stored = self.write(name, obj, |current, obj| {
            current.metadata = obj.metadata.clone();
            current.spec = obj.spec.clone();
        })?;
        self.journal
            .lock()
            .unwrap()
            .push(format!("replace:{name}:finalizers={}", stored.finalizers().len()));
        Ok(stored)
    }

    async fn replace_status(
        &self,
        name: &str,
        obj: &NetworkPerformanceTest,
    ) -> Result<NetworkPerformanceTest> {
        let stored = self.write(name, obj, |current, obj| {
            current.status = obj.status.clone();
        })?;
        self.journal
            .lock()
            .unwrap()
            .push(format!("replace_status:{name}:{}", stored.phase()));
        Ok(stored)
    }
}

/// Pods keyed by name, with scripted phases and logs
pub struct FakeSubstrate {
    pods: Mutex<BTreeMap<String, Pod>>,
    logs: Mutex<BTreeMap<String, String>>,
    fail_deletes: Mutex<bool>,
    create_calls: Mutex<u32>,
    journal: Journal,
}

impl FakeSubstrate {
    pub fn new(journal: Journal) -> Self {
        Self {
            pods: Mutex::new(BTreeMap::new()),
            logs: Mutex::new(BTreeMap::new()),
            fail_deletes: Mutex::new(false),
            create_calls: Mutex::new(0),
            journal,
        }
    }

    pub fn pod(&self, name: &str) -> Option<Pod> {
        self.pods.lock().unwrap().get(name).cloned()
    }

    pub fn pod_count(&self) -> usize {
        self.pods.lock().unwrap().len()
    }

    pub fn create_calls(&self) -> u32 {
        *self.create_calls.lock().unwrap()
    }

    /// Add a pod as if an earlier reconcile had created it
    pub fn add_pod(&self, name: &str, phase: &str) {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        self.pods.lock().unwrap().insert(name.to_string(), pod);
        self.set_phase(name, phase);
    }

    pub fn set_phase(&self, name: &str, phase: &str) {
        if let Some(pod) = self.pods.lock().unwrap().get_mut(name) {
            pod.status = Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            });
        }
    }

    pub fn set_logs(&self, name: &str, logs: &str) {
        self.logs
            .lock()
            .unwrap()
            .insert(name.to_string(), logs.to_string());
    }

    pub fn fail_deletes(&self, fail: bool) {
        *self.fail_deletes.lock().unwrap() = fail;
    }
}

#[async_trait]
impl WorkerSubstrate for FakeSubstrate {
    async fn get_pod(&self, name: &str) -> Result<Pod> {
        // Let concurrent reconciles interleave between lookup and create
        tokio::task::yield_now().await;
        self.pod(name).ok_or_else(|| api_error(404, "NotFound"))
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        *self.create_calls.lock().unwrap() += 1;
        let name = pod.name_any();
        let mut pods = self.pods.lock().unwrap();
        if pods.contains_key(&name) {
            return Err(api_error(409, "AlreadyExists"));
        }
        pods.insert(name.clone(), pod.clone());
        self.journal
            .lock()
            .unwrap()
            .push(format!("create_pod:{name}"));
        Ok(pod.clone())
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        if *self.fail_deletes.lock().unwrap() {
            return Err(api_error(500, "InternalError"));
        }
        if self.pods.lock().unwrap().remove(name).is_none() {
            return Err(api_error(404, "NotFound"));
        }
        self.journal
            .lock()
            .unwrap()
            .push(format!("delete_pod:{name}"));
        Ok(())
    }

    async fn read_logs(&self, name: &str) -> Result<String> {
        if self.pod(name).is_none() {
            return Err(api_error(404, "NotFound"));
        }
        Ok(self
            .logs
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default())
    }
}

/// Records event reasons in the journal
pub struct JournalEvents {
    journal: Journal,
}

#[async_trait]
impl EventPublisher for JournalEvents {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        self.journal
            .lock()
            .unwrap()
            .push(format!("event:{reason}"));
    }
}

/// Fakes wired into a reconciler context
pub struct Harness {
    pub store: Arc<FakeTestStore>,
    pub pods: Arc<FakeSubstrate>,
    pub journal: Journal,
    pub ctx: Arc<Context>,
}

impl Harness {
    pub fn new() -> Self {
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(FakeTestStore::new(journal.clone()));
        let pods = Arc::new(FakeSubstrate::new(journal.clone()));
        let events = Arc::new(JournalEvents {
            journal: journal.clone(),
        });

        let ctx = Arc::new(Context::new(
            store.clone(),
            pods.clone(),
            events,
            Arc::new(ControllerConfig::default()),
        ));

        Self {
            store,
            pods,
            journal,
            ctx,
        }
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().unwrap().clear();
    }
}
