use crate::crds::NetworkPerformanceTest;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::runtime::controller::{self, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config;
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};

pub mod config;
pub mod events;
pub mod finalizer;
pub mod netperf;
pub mod retry;
pub mod types;

// Re-export commonly used items
pub use config::ControllerConfig;
pub use netperf::{error_policy, reconcile_network_performance_test};
pub use types::{Context, Error, Result};

use events::KubeEventPublisher;
use netperf::worker::{KubePodSubstrate, MANAGED_BY_LABEL};

/// Run the NetworkPerformanceTest controller until `shutdown` is cancelled
#[instrument(skip(client, config, shutdown), fields(worker_namespace = %config.worker.namespace))]
pub async fn run_task_controller(
    client: Client,
    config: ControllerConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    info!("Starting NetworkPerformanceTest controller");

    let tests: Api<NetworkPerformanceTest> = Api::all(client.clone());
    let pods: Api<Pod> = Api::namespaced(client.clone(), &config.worker.namespace);

    // Startup visibility: report what the controller is about to pick up
    match tests.list(&ListParams::default()).await {
        Ok(list) => {
            info!(
                "Controller startup: found {} NetworkPerformanceTest(s)",
                list.items.len()
            );
            for test in &list.items {
                info!(
                    "Existing NetworkPerformanceTest: name={}, phase={}",
                    test.name_any(),
                    test.phase()
                );
            }
        }
        Err(e) => {
            warn!("Failed to list NetworkPerformanceTests at startup: {}", e);
        }
    }

    let concurrency = config.reconcile.concurrency;
    let context = Arc::new(Context::new(
        Arc::new(tests.clone()),
        Arc::new(KubePodSubstrate::new(
            client.clone(),
            &config.worker.namespace,
        )),
        Arc::new(KubeEventPublisher::new(client, crate::CONTROLLER_NAME)),
        Arc::new(config),
    ));

    let watcher_config = Config::default().any_semantic();
    let worker_selector = format!("{MANAGED_BY_LABEL}={}", crate::CONTROLLER_NAME);

    let backoff_ctx = context.clone();

    Controller::new(tests, watcher_config.clone())
        // Worker pods share their test's name
        .watches(pods, watcher_config.labels(&worker_selector), |pod: Pod| {
            Some(ObjectRef::<NetworkPerformanceTest>::new(&pod.name_any()))
        })
        .with_config(controller::Config::default().concurrency(concurrency))
        .graceful_shutdown_on(shutdown.cancelled_owned())
        .run(reconcile_network_performance_test, error_policy, context)
        .for_each(|reconciliation_result| {
            let span = tracing::info_span!("netperf_reconciliation_result");
            let ctx = backoff_ctx.clone();
            async move {
                match reconciliation_result {
                    Ok((object_ref, action)) => {
                        info!(
                            resource = %object_ref.name,
                            action = ?action,
                            "NetworkPerformanceTest reconciliation successful"
                        );
                    }
                    // A requeue fired for a test deleted while it was failing
                    Err(controller::Error::ObjectNotFound(object_ref)) => {
                        debug!(resource = %object_ref.name, "Dropping requeue for deleted test");
                        ctx.backoff.reset(&object_ref.name);
                    }
                    Err(reconciliation_err) => {
                        error!(
                            error = ?reconciliation_err,
                            "NetworkPerformanceTest reconciliation error"
                        );
                    }
                }
            }
            .instrument(span)
        })
        .await;

    info!("NetworkPerformanceTest controller shut down");
    Ok(())
}
