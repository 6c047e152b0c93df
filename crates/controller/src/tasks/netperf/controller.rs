use super::parser;
use super::state::TestState;
use crate::crds::{
    NetworkPerformanceTest, NetworkPerformanceTestOutput, NetworkPerformanceTestPhase,
    NetworkPerformanceTestStatus,
};
use crate::tasks::events::{actions, reasons};
use crate::tasks::finalizer::{add_finalizer, has_finalizer, remove_finalizer, try_update_status};
use crate::tasks::types::{Context, Error, Result, FINALIZER_NAME};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Controller entry point for one `NetworkPerformanceTest`
#[instrument(skip(test, ctx), fields(test_name = %test.name_any()))]
pub async fn reconcile_network_performance_test(
    test: Arc<NetworkPerformanceTest>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let name = test.meta().name.clone().ok_or(Error::MissingObjectKey)?;

    let action = reconcile_by_name(&name, &ctx).await?;
    ctx.backoff.reset(&name);
    Ok(action)
}

/// Drive the named test one step toward completion.
///
/// Loads the latest copy from the store, so the caller only needs the identity.
pub async fn reconcile_by_name(name: &str, ctx: &Context) -> Result<Action> {
    let Some(mut test) = ctx.tests.get(name).await? else {
        debug!(test = %name, "Test no longer exists");
        ctx.backoff.reset(name);
        return Ok(Action::await_change());
    };

    loop {
        let state = TestState::observe(&test, &ctx.workers).await?;
        debug!(test = %name, state = ?state, "Observed state");

        match state {
            TestState::Deleting => return cleanup(&test, ctx).await,
            TestState::Terminal => return Ok(Action::await_change()),
            TestState::Uninitialized => {
                test = add_finalizer(
                    ctx.tests.as_ref(),
                    &ctx.config.retry_config(),
                    FINALIZER_NAME,
                    &test,
                )
                .await?;
            }
            TestState::AwaitingWorker { worker: None } => return start_worker(&test, ctx).await,
            TestState::AwaitingWorker {
                worker: Some(phase),
            } => {
                debug!(test = %name, phase = ?phase, "Waiting for worker");
                return Ok(requeue(ctx));
            }
            TestState::Monitoring { worker } => {
                debug!(test = %name, phase = ?worker, "Checking worker output");
                return collect_results(&test, ctx).await;
            }
        }
    }
}

fn requeue(ctx: &Context) -> Action {
    Action::requeue(ctx.config.reconcile.requeue_after())
}

async fn start_worker(test: &NetworkPerformanceTest, ctx: &Context) -> Result<Action> {
    let name = test.name_any();
    let args = ctx.workers.worker_args(&test.spec);

    if ctx.workers.ensure_worker(&name, args).await? {
        ctx.events
            .publish(
                &test.object_ref(&()),
                EventType::Normal,
                reasons::WORKER_CREATED,
                actions::RECONCILE,
                Some(format!(
                    "Created worker pod {}/{name}",
                    ctx.workers.namespace()
                )),
            )
            .await;
    }

    if test.status.is_none() {
        try_update_status(
            ctx.tests.as_ref(),
            &ctx.config.retry_config(),
            test,
            |latest: &mut NetworkPerformanceTest| {
                if latest.status.is_none() {
                    latest.status = Some(NetworkPerformanceTestStatus::default());
                }
            },
        )
        .await?;
    }

    Ok(requeue(ctx))
}

/// Record parsed results, then remove the worker.
///
/// The status write must succeed before the worker is deleted so its output is
/// never lost.
async fn collect_results(test: &NetworkPerformanceTest, ctx: &Context) -> Result<Action> {
    let name = test.name_any();
    let logs = ctx.workers.worker_logs(&name).await?;

    let Some(table) = parser::parse(&logs) else {
        debug!(test = %name, "Results not available yet");
        return Ok(requeue(ctx));
    };
    let rows = table.len();

    try_update_status(
        ctx.tests.as_ref(),
        &ctx.config.retry_config(),
        test,
        |latest: &mut NetworkPerformanceTest| {
            latest.status = Some(NetworkPerformanceTestStatus {
                phase: NetworkPerformanceTestPhase::Succeeded,
                output: NetworkPerformanceTestOutput {
                    bandwidth: table.clone(),
                },
            });
        },
    )
    .await?;
    info!(test = %name, rows, "Recorded netperf results");

    ctx.events
        .publish(
            &test.object_ref(&()),
            EventType::Normal,
            reasons::RESULTS_RECORDED,
            actions::RECONCILE,
            Some(format!("Recorded bandwidth for {rows} paths")),
        )
        .await;

    ctx.workers.delete_worker(&name).await?;
    Ok(Action::await_change())
}

/// Remove the worker, then release the finalizer
async fn cleanup(test: &NetworkPerformanceTest, ctx: &Context) -> Result<Action> {
    let name = test.name_any();
    if !has_finalizer(test, FINALIZER_NAME) {
        debug!(test = %name, "Deletion not guarded by our finalizer");
        return Ok(Action::await_change());
    }

    info!(test = %name, "Cleaning up worker before deletion");
    let object_ref = test.object_ref(&());
    ctx.events
        .publish(
            &object_ref,
            EventType::Normal,
            reasons::DELETING,
            actions::CLEANUP,
            Some("Deleting worker pod".to_string()),
        )
        .await;

    ctx.workers.delete_worker(&name).await?;
    remove_finalizer(
        ctx.tests.as_ref(),
        &ctx.config.retry_config(),
        FINALIZER_NAME,
        test,
    )
    .await?;
    ctx.backoff.reset(&name);

    ctx.events
        .publish(
            &object_ref,
            EventType::Normal,
            reasons::DELETED,
            actions::CLEANUP,
            None,
        )
        .await;

    Ok(Action::await_change())
}

/// Requeue failed reconciliations with a per-object exponential delay
#[allow(clippy::needless_pass_by_value)]
pub fn error_policy(test: Arc<NetworkPerformanceTest>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = test.name_any();
    let delay = ctx.backoff.next_delay(&name);
    error!(
        test = %name,
        error = %error,
        retry_in_ms = delay.as_millis(),
        "Reconcile failed"
    );
    Action::requeue(delay)
}
