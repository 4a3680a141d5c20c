//! SQSSecret controller implementation
//!
//! Each reconciliation runs one cycle against the shared notification queue:
//!
//! 1. receive a batch of notifications (visibility timeout hides them from
//!    other consumers while the cycle runs)
//! 2. decode each one and match it against the SQSSecret's `secretId`
//! 3. for a match, restart the listed deployments in order
//! 4. delete every notification of the batch from the queue
//!
//! Delivery is at-least-once. If any restart fails the cycle aborts before
//! step 4 and the whole batch is redelivered later, so a deployment restarted
//! before the failure is restarted again on the retry.
//!
//! Non-matching notifications are deleted too, including rotations of secrets
//! watched by other SQSSecrets polling the same queue. Give each SQSSecret its
//! own queue (or an EventBridge rule filtering on its secret) when several
//! secrets are watched.
//!
//! The restart label holds Unix seconds, taken once per cycle. A second
//! matching rotation handled within the same second as the previous restart
//! writes an unchanged label, so the patch rolls nothing. The notification is
//! still acknowledged.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use reloader_common::crd::{SQSSecret, SQSSecretPhase, SQSSecretStatus, WatchedSecret};
use reloader_common::metrics::{CycleCounts, CycleTimer};
use reloader_common::{Error, QueuePollConfig, ReloaderConfig, FIELD_MANAGER};

use crate::ack::AckBatch;
use crate::notification::{classify, Verdict};
use crate::queue::{DeleteOutcome, QueueClient};
use crate::restart::{restart_workloads, KubeWorkloadClient, WorkloadClient};

/// Trait abstracting SQSSecret status writes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusClient: Send + Sync {
    /// Patch the status subresource of an SQSSecret
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &SQSSecretStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeStatusClient {
    client: Client,
}

impl KubeStatusClient {
    /// Create a new KubeStatusClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusClient for KubeStatusClient {
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &SQSSecretStatus,
    ) -> Result<(), Error> {
        let api: Api<SQSSecret> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}

/// Shared context for the SQSSecret controller
pub struct Context {
    /// Notification queue
    pub queue: Arc<dyn QueueClient>,
    /// Deployment access
    pub workloads: Arc<dyn WorkloadClient>,
    /// SQSSecret status writes
    pub status: Arc<dyn StatusClient>,
    /// Process configuration
    pub config: ReloaderConfig,
}

impl Context {
    /// Create a context backed by a real Kubernetes client
    pub fn new(client: Client, queue: Arc<dyn QueueClient>, config: ReloaderConfig) -> Self {
        Self {
            queue,
            workloads: Arc::new(KubeWorkloadClient::new(client.clone())),
            status: Arc::new(KubeStatusClient::new(client)),
            config,
        }
    }

    /// Create a context for testing with mock clients
    #[cfg(test)]
    pub fn for_testing(
        queue: Arc<dyn QueueClient>,
        workloads: Arc<dyn WorkloadClient>,
        status: Arc<dyn StatusClient>,
        config: ReloaderConfig,
    ) -> Self {
        Self {
            queue,
            workloads,
            status,
            config,
        }
    }
}

/// What one cycle did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Notifications received
    pub received: usize,
    /// Notifications that matched the watched secret
    pub matched: usize,
    /// Deployment restarts performed, across all matches
    pub restarts: usize,
    /// Result of the acknowledgement
    pub acknowledged: DeleteOutcome,
}

impl CycleReport {
    /// Metric counts for this cycle
    pub fn counts(&self) -> CycleCounts {
        CycleCounts {
            received: self.received as u64,
            matched: self.matched as u64,
            restarts: self.restarts as u64,
            deleted: self.acknowledged.deleted.len() as u64,
            delete_failures: self.acknowledged.failed.len() as u64,
        }
    }
}

/// Run one receive → match → restart → acknowledge cycle
///
/// Returns an error, without deleting anything, when the queue cannot be read
/// or a restart fails. A failed acknowledgement is only logged: the affected
/// notifications are redelivered and handled again.
#[instrument(
    skip(watched, queue, workloads, poll),
    fields(resource = %watched.name, namespace = %watched.namespace)
)]
pub async fn run_cycle(
    watched: &WatchedSecret,
    queue: &dyn QueueClient,
    workloads: &dyn WorkloadClient,
    poll: &QueuePollConfig,
    stamp: &str,
) -> Result<CycleReport, Error> {
    let notifications = queue.receive(poll).await?;
    let mut report = CycleReport {
        received: notifications.len(),
        ..Default::default()
    };

    let mut batch = AckBatch::new();
    for notification in &notifications {
        match classify(notification, watched) {
            Verdict::Restart => {
                info!(
                    message_id = %notification.id,
                    secret_id = %watched.secret_id,
                    deployments = watched.workload_names.len(),
                    "secret rotated, restarting deployments"
                );
                report.matched += 1;
                report.restarts += restart_workloads(workloads, watched, stamp).await?;
            }
            Verdict::Ignore(reason) => {
                debug!(message_id = %notification.id, ?reason, "notification ignored");
            }
        }
        batch.push(notification);
    }

    match batch.flush(queue).await {
        Ok(outcome) => report.acknowledged = outcome,
        Err(e) => warn!(error = %e, "failed to acknowledge notifications, they will be redelivered"),
    }

    Ok(report)
}

/// Current wall-clock time in whole seconds, as a label value
fn restart_stamp() -> String {
    chrono::Utc::now().timestamp().to_string()
}

/// Reconcile an SQSSecret
///
/// Always asks to run again after the configured interval. Cycle failures
/// are recorded in the status and otherwise only delay the next attempt.
#[instrument(skip(resource, ctx), fields(resource = %resource.name_any()))]
pub async fn reconcile(resource: Arc<SQSSecret>, ctx: Arc<Context>) -> Result<Action, Error> {
    let requeue = Action::requeue(ctx.config.requeue_after);

    let watched = match resource.descriptor() {
        Ok(watched) => watched,
        Err(e @ Error::Validation { .. }) => {
            warn!(error = %e, "invalid SQSSecret spec, not polling");
            update_status(&ctx, &resource, SQSSecretPhase::Failed, Some(e.to_string()), false)
                .await?;
            return Ok(requeue);
        }
        Err(e) => return Err(e),
    };

    let stamp = restart_stamp();
    let timer = CycleTimer::start(format!("{}/{}", watched.namespace, watched.name));
    match run_cycle(
        &watched,
        ctx.queue.as_ref(),
        ctx.workloads.as_ref(),
        &ctx.config.queue,
        &stamp,
    )
    .await
    {
        Ok(report) => {
            if report.received > 0 {
                info!(
                    received = report.received,
                    matched = report.matched,
                    restarts = report.restarts,
                    deleted = report.acknowledged.deleted.len(),
                    "cycle complete"
                );
            }
            timer.completed(report.counts());
            update_status(
                &ctx,
                &resource,
                SQSSecretPhase::Watching,
                None,
                report.matched > 0,
            )
            .await?;
        }
        Err(e) => {
            warn!(
                error = %e,
                transient = e.is_transient(),
                retry_in_secs = ctx.config.requeue_after.as_secs(),
                "cycle aborted, notifications left on the queue"
            );
            timer.aborted(e.is_transient());
            update_status(&ctx, &resource, SQSSecretPhase::Failed, Some(e.to_string()), false)
                .await?;
        }
    }

    Ok(requeue)
}

/// Error policy for SQSSecret reconciliation
///
/// Retries use the same fixed interval as successful cycles.
pub fn error_policy(resource: Arc<SQSSecret>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        resource = %resource.name_any(),
        "SQSSecret reconciliation failed"
    );
    Action::requeue(ctx.config.requeue_after)
}

/// Write the status if it changed
///
/// `restarted` stamps `lastRestartAt`, which always counts as a change.
async fn update_status(
    ctx: &Context,
    resource: &SQSSecret,
    phase: SQSSecretPhase,
    message: Option<String>,
    restarted: bool,
) -> Result<(), Error> {
    let current = resource.status.as_ref();
    let current_message = current.and_then(|s| s.message.as_ref());
    if !restarted && resource.phase() == phase && current_message == message.as_ref() {
        return Ok(());
    }

    let Some(namespace) = resource.namespace() else {
        return Ok(());
    };

    let status = SQSSecretStatus {
        phase,
        message,
        last_restart_at: if restarted {
            Some(chrono::Utc::now().to_rfc3339())
        } else {
            current.and_then(|s| s.last_restart_at.clone())
        },
    };

    ctx.status
        .patch_status(&resource.name_any(), &namespace, &status)
        .await
}
