//! Controller runner - builds the SQSSecret controller future

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use reloader_common::crd::SQSSecret;
use reloader_controller::{error_policy, reconcile, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the SQSSecret controller future
pub fn build_sqs_secret_controller(
    client: Client,
    ctx: Arc<Context>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let resources: Api<SQSSecret> = Api::all(client);

    tracing::info!("- SQSSecret controller");

    Box::pin(
        Controller::new(resources, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("SQSSecret")),
    )
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
