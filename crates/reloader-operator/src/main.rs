//! Secret reloader operator - restarts deployments when their secrets rotate

mod controller_runner;

use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use kube::{Api, Client, CustomResourceExt};

use reloader_common::config::{
    DEFAULT_REQUEUE_AFTER_SECS, DEFAULT_VISIBILITY_TIMEOUT_SECS, MAX_MESSAGES_LIMIT,
};
use reloader_common::crd::SQSSecret;
use reloader_common::telemetry::{init_telemetry, TelemetryConfig};
use reloader_common::{QueuePollConfig, ReloaderConfig, FIELD_MANAGER};
use reloader_controller::{Context, SqsQueueClient};

/// Secret reloader - restarts deployments when an SQS notification reports a new secret value
#[derive(Parser, Debug)]
#[command(name = "reloader", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    Controller(ControllerArgs),
}

#[derive(Args, Debug)]
struct ControllerArgs {
    /// URL of the queue receiving rotation notifications
    #[arg(long, env = "SECRETS_SQS_QUEUE_URL")]
    queue_url: Option<String>,

    /// AWS region of the queue
    #[arg(long, env = "AWS_DEFAULT_REGION")]
    region: Option<String>,

    /// Seconds between polling cycles
    #[arg(long, env = "SECRETS_ROTATE_AFTER", default_value_t = DEFAULT_REQUEUE_AFTER_SECS)]
    rotate_after: u64,

    /// Maximum notifications received per cycle (1-10)
    #[arg(long, env = "SECRETS_SQS_MAX_MESSAGES", default_value_t = MAX_MESSAGES_LIMIT)]
    max_messages: i32,

    /// Seconds received notifications stay hidden from other consumers
    #[arg(long, env = "SECRETS_SQS_VISIBILITY_TIMEOUT", default_value_t = DEFAULT_VISIBILITY_TIMEOUT_SECS)]
    visibility_timeout: i32,

    /// Long-poll wait in seconds (0-20)
    #[arg(long, env = "SECRETS_SQS_WAIT_TIME", default_value_t = 0)]
    wait_time: i32,
}

impl ControllerArgs {
    /// Arguments for the default mode, taken from the environment only
    fn parse_from_env() -> Self {
        #[derive(Parser)]
        struct EnvOnly {
            #[command(flatten)]
            args: ControllerArgs,
        }
        EnvOnly::parse_from(["reloader"]).args
    }

    fn into_config(self) -> Result<ReloaderConfig, reloader_common::Error> {
        ReloaderConfig::new(
            self.queue_url.unwrap_or_default(),
            self.region.unwrap_or_default(),
            self.rotate_after,
            QueuePollConfig {
                max_messages: self.max_messages,
                visibility_timeout_secs: self.visibility_timeout,
                wait_time_secs: self.wait_time,
            },
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&SQSSecret::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        service_name: "reloader-operator".to_string(),
        ..Default::default()
    })
    .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let args = match cli.command {
        Some(Commands::Controller(args)) => args,
        None => ControllerArgs::parse_from_env(),
    };
    let config = args
        .into_config()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    run_controller(config).await
}

/// Install the SQSSecret CRD with server-side apply
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing SQSSecret CRD...");
    crds.patch(
        "sqssecrets.secretreload.dev",
        &params,
        &Patch::Apply(&SQSSecret::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install SQSSecret CRD: {}", e))?;

    Ok(())
}

async fn run_controller(config: ReloaderConfig) -> anyhow::Result<()> {
    tracing::info!(
        queue_url = %config.queue_url,
        region = %config.region,
        rotate_after_secs = config.requeue_after.as_secs(),
        "Secret reloader starting..."
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let queue = SqsQueueClient::from_region(&config.region, config.queue_url.clone()).await;
    let ctx = Arc::new(Context::new(client.clone(), Arc::new(queue), config));

    tracing::info!("Starting controllers:");
    controller_runner::build_sqs_secret_controller(client, ctx).await;

    tracing::info!("Secret reloader shutting down");
    Ok(())
}
