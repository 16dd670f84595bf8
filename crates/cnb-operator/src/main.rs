//! cnb-operator - buildpack build controller for Kubernetes

use clap::Parser;

use cnb_common::kube_utils::create_client;
use cnb_common::telemetry::{init_telemetry, TelemetryConfig};
use cnb_operator::config::{Cli, Command, ControllerConfig};
use cnb_operator::controller_runner::build_controllers;
use cnb_operator::crds::{crd_yaml, ensure_crds_installed};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Registry and API server TLS both go through rustls; the provider must
    // be installed before the first client is built.
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Controller) {
        Command::Crd => {
            print!("{}", crd_yaml()?);
            Ok(())
        }
        Command::Controller => run_controller(cli.config).await,
    }
}

async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    init_telemetry(TelemetryConfig {
        service_name: "cnb-operator".to_string(),
        format: config.log_format,
    })?;

    tracing::info!(
        concurrency = config.concurrency,
        system_namespace = %config.system_namespace,
        "Starting cnb-operator"
    );

    let client = create_client(config.kubeconfig.as_deref()).await?;
    ensure_crds_installed(&client).await?;

    let controllers = build_controllers(client, &config);
    futures::future::join_all(controllers).await;

    tracing::info!("Controllers stopped");
    Ok(())
}
