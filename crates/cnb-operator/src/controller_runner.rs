//! Controller runner - builds the controller futures
//!
//! Construction is kept separate from execution so `main` only decides how
//! the futures are driven.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::controller::Config as ControllerSettings;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use cnb_common::crd::{BuildJob, ClusterBuilder, CnbBuild};
use cnb_registry::{KubeKeychain, OciImageSource, RemoteMetadataRetriever};

use crate::config::ControllerConfig;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
///
/// The API server then closes idle watches before the client gives up on
/// the response body.
const WATCH_TIMEOUT_SECS: u32 = 25;

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Registry retriever shared by both controllers
pub fn metadata_retriever(client: Client, config: &ControllerConfig) -> Arc<RemoteMetadataRetriever> {
    let source = Arc::new(OciImageSource::new(config.insecure_registries.clone()));
    let keychain = Arc::new(KubeKeychain::new(client, config.api_timeout()));
    Arc::new(RemoteMetadataRetriever::new(source, keychain).with_timeout(config.registry_timeout()))
}

/// Build the CnbBuild and ClusterBuilder controller futures
pub fn build_controllers(client: Client, config: &ControllerConfig) -> Vec<ControllerFuture> {
    let retriever = metadata_retriever(client.clone(), config);
    let settings = ControllerSettings::default().concurrency(config.concurrency);

    let build_ctx = Arc::new(cnb_build::BuildContext::from_client(
        client.clone(),
        retriever.clone(),
        config.api_timeout(),
        config.resync_interval(),
    ));
    let builds: Api<CnbBuild> = Api::all(client.clone());
    let jobs: Api<BuildJob> = Api::all(client.clone());

    tracing::info!("- CnbBuild controller");
    let build_ctrl = Controller::new(builds, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .owns(jobs, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .with_config(settings.clone())
        .shutdown_on_signal()
        .run(cnb_build::reconcile, cnb_build::error_policy, build_ctx)
        .for_each(log_reconcile_result("CnbBuild"));

    let builder_ctx = Arc::new(cnb_builder::BuilderContext::from_client(
        client.clone(),
        retriever,
        config.system_namespace.clone(),
        config.api_timeout(),
        config.builder_poll_interval(),
    ));
    let builders: Api<ClusterBuilder> = Api::all(client);

    tracing::info!("- ClusterBuilder controller");
    let builder_ctrl =
        Controller::new(builders, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
            .with_config(settings)
            .shutdown_on_signal()
            .run(cnb_builder::reconcile, cnb_builder::error_policy, builder_ctx)
            .for_each(log_reconcile_result("ClusterBuilder"));

    vec![Box::pin(build_ctrl), Box::pin(builder_ctrl)]
}

/// Creates a closure for logging reconciliation results.
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
