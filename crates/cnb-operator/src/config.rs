use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use cnb_build::controller::{DEFAULT_API_TIMEOUT, DEFAULT_RESYNC_INTERVAL};
use cnb_builder::controller::DEFAULT_POLL_INTERVAL;
use cnb_common::telemetry::LogFormat;
use cnb_common::DEFAULT_SYSTEM_NAMESPACE;
use cnb_registry::retriever::DEFAULT_FETCH_TIMEOUT;

/// cnb-operator - builds container images from git sources with Cloud Native Buildpacks
#[derive(Parser, Debug)]
#[command(name = "cnb-operator", version, about, long_about = None)]
pub struct Cli {
    /// What to run; defaults to the controller
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Controller settings
    #[command(flatten)]
    pub config: ControllerConfig,
}

/// Operator subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the CnbBuild and ClusterBuilder controllers (default mode)
    Controller,
    /// Print the CRD manifests as YAML and exit
    Crd,
}

/// Controller settings, each with a `CNB_*` environment fallback
#[derive(Args, Debug, Clone)]
pub struct ControllerConfig {
    /// Path to a kubeconfig file; in-cluster or default config when unset
    #[arg(long, env = "CNB_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Maximum number of objects reconciled concurrently per controller
    #[arg(
        long,
        env = "CNB_CONCURRENCY",
        default_value_t = 4,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub concurrency: u16,

    /// Deadline for each Kubernetes API call, in seconds
    #[arg(
        long,
        env = "CNB_API_TIMEOUT_SECS",
        default_value_t = DEFAULT_API_TIMEOUT.as_secs()
    )]
    pub api_timeout_secs: u64,

    /// Deadline for each registry metadata fetch, in seconds
    #[arg(
        long,
        env = "CNB_REGISTRY_TIMEOUT_SECS",
        default_value_t = DEFAULT_FETCH_TIMEOUT.as_secs()
    )]
    pub registry_timeout_secs: u64,

    /// Interval between periodic resyncs of every build, in seconds
    #[arg(
        long,
        env = "CNB_RESYNC_SECS",
        default_value_t = DEFAULT_RESYNC_INTERVAL.as_secs()
    )]
    pub resync_secs: u64,

    /// Interval between re-resolving builder image tags, in seconds
    #[arg(
        long,
        env = "CNB_BUILDER_POLL_SECS",
        default_value_t = DEFAULT_POLL_INTERVAL.as_secs()
    )]
    pub builder_poll_secs: u64,

    /// Namespace holding pull secrets for cluster-scoped builders
    #[arg(long, env = "CNB_SYSTEM_NAMESPACE", default_value = DEFAULT_SYSTEM_NAMESPACE)]
    pub system_namespace: String,

    /// Registries reached over plain HTTP
    #[arg(long = "insecure-registry", env = "CNB_INSECURE_REGISTRIES", value_delimiter = ',')]
    pub insecure_registries: Vec<String>,

    /// Log output format (json or text)
    #[arg(long, env = "CNB_LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,
}

impl ControllerConfig {
    /// Deadline for each Kubernetes API call
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    /// Deadline for each registry metadata fetch
    pub fn registry_timeout(&self) -> Duration {
        Duration::from_secs(self.registry_timeout_secs)
    }

    /// Requeue interval after a build reconciles cleanly
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    /// Requeue interval after a builder resolves
    pub fn builder_poll_interval(&self) -> Duration {
        Duration::from_secs(self.builder_poll_secs)
    }
}
