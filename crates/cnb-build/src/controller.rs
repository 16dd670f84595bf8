//! CnbBuild controller implementation
//!
//! Each pass loads the build, makes sure its build job exists, mirrors the
//! job's conditions onto the build status and, on the transition into
//! success, records the built image's buildpacks and digest. The registry is
//! contacted at most once per build: only while the job reports
//! `Succeeded=True` and the build does not yet.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use cnb_common::crd::{BuildJob, CnbBuild, CnbBuildStatus};
use cnb_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use cnb_common::kube_utils::{patch_status, with_timeout};
use cnb_common::retry::BackoffTracker;
use cnb_common::FIELD_MANAGER;
use cnb_registry::{BuiltImageRetriever, ImageRef};

use crate::error::BuildError;
use crate::pipeline::{generate, is_owned_by_build};

/// Default deadline for each Kubernetes API call
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);
/// Default interval between periodic re-reconciles of a healthy build
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(600);

const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

// =============================================================================
// Work keys
// =============================================================================

/// `namespace/name` identifying a build
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BuildKey {
    pub namespace: String,
    pub name: String,
}

impl BuildKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a build delivered by the watcher
    pub fn for_build(build: &CnbBuild) -> Result<Self, BuildError> {
        let namespace = build.namespace().ok_or_else(|| BuildError::InvalidKey {
            key: build.name_any(),
            reason: "missing namespace",
        })?;
        Ok(Self::new(namespace, build.name_any()))
    }
}

impl FromStr for BuildKey {
    type Err = BuildError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| BuildError::InvalidKey {
            key: key.to_string(),
            reason,
        };
        let (namespace, name) = key
            .split_once('/')
            .ok_or_else(|| invalid("expected namespace/name"))?;
        if namespace.is_empty() || name.is_empty() {
            return Err(invalid("empty namespace or name"));
        }
        if name.contains('/') {
            return Err(invalid("too many segments"));
        }
        Ok(Self::new(namespace, name))
    }
}

impl fmt::Display for BuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// =============================================================================
// Traits for dependency injection and testability
// =============================================================================

/// Read and status-write access to CnbBuild resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BuildClient: Send + Sync {
    /// Get a build, `None` when it does not exist
    async fn get_build(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CnbBuild>, cnb_common::Error>;

    /// Replace the status of `build`, failing with a conflict if it changed since read
    async fn update_build_status(
        &self,
        build: &CnbBuild,
        status: &CnbBuildStatus,
    ) -> Result<(), cnb_common::Error>;
}

/// Read and create access to build jobs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Get a build job, `None` when it does not exist
    async fn get_job(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BuildJob>, cnb_common::Error>;

    /// Create a build job
    async fn create_job(&self, job: &BuildJob) -> Result<BuildJob, cnb_common::Error>;
}

/// Kubernetes-backed [`BuildClient`] and [`JobClient`]
pub struct KubeBuildClient {
    client: Client,
    timeout: Duration,
}

impl KubeBuildClient {
    /// Create a client bounding each API call by `timeout`
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl BuildClient for KubeBuildClient {
    async fn get_build(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CnbBuild>, cnb_common::Error> {
        let api: Api<CnbBuild> = Api::namespaced(self.client.clone(), namespace);
        with_timeout(self.timeout, "get CnbBuild", api.get_opt(name)).await
    }

    async fn update_build_status(
        &self,
        build: &CnbBuild,
        status: &CnbBuildStatus,
    ) -> Result<(), cnb_common::Error> {
        let namespace = build.namespace().unwrap_or_default();
        let api: Api<CnbBuild> = Api::namespaced(self.client.clone(), &namespace);
        let name = build.name_any();
        with_timeout(
            self.timeout,
            "update CnbBuild status",
            patch_status(
                &api,
                &name,
                status,
                build.resource_version().as_deref(),
                FIELD_MANAGER,
            ),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobClient for KubeBuildClient {
    async fn get_job(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BuildJob>, cnb_common::Error> {
        let api: Api<BuildJob> = Api::namespaced(self.client.clone(), namespace);
        with_timeout(self.timeout, "get build job", api.get_opt(name)).await
    }

    async fn create_job(&self, job: &BuildJob) -> Result<BuildJob, cnb_common::Error> {
        let namespace = job.namespace().unwrap_or_default();
        let api: Api<BuildJob> = Api::namespaced(self.client.clone(), &namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        with_timeout(self.timeout, "create build job", api.create(&params, job)).await
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Result of one reconcile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Status was written
    Updated,
    /// The build no longer exists
    Gone,
}

/// Drives one build toward its desired state
pub struct BuildReconciler {
    builds: Arc<dyn BuildClient>,
    jobs: Arc<dyn JobClient>,
    metadata: Arc<dyn BuiltImageRetriever>,
    events: Arc<dyn EventPublisher>,
}

impl BuildReconciler {
    pub fn new(
        builds: Arc<dyn BuildClient>,
        jobs: Arc<dyn JobClient>,
        metadata: Arc<dyn BuiltImageRetriever>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            builds,
            jobs,
            metadata,
            events,
        }
    }

    /// Reconcile the build named by `key` (`namespace/name`)
    pub async fn reconcile_str(&self, key: &str) -> Result<ReconcileOutcome, BuildError> {
        let key: BuildKey = key.parse()?;
        self.reconcile(&key).await
    }

    /// Reconcile one build
    pub async fn reconcile(&self, key: &BuildKey) -> Result<ReconcileOutcome, BuildError> {
        let Some(build) = self
            .builds
            .get_build(&key.namespace, &key.name)
            .await
            .map_err(BuildError::GetBuild)?
        else {
            debug!(build = %key, "build no longer exists");
            return Ok(ReconcileOutcome::Gone);
        };

        let job = self.ensure_job(&build).await?;

        let mut status = build.status.clone().unwrap_or_default();

        if job.succeeded() && !build.succeeded() {
            self.record_built_image(&build, &mut status).await?;
        }

        status.conditions = job.conditions().to_vec();
        status.observed_generation = build.metadata.generation;

        self.builds
            .update_build_status(&build, &status)
            .await
            .map_err(BuildError::UpdateStatus)?;

        Ok(ReconcileOutcome::Updated)
    }

    async fn ensure_job(&self, build: &CnbBuild) -> Result<BuildJob, BuildError> {
        let namespace = build.namespace().unwrap_or_default();
        let name = build.name_any();

        if let Some(job) = self
            .jobs
            .get_job(&namespace, &name)
            .await
            .map_err(BuildError::GetJob)?
        {
            if !is_owned_by_build(&job, build) {
                warn!(build = %name, namespace = %namespace, "existing build job is not controlled by this build");
            }
            return Ok(job);
        }

        let job = generate(build)?;
        let created = self
            .jobs
            .create_job(&job)
            .await
            .map_err(BuildError::CreateJob)?;

        info!(build = %name, namespace = %namespace, "created build job");
        self.events
            .publish(
                &build.object_ref(&()),
                EventType::Normal,
                reasons::JOB_CREATED,
                actions::CREATE,
                Some(format!("Created build job {name}")),
            )
            .await;

        Ok(created)
    }

    async fn record_built_image(
        &self,
        build: &CnbBuild,
        status: &mut CnbBuildStatus,
    ) -> Result<(), BuildError> {
        let image = ImageRef::new(&build.spec.image, build.namespace().unwrap_or_default())
            .with_pull_secrets(build.pull_secret_names());

        let built = match self.metadata.get_built_image(&image).await {
            Ok(built) => built,
            Err(e) => {
                if e.is_permanent() {
                    self.events
                        .publish(
                            &build.object_ref(&()),
                            EventType::Warning,
                            reasons::METADATA_UNAVAILABLE,
                            actions::FETCH_METADATA,
                            Some(e.to_string()),
                        )
                        .await;
                }
                return Err(BuildError::Metadata(e));
            }
        };

        info!(
            build = %build.name_any(),
            image = %build.spec.image,
            sha = %built.identifier,
            buildpacks = built.buildpacks.len(),
            completed_at = ?built.completed_at,
            "recorded built image metadata"
        );
        self.events
            .publish(
                &build.object_ref(&()),
                EventType::Normal,
                reasons::METADATA_RECORDED,
                actions::FETCH_METADATA,
                Some(format!("Built image {}", built.identifier)),
            )
            .await;

        status.build_metadata = built.buildpacks;
        status.sha = Some(built.identifier);
        Ok(())
    }
}

// =============================================================================
// Controller context
// =============================================================================

/// Shared state for the CnbBuild controller
pub struct BuildContext {
    /// The reconciler
    pub reconciler: BuildReconciler,
    /// Per-build failure counts for requeue backoff
    pub backoff: BackoffTracker,
    /// Requeue interval after a successful reconcile
    pub resync_interval: Duration,
}

impl BuildContext {
    pub fn new(reconciler: BuildReconciler, resync_interval: Duration) -> Self {
        Self {
            reconciler,
            backoff: BackoffTracker::default(),
            resync_interval,
        }
    }

    /// Context talking to the cluster through `client`
    pub fn from_client(
        client: Client,
        metadata: Arc<dyn BuiltImageRetriever>,
        api_timeout: Duration,
        resync_interval: Duration,
    ) -> Self {
        let kube = Arc::new(KubeBuildClient::new(client.clone(), api_timeout));
        let events = Arc::new(KubeEventPublisher::new(client, "cnb-build-controller"));
        Self::new(
            BuildReconciler::new(kube.clone(), kube, metadata, events),
            resync_interval,
        )
    }
}

/// Reconcile a CnbBuild delivered by the controller runtime
#[instrument(skip(build, ctx), fields(build = %build.name_any(), namespace = %build.namespace().unwrap_or_default()))]
pub async fn reconcile(build: Arc<CnbBuild>, ctx: Arc<BuildContext>) -> Result<Action, BuildError> {
    let key = BuildKey::for_build(&build)?;
    ctx.reconciler.reconcile(&key).await?;
    ctx.backoff.reset(&key.to_string());
    Ok(Action::requeue(ctx.resync_interval))
}

/// Error policy for the CnbBuild controller
///
/// - malformed keys and ungeneratable builds wait for a spec change
/// - lost status races re-run right away
/// - unreadable metadata labels back off at the maximum delay
/// - everything else backs off exponentially per build
pub fn error_policy(build: Arc<CnbBuild>, error: &BuildError, ctx: Arc<BuildContext>) -> Action {
    let key = match BuildKey::for_build(&build) {
        Ok(key) => key.to_string(),
        Err(_) => build.name_any(),
    };

    error!(
        %error,
        build = %key,
        retryable = error.is_retryable(),
        "build reconciliation failed"
    );

    if !error.is_retryable() {
        return Action::await_change();
    }
    if error.is_conflict() {
        return Action::requeue(CONFLICT_REQUEUE);
    }
    if error.is_permanent_metadata() {
        return Action::requeue(ctx.backoff.max_delay());
    }
    Action::requeue(ctx.backoff.next_delay(&key))
}
