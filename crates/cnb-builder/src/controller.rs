//! ClusterBuilder controller implementation
//!
//! ClusterBuilder is cluster-scoped, so its pull secrets are read from the
//! controller's system namespace.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use cnb_common::crd::{
    find_condition, ClusterBuilder, ClusterBuilderStatus, Condition, ConditionStatus,
    CONDITION_READY,
};
use cnb_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use cnb_common::kube_utils::{patch_status, with_timeout};
use cnb_common::retry::BackoffTracker;
use cnb_common::FIELD_MANAGER;
use cnb_registry::{BuilderImage, BuilderImageRetriever, ImageRef};

use crate::error::BuilderError;

/// Default interval between re-resolving a builder's tag
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);

const REASON_RESOLVED: &str = "Resolved";

/// Status-write access to ClusterBuilder resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BuilderKubeClient: Send + Sync {
    /// Patch the status of a ClusterBuilder
    async fn patch_builder_status(
        &self,
        builder: &ClusterBuilder,
        status: &ClusterBuilderStatus,
    ) -> Result<(), cnb_common::Error>;
}

/// Kubernetes-backed [`BuilderKubeClient`]
pub struct KubeBuilderClient {
    client: Client,
    timeout: Duration,
}

impl KubeBuilderClient {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl BuilderKubeClient for KubeBuilderClient {
    async fn patch_builder_status(
        &self,
        builder: &ClusterBuilder,
        status: &ClusterBuilderStatus,
    ) -> Result<(), cnb_common::Error> {
        let api: Api<ClusterBuilder> = Api::all(self.client.clone());
        let name = builder.name_any();
        with_timeout(
            self.timeout,
            "update ClusterBuilder status",
            patch_status(
                &api,
                &name,
                status,
                builder.resource_version().as_deref(),
                FIELD_MANAGER,
            ),
        )
        .await?;
        Ok(())
    }
}

/// Shared state for the ClusterBuilder controller
pub struct BuilderContext {
    pub kube: Arc<dyn BuilderKubeClient>,
    pub metadata: Arc<dyn BuilderImageRetriever>,
    pub events: Arc<dyn EventPublisher>,
    /// Namespace holding the builders' pull secrets
    pub system_namespace: String,
    /// Requeue interval after a successful resolve
    pub poll_interval: Duration,
    pub backoff: BackoffTracker,
}

impl BuilderContext {
    pub fn new(
        kube: Arc<dyn BuilderKubeClient>,
        metadata: Arc<dyn BuilderImageRetriever>,
        events: Arc<dyn EventPublisher>,
        system_namespace: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            kube,
            metadata,
            events,
            system_namespace: system_namespace.into(),
            poll_interval,
            backoff: BackoffTracker::default(),
        }
    }

    /// Context talking to the cluster through `client`
    pub fn from_client(
        client: Client,
        metadata: Arc<dyn BuilderImageRetriever>,
        system_namespace: impl Into<String>,
        api_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        let events = Arc::new(KubeEventPublisher::new(
            client.clone(),
            "cnb-builder-controller",
        ));
        Self::new(
            Arc::new(KubeBuilderClient::new(client, api_timeout)),
            metadata,
            events,
            system_namespace,
            poll_interval,
        )
    }
}

/// Reference used to resolve a builder: its (possibly moving) tag plus pull secrets
pub fn builder_image_ref(builder: &ClusterBuilder, system_namespace: &str) -> ImageRef {
    ImageRef::new(&builder.spec.image, system_namespace)
        .with_pull_secrets(builder.pull_secret_names())
}

/// Keep the previous transition time when the condition did not change
fn ready_condition(
    previous: Option<&ClusterBuilderStatus>,
    status: ConditionStatus,
    reason: &str,
    message: String,
) -> Condition {
    let mut condition = Condition::new(CONDITION_READY, status, reason, message);
    if let Some(prev) = previous.and_then(|s| find_condition(&s.conditions, CONDITION_READY)) {
        if prev.status == condition.status {
            condition.last_transition_time = prev.last_transition_time;
        }
    }
    condition
}

fn resolved_status(builder: &ClusterBuilder, image: &BuilderImage) -> ClusterBuilderStatus {
    ClusterBuilderStatus {
        conditions: vec![ready_condition(
            builder.status.as_ref(),
            ConditionStatus::True,
            REASON_RESOLVED,
            String::new(),
        )],
        observed_generation: builder.metadata.generation,
        builder_metadata: image.buildpacks.clone(),
        latest_image: Some(image.pinned_reference()),
    }
}

fn unavailable_status(builder: &ClusterBuilder, message: String) -> ClusterBuilderStatus {
    let previous = builder.status.clone().unwrap_or_default();
    ClusterBuilderStatus {
        conditions: vec![ready_condition(
            builder.status.as_ref(),
            ConditionStatus::False,
            reasons::METADATA_UNAVAILABLE,
            message,
        )],
        observed_generation: builder.metadata.generation,
        ..previous
    }
}

/// Reconcile a ClusterBuilder
///
/// On success the builder is Ready with its buildpacks and digest-pinned
/// image recorded. On failure it is marked not Ready (keeping the last
/// resolved image) and the error is returned for retry.
#[instrument(skip(builder, ctx), fields(builder = %builder.name_any(), image = %builder.spec.image))]
pub async fn reconcile(
    builder: Arc<ClusterBuilder>,
    ctx: Arc<BuilderContext>,
) -> Result<Action, BuilderError> {
    let name = builder.name_any();
    let image_ref = builder_image_ref(&builder, &ctx.system_namespace);

    match ctx.metadata.get_builder_image(&image_ref).await {
        Ok(image) => {
            let status = resolved_status(&builder, &image);
            let moved = builder.latest_image() != status.latest_image.as_deref();

            ctx.kube
                .patch_builder_status(&builder, &status)
                .await
                .map_err(BuilderError::UpdateStatus)?;

            if moved {
                info!(
                    latest_image = ?status.latest_image,
                    buildpacks = status.builder_metadata.len(),
                    "builder resolved"
                );
                ctx.events
                    .publish(
                        &builder.object_ref(&()),
                        EventType::Normal,
                        reasons::BUILDER_READY,
                        actions::FETCH_METADATA,
                        status
                            .latest_image
                            .as_ref()
                            .map(|i| format!("Resolved builder to {i}")),
                    )
                    .await;
            }

            ctx.backoff.reset(&name);
            Ok(Action::requeue(ctx.poll_interval))
        }
        Err(e) => {
            let status = unavailable_status(&builder, e.to_string());
            if let Err(patch_err) = ctx.kube.patch_builder_status(&builder, &status).await {
                warn!(error = %patch_err, "failed to record builder as not ready");
            }
            ctx.events
                .publish(
                    &builder.object_ref(&()),
                    EventType::Warning,
                    reasons::METADATA_UNAVAILABLE,
                    actions::FETCH_METADATA,
                    Some(e.to_string()),
                )
                .await;
            Err(BuilderError::Metadata(e))
        }
    }
}

/// Error policy for the ClusterBuilder controller
pub fn error_policy(
    builder: Arc<ClusterBuilder>,
    error: &BuilderError,
    ctx: Arc<BuilderContext>,
) -> Action {
    let name = builder.name_any();
    error!(%error, builder = %name, "builder reconciliation failed");

    if error.is_permanent() {
        // retry when the tag may have moved
        return Action::requeue(ctx.poll_interval);
    }
    Action::requeue(ctx.backoff.next_delay(&name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cnb_common::crd::{BuildpackMetadata, ClusterBuilderSpec, SecretReference};
    use cnb_common::events::NoopEventPublisher;
    use cnb_registry::RegistryError;
    use mockall::mock;
    use std::sync::Mutex;

    mock! {
        pub Retriever {}

        #[async_trait]
        impl BuilderImageRetriever for Retriever {
            async fn get_builder_image(&self, image: &ImageRef) -> Result<BuilderImage, RegistryError>;
        }
    }

    /// Records every status patch
    #[derive(Default)]
    struct StatusCapture {
        patches: Mutex<Vec<ClusterBuilderStatus>>,
    }

    impl StatusCapture {
        fn last(&self) -> ClusterBuilderStatus {
            self.patches.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl BuilderKubeClient for StatusCapture {
        async fn patch_builder_status(
            &self,
            _builder: &ClusterBuilder,
            status: &ClusterBuilderStatus,
        ) -> Result<(), cnb_common::Error> {
            self.patches.lock().unwrap().push(status.clone());
            Ok(())
        }
    }

    fn sample_builder() -> ClusterBuilder {
        let mut builder = ClusterBuilder::new(
            "default",
            ClusterBuilderSpec {
                image: "cloudfoundry/cnb:bionic".to_string(),
                image_pull_secrets: vec![SecretReference {
                    name: "hub-creds".to_string(),
                }],
            },
        );
        builder.metadata.generation = Some(3);
        builder.metadata.uid = Some("uid-cb".to_string());
        builder
    }

    fn builder_image(digest: &str) -> BuilderImage {
        BuilderImage {
            buildpacks: vec![
                BuildpackMetadata {
                    id: "io.buildpacks.samples.java".to_string(),
                    version: "0.0.1".to_string(),
                },
                BuildpackMetadata {
                    id: "io.buildpacks.samples.nodejs".to_string(),
                    version: "0.0.2".to_string(),
                },
            ],
            identifier: digest.to_string(),
            repository: "index.docker.io/cloudfoundry/cnb".to_string(),
        }
    }

    fn context(kube: Arc<StatusCapture>, retriever: MockRetriever) -> Arc<BuilderContext> {
        Arc::new(BuilderContext::new(
            kube,
            Arc::new(retriever),
            Arc::new(NoopEventPublisher),
            "cnb-system",
            DEFAULT_POLL_INTERVAL,
        ))
    }

    #[tokio::test]
    async fn resolved_builder_is_ready() {
        let kube = Arc::new(StatusCapture::default());
        let mut retriever = MockRetriever::new();
        retriever
            .expect_get_builder_image()
            .withf(|image| {
                image.image == "cloudfoundry/cnb:bionic"
                    && image.namespace == "cnb-system"
                    && image.pull_secrets == vec!["hub-creds".to_string()]
            })
            .times(1)
            .returning(|_| Ok(builder_image("sha256:abc")));

        let action = reconcile(Arc::new(sample_builder()), context(kube.clone(), retriever))
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(DEFAULT_POLL_INTERVAL));
        let status = kube.last();
        assert_eq!(
            status.latest_image.as_deref(),
            Some("index.docker.io/cloudfoundry/cnb@sha256:abc")
        );
        assert_eq!(status.builder_metadata.len(), 2);
        assert_eq!(status.observed_generation, Some(3));

        let mut builder = sample_builder();
        builder.status = Some(status);
        assert!(builder.ready());
    }

    #[tokio::test]
    async fn retrieval_failure_marks_builder_not_ready() {
        let kube = Arc::new(StatusCapture::default());
        let mut retriever = MockRetriever::new();
        retriever.expect_get_builder_image().returning(|image| {
            Err(RegistryError::LabelMissing {
                image: image.image.clone(),
                label: "io.buildpacks.builder.metadata".to_string(),
            })
        });

        let mut builder = sample_builder();
        builder.status = Some(ClusterBuilderStatus {
            latest_image: Some("index.docker.io/cloudfoundry/cnb@sha256:old".to_string()),
            ..Default::default()
        });

        let err = reconcile(Arc::new(builder.clone()), context(kube.clone(), retriever))
            .await
            .unwrap_err();

        assert!(err.is_permanent());
        let status = kube.last();
        let ready = find_condition(&status.conditions, CONDITION_READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, reasons::METADATA_UNAVAILABLE);
        assert!(ready.message.contains("io.buildpacks.builder.metadata"));
        assert_eq!(
            status.latest_image.as_deref(),
            Some("index.docker.io/cloudfoundry/cnb@sha256:old")
        );

        builder.status = Some(status);
        assert!(!builder.ready());
    }

    #[tokio::test]
    async fn unchanged_ready_condition_keeps_transition_time() {
        let kube = Arc::new(StatusCapture::default());
        let mut retriever = MockRetriever::new();
        retriever
            .expect_get_builder_image()
            .returning(|_| Ok(builder_image("sha256:abc")));
        let ctx = context(kube.clone(), retriever);

        reconcile(Arc::new(sample_builder()), ctx.clone()).await.unwrap();
        let first = kube.last();

        let mut builder = sample_builder();
        builder.status = Some(first.clone());
        reconcile(Arc::new(builder), ctx).await.unwrap();

        assert_eq!(
            kube.last().conditions[0].last_transition_time,
            first.conditions[0].last_transition_time
        );
    }

    #[tokio::test]
    async fn status_write_failure_is_returned() {
        let mut kube = MockBuilderKubeClient::new();
        kube.expect_patch_builder_status()
            .returning(|_, _| Err(cnb_common::Error::internal("apiserver down")));
        let mut retriever = MockRetriever::new();
        retriever
            .expect_get_builder_image()
            .returning(|_| Ok(builder_image("sha256:abc")));

        let ctx = Arc::new(BuilderContext::new(
            Arc::new(kube),
            Arc::new(retriever),
            Arc::new(NoopEventPublisher),
            "cnb-system",
            DEFAULT_POLL_INTERVAL,
        ));

        let err = reconcile(Arc::new(sample_builder()), ctx).await.unwrap_err();
        assert!(matches!(err, BuilderError::UpdateStatus(_)));
    }

    #[test]
    fn transient_errors_back_off() {
        let kube = Arc::new(StatusCapture::default());
        let ctx = context(kube, MockRetriever::new());
        let error = BuilderError::Metadata(RegistryError::resolve("cloudfoundry/cnb", "timeout"));

        error_policy(Arc::new(sample_builder()), &error, ctx.clone());
        assert_eq!(ctx.backoff.attempts("default"), 1);
    }

    #[test]
    fn permanent_errors_wait_for_next_poll() {
        let kube = Arc::new(StatusCapture::default());
        let ctx = context(kube, MockRetriever::new());
        let error = BuilderError::Metadata(RegistryError::LabelMissing {
            image: "cloudfoundry/cnb".to_string(),
            label: "io.buildpacks.builder.metadata".to_string(),
        });

        let action = error_policy(Arc::new(sample_builder()), &error, ctx.clone());
        assert_eq!(action, Action::requeue(DEFAULT_POLL_INTERVAL));
        assert_eq!(ctx.backoff.attempts("default"), 0);
    }
}
