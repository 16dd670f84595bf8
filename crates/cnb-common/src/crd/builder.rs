//! ClusterBuilder CRD types
//!
//! A cluster-wide builder image. The controller resolves the image tag to a
//! digest and records which buildpacks the builder packages.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    is_condition_true, BuildpackMetadata, Condition, SecretReference, CONDITION_READY,
};

/// Specification for a cluster-scoped builder image
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "build.cnb.dev",
    version = "v1alpha1",
    kind = "ClusterBuilder",
    plural = "clusterbuilders",
    shortname = "cb",
    status = "ClusterBuilderStatus",
    printcolumn = r#"{"name":"LatestImage","type":"string","jsonPath":".status.latestImage"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterBuilderSpec {
    /// Builder image reference, usually a moving tag
    pub image: String,

    /// Secrets in the controller's system namespace used to read the image
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<SecretReference>,
}

/// Observed state of a ClusterBuilder
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterBuilderStatus {
    /// Ready condition
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Generation of the spec the controller last acted on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Buildpacks packaged in the builder
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub builder_metadata: Vec<BuildpackMetadata>,

    /// Digest-pinned reference of the resolved builder image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_image: Option<String>,
}

impl ClusterBuilder {
    /// Ready when the Ready condition is true for the current generation
    pub fn ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| {
            is_condition_true(&s.conditions, CONDITION_READY)
                && s.observed_generation == self.metadata.generation
        })
    }

    /// Buildpacks recorded on the status, empty until first resolved
    pub fn buildpack_metadata(&self) -> &[BuildpackMetadata] {
        self.status
            .as_ref()
            .map(|s| s.builder_metadata.as_slice())
            .unwrap_or_default()
    }

    /// The digest-pinned image, if resolved
    pub fn latest_image(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.latest_image.as_deref())
    }

    /// Names of the pull secrets for the builder image
    pub fn pull_secret_names(&self) -> Vec<String> {
        self.spec
            .image_pull_secrets
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ConditionStatus;
    use kube::CustomResourceExt;

    fn builder_with_status(generation: i64, observed: i64, status: ConditionStatus) -> ClusterBuilder {
        let mut builder = ClusterBuilder::new(
            "default",
            ClusterBuilderSpec {
                image: "cloudfoundry/cnb:bionic".to_string(),
                image_pull_secrets: vec![],
            },
        );
        builder.metadata.generation = Some(generation);
        builder.status = Some(ClusterBuilderStatus {
            conditions: vec![Condition::new(CONDITION_READY, status, "", "")],
            observed_generation: Some(observed),
            builder_metadata: vec![BuildpackMetadata {
                id: "io.buildpacks.samples.java".to_string(),
                version: "0.0.1".to_string(),
            }],
            latest_image: Some("index.docker.io/cloudfoundry/cnb@sha256:abc".to_string()),
        });
        builder
    }

    #[test]
    fn ready_requires_true_condition_and_observed_generation() {
        assert!(builder_with_status(2, 2, ConditionStatus::True).ready());
        assert!(!builder_with_status(3, 2, ConditionStatus::True).ready());
        assert!(!builder_with_status(2, 2, ConditionStatus::False).ready());
    }

    #[test]
    fn accessors_read_status() {
        let builder = builder_with_status(1, 1, ConditionStatus::True);
        assert_eq!(builder.buildpack_metadata().len(), 1);
        assert_eq!(
            builder.latest_image(),
            Some("index.docker.io/cloudfoundry/cnb@sha256:abc")
        );
    }

    #[test]
    fn unresolved_builder_has_no_metadata() {
        let builder = ClusterBuilder::new("default", ClusterBuilderSpec::default());
        assert!(builder.buildpack_metadata().is_empty());
        assert!(builder.latest_image().is_none());
        assert!(!builder.ready());
    }

    #[test]
    fn crd_is_cluster_scoped() {
        let crd = ClusterBuilder::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.names.kind, "ClusterBuilder");
    }
}
