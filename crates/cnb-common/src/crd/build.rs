//! CnbBuild CRD types
//!
//! A `CnbBuild` asks for one buildpack build: a git source is built with a
//! builder image and pushed to a destination image. The controller runs the
//! build as a [`BuildJob`](super::BuildJob) and records provenance metadata
//! on the status once the job succeeds.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    is_condition_true, BuildpackMetadata, Condition, SecretReference, CONDITION_SUCCEEDED,
};

/// Specification for a single buildpack build
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "build.cnb.dev",
    version = "v1alpha1",
    kind = "CnbBuild",
    plural = "cnbbuilds",
    shortname = "cnbb",
    namespaced,
    status = "CnbBuildStatus",
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Succeeded","type":"string","jsonPath":".status.conditions[?(@.type==\"Succeeded\")].status"}"#,
    printcolumn = r#"{"name":"SHA","type":"string","jsonPath":".status.sha"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CnbBuildSpec {
    /// Git repository URL of the application source
    pub git_url: String,

    /// Git revision (branch, tag or commit) to build
    pub git_revision: String,

    /// Builder image carrying the buildpacks and lifecycle binaries
    pub builder: String,

    /// Destination image the build exports to
    pub image: String,

    /// Service account the build job runs as
    #[serde(default)]
    pub service_account: String,

    /// Secrets used to read the destination image from its registry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<SecretReference>,
}

/// Observed state of a CnbBuild
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CnbBuildStatus {
    /// Conditions copied from the build job
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Generation of the spec the controller last acted on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Buildpacks that ran, recorded when the build succeeded
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_metadata: Vec<BuildpackMetadata>,

    /// Content digest of the built image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

impl CnbBuild {
    /// Whether the build status already reports `Succeeded=True`
    pub fn succeeded(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| is_condition_true(&s.conditions, CONDITION_SUCCEEDED))
    }

    /// Names of the pull secrets for the destination image
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

    fn sample_spec() -> CnbBuildSpec {
        CnbBuildSpec {
            git_url: "https://github.com/buildpacks/samples".to_string(),
            git_revision: "main".to_string(),
            builder: "cloudfoundry/cnb:bionic".to_string(),
            image: "registry.example.com/apps/petclinic".to_string(),
            service_account: "builder".to_string(),
            image_pull_secrets: vec![SecretReference {
                name: "registry-creds".to_string(),
            }],
        }
    }

    #[test]
    fn spec_uses_camel_case_wire_names() {
        let value = serde_json::to_value(sample_spec()).unwrap();
        assert_eq!(value["gitUrl"], "https://github.com/buildpacks/samples");
        assert_eq!(value["gitRevision"], "main");
        assert_eq!(value["serviceAccount"], "builder");
        assert_eq!(value["imagePullSecrets"][0]["name"], "registry-creds");
    }

    #[test]
    fn new_build_has_not_succeeded() {
        let build = CnbBuild::new("petclinic", sample_spec());
        assert!(!build.succeeded());
    }

    #[test]
    fn succeeded_follows_status_condition() {
        let mut build = CnbBuild::new("petclinic", sample_spec());
        build.status = Some(CnbBuildStatus {
            conditions: vec![Condition::new(
                CONDITION_SUCCEEDED,
                ConditionStatus::True,
                "",
                "",
            )],
            ..Default::default()
        });
        assert!(build.succeeded());
    }

    #[test]
    fn pull_secret_names_are_listed() {
        let build = CnbBuild::new("petclinic", sample_spec());
        assert_eq!(build.pull_secret_names(), vec!["registry-creds".to_string()]);
    }

    #[test]
    fn crd_is_namespaced_with_status_subresource() {
        let crd = CnbBuild::crd();
        assert_eq!(crd.metadata.name.as_deref(), Some("cnbbuilds.build.cnb.dev"));
        assert_eq!(crd.spec.scope, "Namespaced");
        let version = &crd.spec.versions[0];
        assert!(version
            .subresources
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .is_some());
    }
}
