//! Build job types (Knative `build.knative.dev/v1alpha1` Build)
//!
//! The job-execution API is installed separately; these types only mirror
//! the fields the controller writes and reads. A job runs its steps in
//! order as isolated containers that share the job's volumes, and reports
//! its outcome through a `Succeeded` condition.

use k8s_openapi::api::core::v1::{Container, Volume};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::types::{find_condition, Condition, CONDITION_SUCCEEDED};

/// Specification of a multi-step build job
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "build.knative.dev",
    version = "v1alpha1",
    kind = "Build",
    root = "BuildJob",
    derive = "PartialEq",
    namespaced,
    status = "BuildJobStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct BuildJobSpec {
    /// Service account the step pods run as
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account_name: String,

    /// Source fetched into `/workspace` before the first step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceSpec>,

    /// Steps, executed sequentially
    #[serde(default)]
    pub steps: Vec<Container>,

    /// Volumes shared by the steps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

/// Source of a build job
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SourceSpec {
    /// Git source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSourceSpec>,
}

/// Git repository checked out at a revision
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct GitSourceSpec {
    /// Repository URL
    pub url: String,
    /// Branch, tag or commit
    pub revision: String,
}

/// Status reported by the job-execution API
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildJobStatus {
    /// Conditions, including `Succeeded`
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl BuildJob {
    /// Conditions reported for the job, empty until the job starts
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    /// The `Succeeded` condition, if reported
    pub fn succeeded_condition(&self) -> Option<&Condition> {
        find_condition(self.conditions(), CONDITION_SUCCEEDED)
    }

    /// Whether the job finished successfully
    pub fn succeeded(&self) -> bool {
        self.succeeded_condition().is_some_and(Condition::is_true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ConditionStatus;

    #[test]
    fn status_from_job_api_deserializes() {
        let job: BuildJob = serde_json::from_value(serde_json::json!({
            "apiVersion": "build.knative.dev/v1alpha1",
            "kind": "Build",
            "metadata": {"name": "petclinic", "namespace": "apps"},
            "spec": {
                "serviceAccountName": "builder",
                "steps": [{"name": "detect", "image": "cloudfoundry/cnb:bionic"}]
            },
            "status": {
                "builder": "Cluster",
                "conditions": [{
                    "type": "Succeeded",
                    "status": "True",
                    "lastTransitionTime": "2019-03-01T10:00:00Z"
                }]
            }
        }))
        .unwrap();

        assert_eq!(job.spec.steps.len(), 1);
        assert!(job.succeeded());
    }

    #[test]
    fn job_without_status_has_not_succeeded() {
        let job = BuildJob::new("petclinic", BuildJobSpec::default());
        assert!(job.conditions().is_empty());
        assert!(job.succeeded_condition().is_none());
        assert!(!job.succeeded());
    }

    #[test]
    fn running_job_has_not_succeeded() {
        let mut job = BuildJob::new("petclinic", BuildJobSpec::default());
        job.status = Some(BuildJobStatus {
            conditions: vec![Condition::new(
                CONDITION_SUCCEEDED,
                ConditionStatus::Unknown,
                "Building",
                "",
            )],
        });
        assert!(!job.succeeded());
    }
}
