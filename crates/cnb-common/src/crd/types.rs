//! Shared types used across CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reported by build jobs and mirrored onto builds
pub const CONDITION_SUCCEEDED: &str = "Succeeded";

/// Condition type reported by cluster builders
pub const CONDITION_READY: &str = "Ready";

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
///
/// Build jobs report their outcome with this shape, and builds copy the
/// job's conditions over unchanged, so optional fields stay optional and
/// unset fields are not serialized.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., Succeeded, Ready)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Severity reported by the job-execution API for non-terminal conditions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,

    /// Machine-readable reason for the condition
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Last time the condition transitioned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            severity: None,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Some(Utc::now()),
        }
    }

    /// Whether this condition's status is `True`
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Find the condition of the given type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Whether the condition of the given type exists and is `True`
///
/// A missing condition counts as not true, the same as `Unknown`.
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(Condition::is_true)
}

/// One buildpack that is packaged in a builder or ran during a build
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct BuildpackMetadata {
    /// Buildpack identifier (e.g. `io.buildpacks.samples.java`)
    pub id: String,
    /// Buildpack version
    pub version: String,
}

/// Reference to a secret in the same namespace as the referencing resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SecretReference {
    /// Name of the secret
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_unknown() {
        assert_eq!(ConditionStatus::default(), ConditionStatus::Unknown);
    }

    #[test]
    fn missing_condition_is_not_true() {
        assert!(!is_condition_true(&[], CONDITION_SUCCEEDED));
    }

    #[test]
    fn only_true_status_counts() {
        let unknown = Condition::new(CONDITION_SUCCEEDED, ConditionStatus::Unknown, "Building", "");
        let failed = Condition::new(CONDITION_SUCCEEDED, ConditionStatus::False, "Failed", "");
        let done = Condition::new(CONDITION_SUCCEEDED, ConditionStatus::True, "", "");

        assert!(!is_condition_true(&[unknown], CONDITION_SUCCEEDED));
        assert!(!is_condition_true(&[failed], CONDITION_SUCCEEDED));
        assert!(is_condition_true(&[done], CONDITION_SUCCEEDED));
    }

    #[test]
    fn lookup_is_by_type() {
        let ready = Condition::new(CONDITION_READY, ConditionStatus::True, "", "");
        let conditions = vec![ready];
        assert!(find_condition(&conditions, CONDITION_READY).is_some());
        assert!(!is_condition_true(&conditions, CONDITION_SUCCEEDED));
    }

    #[test]
    fn job_condition_round_trips_unchanged() {
        let raw = serde_json::json!({
            "type": "Succeeded",
            "status": "False",
            "reason": "BuildStepFailed",
            "message": "step \"build\" exited with code 1",
            "lastTransitionTime": "2019-03-01T10:00:00Z"
        });

        let condition: Condition = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(serde_json::to_value(&condition).unwrap(), raw);
    }

    #[test]
    fn sparse_condition_deserializes() {
        let condition: Condition =
            serde_json::from_value(serde_json::json!({"type": "Succeeded", "status": "Unknown"}))
                .unwrap();
        assert!(condition.reason.is_empty());
        assert!(condition.last_transition_time.is_none());
    }
}
