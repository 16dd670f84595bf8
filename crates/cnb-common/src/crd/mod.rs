//! Custom Resource Definitions
//!
//! - [`CnbBuild`] - a single buildpack build of a git source into an image
//! - [`ClusterBuilder`] - a builder image whose buildpack catalog is tracked
//! - [`BuildJob`] - the external multi-step job that executes a build

mod build;
mod builder;
mod job;
mod types;

pub use build::{CnbBuild, CnbBuildSpec, CnbBuildStatus};
pub use builder::{ClusterBuilder, ClusterBuilderSpec, ClusterBuilderStatus};
pub use job::{BuildJob, BuildJobSpec, BuildJobStatus, GitSourceSpec, SourceSpec};
pub use types::{
    find_condition, is_condition_true, BuildpackMetadata, Condition, ConditionStatus,
    SecretReference, CONDITION_READY, CONDITION_SUCCEEDED,
};
