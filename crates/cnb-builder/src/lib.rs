//! ClusterBuilder controller
//!
//! Resolves each cluster builder's image tag to a digest and records the
//! buildpacks the builder packages, re-polling so moved tags are noticed.

pub mod controller;
pub mod error;

pub use controller::{builder_image_ref, error_policy, reconcile, BuilderContext};
pub use error::BuilderError;
