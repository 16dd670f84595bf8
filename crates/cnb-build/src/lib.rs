//! CnbBuild controller and build pipeline generator
//!
//! Turns a `CnbBuild` into a Knative build job running the buildpack
//! lifecycle, mirrors the job's outcome onto the build status, and records
//! the built image's buildpack metadata once the job succeeds.

pub mod controller;
pub mod error;
pub mod pipeline;

pub use controller::{error_policy, reconcile, BuildContext, BuildKey, BuildReconciler};
pub use error::BuildError;
pub use pipeline::{generate, LifecyclePhase};
