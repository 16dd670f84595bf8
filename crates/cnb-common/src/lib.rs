//! Common types for the buildpack build controller: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group of the resources this controller owns
pub const API_GROUP: &str = "build.cnb.dev";

/// Default namespace for controller-wide resources (cluster builder pull secrets)
pub const DEFAULT_SYSTEM_NAMESPACE: &str = "cnb-system";

/// Field manager name used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "cnb-controller";
