//! Buildpack build operator: configuration, CRD installation and controller wiring

#![deny(missing_docs)]

/// Command line and environment configuration
pub mod config;
/// Builds the controller futures
pub mod controller_runner;
/// CRD manifests and installation
pub mod crds;
