//! Registry metadata retrieval for buildpack images
//!
//! Reads image manifests and config blobs over the OCI distribution
//! protocol (layers are never fetched) and decodes the buildpack metadata
//! labels written by the builder and the lifecycle exporter.

#![deny(missing_docs)]

pub mod error;
pub mod image;
pub mod keychain;
pub mod metadata;
pub mod retriever;

pub use error::RegistryError;
pub use image::{ImageRef, ImageSource, OciImageSource, RemoteImage};
pub use keychain::{AnonymousKeychain, Keychain, KubeKeychain};
pub use metadata::{BuilderImage, BuiltImage, APP_METADATA_LABEL, BUILDER_METADATA_LABEL};
pub use retriever::{BuilderImageRetriever, BuiltImageRetriever, RemoteMetadataRetriever};

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
