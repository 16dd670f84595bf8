//! Builder and built image metadata retrieval

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, instrument};

use crate::error::RegistryError;
use crate::image::{ImageRef, ImageSource, RemoteImage};
use crate::keychain::Keychain;
use crate::metadata::{read_label, BuilderImage, BuiltImage, APP_METADATA_LABEL, BUILDER_METADATA_LABEL};

/// Default deadline for one metadata retrieval
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads provenance metadata from an app image produced by a build
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BuiltImageRetriever: Send + Sync {
    /// Buildpacks, digest and creation time of the built image
    async fn get_built_image(&self, image: &ImageRef) -> Result<BuiltImage, RegistryError>;
}

/// Reads the buildpack catalog from a builder image
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BuilderImageRetriever: Send + Sync {
    /// Buildpacks and digest of the builder image
    async fn get_builder_image(&self, image: &ImageRef) -> Result<BuilderImage, RegistryError>;
}

/// Retriever reading labels from remote images without pulling layers
pub struct RemoteMetadataRetriever {
    source: Arc<dyn ImageSource>,
    keychain: Arc<dyn Keychain>,
    timeout: Duration,
}

impl RemoteMetadataRetriever {
    /// Create a retriever with the default deadline
    pub fn new(source: Arc<dyn ImageSource>, keychain: Arc<dyn Keychain>) -> Self {
        Self {
            source,
            keychain,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Bound each retrieval (credentials plus manifest and config) by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch(&self, image: &ImageRef) -> Result<RemoteImage, RegistryError> {
        let reference = image.parse()?;
        let fetch = async {
            let auth = self.keychain.resolve(image, reference.resolve_registry()).await?;
            self.source.fetch(&reference, auth).await
        };
        tokio::time::timeout(self.timeout, fetch)
            .await
            .map_err(|_| RegistryError::Timeout {
                image: image.image.clone(),
                after: self.timeout,
            })?
    }
}

#[async_trait]
impl BuiltImageRetriever for RemoteMetadataRetriever {
    #[instrument(skip(self), fields(image = %image.image))]
    async fn get_built_image(&self, image: &ImageRef) -> Result<BuiltImage, RegistryError> {
        let remote = self.fetch(image).await?;
        let buildpacks = read_label(&remote, APP_METADATA_LABEL)?;
        if remote.created.is_none() {
            debug!(image = %remote.reference, "image config has no creation time");
        }

        debug!(digest = %remote.digest, buildpacks = buildpacks.len(), "read built image metadata");
        Ok(BuiltImage {
            identifier: remote.digest,
            completed_at: remote.created,
            buildpacks,
        })
    }
}

#[async_trait]
impl BuilderImageRetriever for RemoteMetadataRetriever {
    #[instrument(skip(self), fields(image = %image.image))]
    async fn get_builder_image(&self, image: &ImageRef) -> Result<BuilderImage, RegistryError> {
        let remote = self.fetch(image).await?;
        let buildpacks = read_label(&remote, BUILDER_METADATA_LABEL)?;

        debug!(digest = %remote.digest, buildpacks = buildpacks.len(), "read builder image metadata");
        Ok(BuilderImage {
            buildpacks,
            identifier: remote.digest,
            repository: remote.repository,
        })
    }
}
