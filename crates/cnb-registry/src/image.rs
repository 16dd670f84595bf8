//! Remote image access over the OCI distribution protocol
//!
//! Only the manifest and the config blob are read. The config carries the
//! image labels and creation time; the manifest digest identifies the image.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use oci_distribution::client::{Client, ClientConfig, ClientProtocol};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::Reference;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::RegistryError;

/// An image to inspect and the credentials allowed for it
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageRef {
    /// Image reference as written by the user (tag or digest)
    pub image: String,
    /// Namespace the pull secrets live in
    pub namespace: String,
    /// Names of `dockerconfigjson` secrets to authenticate with
    pub pull_secrets: Vec<String>,
}

impl ImageRef {
    /// Create a reference without pull secrets
    pub fn new(image: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            namespace: namespace.into(),
            pull_secrets: Vec::new(),
        }
    }

    /// Attach pull secret names
    pub fn with_pull_secrets(mut self, secrets: Vec<String>) -> Self {
        self.pull_secrets = secrets;
        self
    }

    /// Parse into a distribution reference
    pub fn parse(&self) -> Result<Reference, RegistryError> {
        parse_reference(&self.image)
    }
}

/// Parse an image string, defaulting the registry to Docker Hub and the tag to `latest`
pub fn parse_reference(image: &str) -> Result<Reference, RegistryError> {
    Reference::try_from(image).map_err(|e| RegistryError::InvalidReference {
        image: image.to_string(),
        message: e.to_string(),
    })
}

/// Manifest digest and config of a remote image
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RemoteImage {
    /// Reference the image was fetched by
    pub reference: String,
    /// Fully qualified repository (`registry/repository`)
    pub repository: String,
    /// Manifest content digest
    pub digest: String,
    /// Creation time from the image config, if recorded
    pub created: Option<DateTime<Utc>>,
    /// Labels from the image config
    pub labels: HashMap<String, String>,
}

/// Source of remote image manifests and configs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Fetch manifest digest and config for `reference` without pulling layers
    async fn fetch(&self, reference: &Reference, auth: RegistryAuth)
        -> Result<RemoteImage, RegistryError>;
}

#[derive(Debug, Default, Deserialize)]
struct ImageConfigFile {
    #[serde(default)]
    created: Option<DateTime<Utc>>,
    #[serde(default)]
    config: ImageRuntimeConfig,
}

#[derive(Debug, Default, Deserialize)]
struct ImageRuntimeConfig {
    #[serde(rename = "Labels", default)]
    labels: Option<HashMap<String, String>>,
}

/// Parse an image config blob into a [`RemoteImage`]
pub(crate) fn remote_image_from_config(
    reference: &Reference,
    digest: String,
    config: &str,
) -> Result<RemoteImage, RegistryError> {
    let parsed: ImageConfigFile = serde_json::from_str(config)
        .map_err(|e| RegistryError::invalid_config(reference.whole(), e))?;
    Ok(RemoteImage {
        reference: reference.whole(),
        repository: format!("{}/{}", reference.resolve_registry(), reference.repository()),
        digest,
        created: parsed.created,
        labels: parsed.config.labels.unwrap_or_default(),
    })
}

/// [`ImageSource`] backed by an `oci-distribution` client
pub struct OciImageSource {
    client: Client,
}

impl OciImageSource {
    /// Create a source speaking HTTPS to every registry except `insecure` hosts
    pub fn new(insecure: Vec<String>) -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::HttpsExcept(insecure),
            ..Default::default()
        };
        Self {
            client: Client::new(config),
        }
    }
}

impl Default for OciImageSource {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl ImageSource for OciImageSource {
    #[instrument(skip(self, auth), fields(image = %reference))]
    async fn fetch(
        &self,
        reference: &Reference,
        auth: RegistryAuth,
    ) -> Result<RemoteImage, RegistryError> {
        let (manifest, digest, config) = self
            .client
            .pull_manifest_and_config(reference, &auth)
            .await
            .map_err(|e| RegistryError::resolve(reference.whole(), e))?;

        debug!(
            digest = %digest,
            layers = manifest.layers.len(),
            "fetched image manifest and config"
        );

        remote_image_from_config(reference, digest, &config)
    }
}
