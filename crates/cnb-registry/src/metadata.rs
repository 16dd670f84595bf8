//! Buildpack metadata labels

use chrono::{DateTime, Utc};
use cnb_common::crd::BuildpackMetadata;
use serde::Deserialize;

use crate::error::RegistryError;
use crate::image::RemoteImage;

/// Label written on builder images listing the packaged buildpacks
pub const BUILDER_METADATA_LABEL: &str = "io.buildpacks.builder.metadata";

/// Label written by the lifecycle exporter on built app images
pub const APP_METADATA_LABEL: &str = "io.buildpacks.lifecycle.metadata";

/// A builder image and the buildpacks it packages
#[derive(Clone, Debug, PartialEq)]
pub struct BuilderImage {
    /// Buildpacks listed in the builder label
    pub buildpacks: Vec<BuildpackMetadata>,
    /// Content digest of the builder image (`sha256:...`)
    pub identifier: String,
    /// Fully qualified repository, e.g. `index.docker.io/cloudfoundry/cnb`
    pub repository: String,
}

impl BuilderImage {
    /// Digest-pinned reference to the builder image
    pub fn pinned_reference(&self) -> String {
        format!("{}@{}", self.repository, self.identifier)
    }
}

/// An app image produced by a build
#[derive(Clone, Debug, PartialEq)]
pub struct BuiltImage {
    /// Content digest of the app image (`sha256:...`)
    pub identifier: String,
    /// Creation time recorded in the image config, when the exporter set one
    pub completed_at: Option<DateTime<Utc>>,
    /// Buildpacks that contributed to the image
    pub buildpacks: Vec<BuildpackMetadata>,
}

#[derive(Deserialize)]
struct LabelMetadata {
    buildpacks: Vec<LabelBuildpack>,
}

#[derive(Deserialize)]
struct LabelBuildpack {
    // older lifecycles wrote `key`
    #[serde(alias = "key")]
    id: String,
    version: String,
}

/// Decode the buildpack list out of a metadata label value
///
/// Unknown fields are ignored; a missing `buildpacks` list or a buildpack
/// without `id`/`version` is rejected.
pub fn decode_buildpacks(value: &str) -> Result<Vec<BuildpackMetadata>, serde_json::Error> {
    let metadata: LabelMetadata = serde_json::from_str(value)?;
    Ok(metadata
        .buildpacks
        .into_iter()
        .map(|bp| BuildpackMetadata {
            id: bp.id,
            version: bp.version,
        })
        .collect())
}

/// Read and decode the named label from a fetched image
pub fn read_label(image: &RemoteImage, label: &str) -> Result<Vec<BuildpackMetadata>, RegistryError> {
    let value = image
        .labels
        .get(label)
        .ok_or_else(|| RegistryError::LabelMissing {
            image: image.reference.clone(),
            label: label.to_string(),
        })?;
    decode_buildpacks(value).map_err(|source| RegistryError::SchemaMismatch {
        image: image.reference.clone(),
        label: label.to_string(),
        source,
    })
}
