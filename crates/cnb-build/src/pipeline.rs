//! Build pipeline template generator
//!
//! Expands a `CnbBuild` into a Knative build job whose steps run the
//! buildpack lifecycle in order:
//!
//! prepare → detect → restore → analyze → build → export → cache
//!
//! All steps share two `emptyDir` volumes: `layers` (lifecycle working state)
//! and `cache` (restored and saved build cache). Generation is pure: the same
//! build always yields the same job.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, EmptyDirVolumeSource, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

use cnb_common::crd::{BuildJob, BuildJobSpec, CnbBuild, GitSourceSpec, SourceSpec};
use cnb_common::API_GROUP;

use crate::error::BuildError;

/// Utility image used to fix volume ownership before the lifecycle runs
pub const PREPARE_IMAGE: &str = "alpine";
/// User and group the lifecycle binaries run as in the builder image
pub const LIFECYCLE_UID: u32 = 1000;
/// Volume holding lifecycle layers, group and plan
pub const LAYERS_VOLUME: &str = "layers";
/// Volume holding the build cache
pub const CACHE_VOLUME: &str = "cache";
/// Label linking a build job to its build
pub const BUILD_NAME_LABEL: &str = "build.cnb.dev/build";

const LAYERS_DIR: &str = "/layers";
const CACHE_DIR: &str = "/cache";
const PULL_ALWAYS: &str = "Always";

/// One step of the buildpack lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Fix ownership of the shared directories
    Prepare,
    /// Select the buildpacks that apply to the source
    Detect,
    /// Restore cached layers
    Restore,
    /// Read layer metadata from the previous image
    Analyze,
    /// Run the buildpacks
    Build,
    /// Export the app image to the registry
    Export,
    /// Save layers to the cache
    Cache,
}

impl LifecyclePhase {
    /// Every phase in execution order
    pub const ALL: [LifecyclePhase; 7] = [
        LifecyclePhase::Prepare,
        LifecyclePhase::Detect,
        LifecyclePhase::Restore,
        LifecyclePhase::Analyze,
        LifecyclePhase::Build,
        LifecyclePhase::Export,
        LifecyclePhase::Cache,
    ];

    /// Step name in the job
    pub fn name(self) -> &'static str {
        match self {
            LifecyclePhase::Prepare => "prepare",
            LifecyclePhase::Detect => "detect",
            LifecyclePhase::Restore => "restore",
            LifecyclePhase::Analyze => "analyze",
            LifecyclePhase::Build => "build",
            LifecyclePhase::Export => "export",
            LifecyclePhase::Cache => "cache",
        }
    }

    /// Whether the step needs the cache volume besides `layers`
    fn mounts_cache(self) -> bool {
        matches!(
            self,
            LifecyclePhase::Prepare | LifecyclePhase::Restore | LifecyclePhase::Cache
        )
    }

    fn command(self) -> &'static str {
        match self {
            LifecyclePhase::Prepare => "/bin/sh",
            LifecyclePhase::Detect => "/lifecycle/detector",
            LifecyclePhase::Restore => "/lifecycle/restorer",
            LifecyclePhase::Analyze => "/lifecycle/analyzer",
            LifecyclePhase::Build => "/lifecycle/builder",
            LifecyclePhase::Export => "/lifecycle/exporter",
            LifecyclePhase::Cache => "/lifecycle/cacher",
        }
    }

    fn args(self, image: &str) -> Vec<String> {
        match self {
            LifecyclePhase::Prepare => vec!["-c".into(), prepare_script()],
            LifecyclePhase::Detect => vec![
                "-app=/workspace".into(),
                "-group=/layers/group.toml".into(),
                "-plan=/layers/plan.toml".into(),
            ],
            LifecyclePhase::Restore | LifecyclePhase::Cache => vec![
                "-group=/layers/group.toml".into(),
                "-layers=/layers".into(),
                "-path=/cache".into(),
            ],
            LifecyclePhase::Analyze => vec![
                "-layers=/layers".into(),
                "-helpers=false".into(),
                "-group=/layers/group.toml".into(),
                image.into(),
            ],
            LifecyclePhase::Build => vec![
                "-layers=/layers".into(),
                "-app=/workspace".into(),
                "-group=/layers/group.toml".into(),
                "-plan=/layers/plan.toml".into(),
            ],
            LifecyclePhase::Export => vec![
                "-layers=/layers".into(),
                "-helpers=false".into(),
                "-app=/workspace".into(),
                "-group=/layers/group.toml".into(),
                image.into(),
            ],
        }
    }

    /// Container for this step of `build`
    fn container(self, builder: &str, image: &str) -> Container {
        let step_image = match self {
            LifecyclePhase::Prepare => PREPARE_IMAGE,
            _ => builder,
        };

        let mut mounts = vec![volume_mount(LAYERS_VOLUME, LAYERS_DIR)];
        if self.mounts_cache() {
            mounts.push(volume_mount(CACHE_VOLUME, CACHE_DIR));
        }

        Container {
            name: self.name().to_string(),
            image: Some(step_image.to_string()),
            command: Some(vec![self.command().to_string()]),
            args: Some(self.args(image)),
            volume_mounts: Some(mounts),
            image_pull_policy: Some(PULL_ALWAYS.to_string()),
            ..Default::default()
        }
    }
}

fn prepare_script() -> String {
    ["/builder/home", LAYERS_DIR, CACHE_DIR, "/workspace"]
        .iter()
        .map(|dir| format!("chown -R \"{LIFECYCLE_UID}:{LIFECYCLE_UID}\" {dir}"))
        .collect::<Vec<_>>()
        .join(" &&\n")
}

fn volume_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

/// Generate the build job for a build
///
/// The job has the build's name and namespace and a controller owner
/// reference to it, so it is garbage collected with the build. Fails when
/// the build has not been persisted yet (no namespace or uid).
pub fn generate(build: &CnbBuild) -> Result<BuildJob, BuildError> {
    let name = build.name_any();
    let namespace = build
        .namespace()
        .ok_or_else(|| BuildError::Generate(format!("build {name} has no namespace")))?;
    let owner = build
        .controller_owner_ref(&())
        .ok_or_else(|| BuildError::Generate(format!("build {name} has no uid")))?;

    let spec = &build.spec;
    let steps = LifecyclePhase::ALL
        .iter()
        .map(|phase| phase.container(&spec.builder, &spec.image))
        .collect();

    Ok(BuildJob {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace),
            labels: Some(BTreeMap::from([(BUILD_NAME_LABEL.to_string(), name)])),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: BuildJobSpec {
            service_account_name: spec.service_account.clone(),
            source: Some(SourceSpec {
                git: Some(GitSourceSpec {
                    url: spec.git_url.clone(),
                    revision: spec.git_revision.clone(),
                }),
            }),
            steps,
            volumes: vec![empty_dir(LAYERS_VOLUME), empty_dir(CACHE_VOLUME)],
        },
        status: None,
    })
}

/// True when `job` is controlled by a build of this API group
pub fn is_owned_by_build(job: &BuildJob, build: &CnbBuild) -> bool {
    let uid = build.metadata.uid.as_deref();
    job.owner_references().iter().any(|o| {
        o.controller == Some(true)
            && o.api_version.starts_with(API_GROUP)
            && o.kind == "CnbBuild"
            && Some(o.uid.as_str()) == uid
    })
}
