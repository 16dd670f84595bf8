//! CRDs owned by the operator
//!
//! The external build job resource belongs to the job-execution system and
//! is never installed here.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};
use tracing::info;

use cnb_common::crd::{ClusterBuilder, CnbBuild};
use cnb_common::retry::{retry_with_backoff, RetryConfig};
use cnb_common::FIELD_MANAGER;

const INSTALL_ATTEMPTS: u32 = 5;

struct CrdDef {
    name: &'static str,
    crd: CustomResourceDefinition,
}

fn operator_crds() -> Vec<CrdDef> {
    vec![
        CrdDef {
            name: "cnbbuilds.build.cnb.dev",
            crd: CnbBuild::crd(),
        },
        CrdDef {
            name: "clusterbuilders.build.cnb.dev",
            crd: ClusterBuilder::crd(),
        },
    ]
}

/// All operator CRDs as a multi-document YAML stream
pub fn crd_yaml() -> anyhow::Result<String> {
    let docs = operator_crds()
        .iter()
        .map(|def| serde_yaml::to_string(&def.crd))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {}", e))?;
    Ok(docs.join("---\n"))
}

/// Install or update the operator CRDs using server-side apply
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let retry = RetryConfig::with_max_attempts(INSTALL_ATTEMPTS);

    for def in operator_crds() {
        info!("Installing {} CRD...", def.name);
        let (crds, params, def) = (&crds, &params, &def);
        retry_with_backoff(&retry, def.name, move || async move {
            crds.patch(def.name, params, &Patch::Apply(&def.crd)).await
        })
        .await
        .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }

    info!("CRDs installed/updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crd_names_match_generated_metadata() {
        for def in operator_crds() {
            assert_eq!(def.crd.metadata.name.as_deref(), Some(def.name));
        }
    }

    #[test]
    fn builder_is_cluster_scoped() {
        assert_eq!(CnbBuild::crd().spec.scope, "Namespaced");
        assert_eq!(ClusterBuilder::crd().spec.scope, "Cluster");
    }

    #[test]
    fn yaml_contains_both_crds() {
        let yaml = crd_yaml().unwrap();
        assert_eq!(yaml.matches("kind: CustomResourceDefinition").count(), 2);
        assert!(yaml.contains("name: cnbbuilds.build.cnb.dev"));
        assert!(yaml.contains("name: clusterbuilders.build.cnb.dev"));
        assert!(yaml.contains("\n---\n"));
    }
}
