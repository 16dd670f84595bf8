//! Registry credentials from Kubernetes pull secrets
//!
//! Understands `kubernetes.io/dockerconfigjson` secrets (`.dockerconfigjson`
//! holding `{"auths": {...}}`) and legacy `kubernetes.io/dockercfg` secrets
//! (`.dockercfg` holding the bare map).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use oci_distribution::secrets::RegistryAuth;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::RegistryError;
use crate::image::ImageRef;

const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";
const DOCKER_CFG_KEY: &str = ".dockercfg";
const DOCKER_HUB: &str = "index.docker.io";
const DOCKER_HUB_ALIASES: &[&str] = &["docker.io", "index.docker.io", "registry-1.docker.io"];

/// Resolves credentials for an image's registry
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Keychain: Send + Sync {
    /// Credentials for `registry` from the image's pull secrets, anonymous if none match
    async fn resolve(&self, image: &ImageRef, registry: &str) -> Result<RegistryAuth, RegistryError>;
}

/// Always anonymous
pub struct AnonymousKeychain;

#[async_trait]
impl Keychain for AnonymousKeychain {
    async fn resolve(
        &self,
        _image: &ImageRef,
        _registry: &str,
    ) -> Result<RegistryAuth, RegistryError> {
        Ok(RegistryAuth::Anonymous)
    }
}

/// Reads pull secrets through the Kubernetes API
pub struct KubeKeychain {
    client: Client,
    timeout: Duration,
}

impl KubeKeychain {
    /// Create a keychain bounding each secret read by `timeout`
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl Keychain for KubeKeychain {
    #[instrument(skip(self, image), fields(namespace = %image.namespace))]
    async fn resolve(&self, image: &ImageRef, registry: &str) -> Result<RegistryAuth, RegistryError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &image.namespace);

        for name in &image.pull_secrets {
            let secret_id = format!("{}/{}", image.namespace, name);
            let secret = tokio::time::timeout(self.timeout, secrets.get(name))
                .await
                .map_err(|_| RegistryError::Credentials {
                    secret: secret_id.clone(),
                    message: format!("read timed out after {}s", self.timeout.as_secs()),
                })?
                .map_err(|e| RegistryError::Credentials {
                    secret: secret_id.clone(),
                    message: e.to_string(),
                })?;

            if let Some(auth) = credentials_from_secret(&secret, registry).map_err(|message| {
                RegistryError::Credentials {
                    secret: secret_id.clone(),
                    message,
                }
            })? {
                debug!(secret = %secret_id, registry, "using pull secret");
                return Ok(auth);
            }
        }

        Ok(RegistryAuth::Anonymous)
    }
}

#[derive(Debug, Default, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    auth: Option<String>,
}

/// Credentials for `registry` from a pull secret, `None` when it has no entry for it
pub fn credentials_from_secret(
    secret: &Secret,
    registry: &str,
) -> Result<Option<RegistryAuth>, String> {
    let Some(data) = secret.data.as_ref() else {
        return Ok(None);
    };

    let auths = if let Some(raw) = data.get(DOCKER_CONFIG_JSON_KEY) {
        serde_json::from_slice::<DockerConfig>(&raw.0)
            .map_err(|e| format!("invalid {DOCKER_CONFIG_JSON_KEY}: {e}"))?
            .auths
    } else if let Some(raw) = data.get(DOCKER_CFG_KEY) {
        serde_json::from_slice::<HashMap<String, DockerAuthEntry>>(&raw.0)
            .map_err(|e| format!("invalid {DOCKER_CFG_KEY}: {e}"))?
    } else {
        return Ok(None);
    };

    let wanted = normalize_registry(registry);
    match auths
        .into_iter()
        .find(|(server, _)| normalize_registry(server) == wanted)
    {
        Some((_, entry)) => entry_credentials(entry).map(Some),
        None => Ok(None),
    }
}

fn entry_credentials(entry: DockerAuthEntry) -> Result<RegistryAuth, String> {
    if let (Some(username), Some(password)) = (entry.username, entry.password) {
        return Ok(RegistryAuth::Basic(username, password));
    }
    match entry.auth {
        Some(encoded) => {
            let decoded = STANDARD
                .decode(encoded.trim())
                .map_err(|e| format!("auth is not base64: {e}"))?;
            let decoded =
                String::from_utf8(decoded).map_err(|e| format!("auth is not utf-8: {e}"))?;
            let (username, password) = decoded
                .split_once(':')
                .ok_or_else(|| "auth is not username:password".to_string())?;
            Ok(RegistryAuth::Basic(username.to_string(), password.to_string()))
        }
        None => Ok(RegistryAuth::Anonymous),
    }
}

/// Host part of a docker config server key, with Docker Hub aliases folded together
fn normalize_registry(server: &str) -> String {
    let host = server
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or_default()
        .to_lowercase();
    if DOCKER_HUB_ALIASES.contains(&host.as_str()) {
        DOCKER_HUB.to_string()
    } else {
        host
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret(key: &str, value: &str) -> Secret {
        Secret {
            data: Some(BTreeMap::from([(
                key.to_string(),
                ByteString(value.as_bytes().to_vec()),
            )])),
            ..Default::default()
        }
    }

    fn basic(auth: Option<RegistryAuth>) -> (String, String) {
        match auth {
            Some(RegistryAuth::Basic(user, pass)) => (user, pass),
            _ => panic!("expected basic credentials"),
        }
    }

    #[test]
    fn reads_username_and_password() {
        let s = secret(
            DOCKER_CONFIG_JSON_KEY,
            r#"{"auths":{"gcr.io":{"username":"_json_key","password":"secret"}}}"#,
        );
        assert_eq!(
            basic(credentials_from_secret(&s, "gcr.io").unwrap()),
            ("_json_key".to_string(), "secret".to_string())
        );
    }

    #[test]
    fn decodes_base64_auth() {
        let encoded = STANDARD.encode("robot:token:with:colons");
        let s = secret(
            DOCKER_CONFIG_JSON_KEY,
            &format!(r#"{{"auths":{{"registry.acme.io":{{"auth":"{encoded}"}}}}}}"#),
        );
        assert_eq!(
            basic(credentials_from_secret(&s, "registry.acme.io").unwrap()),
            ("robot".to_string(), "token:with:colons".to_string())
        );
    }

    #[test]
    fn matches_docker_hub_aliases() {
        let s = secret(
            DOCKER_CONFIG_JSON_KEY,
            r#"{"auths":{"https://index.docker.io/v1/":{"username":"u","password":"p"}}}"#,
        );
        assert!(credentials_from_secret(&s, "index.docker.io").unwrap().is_some());

        let s = secret(
            DOCKER_CONFIG_JSON_KEY,
            r#"{"auths":{"docker.io":{"username":"u","password":"p"}}}"#,
        );
        assert!(credentials_from_secret(&s, "index.docker.io").unwrap().is_some());
    }

    #[test]
    fn legacy_dockercfg_is_supported() {
        let s = secret(DOCKER_CFG_KEY, r#"{"quay.io":{"username":"u","password":"p"}}"#);
        assert!(credentials_from_secret(&s, "quay.io").unwrap().is_some());
    }

    #[test]
    fn other_registries_do_not_match() {
        let s = secret(
            DOCKER_CONFIG_JSON_KEY,
            r#"{"auths":{"gcr.io":{"username":"u","password":"p"}}}"#,
        );
        assert!(credentials_from_secret(&s, "quay.io").unwrap().is_none());
    }

    #[test]
    fn malformed_secret_is_an_error() {
        let s = secret(DOCKER_CONFIG_JSON_KEY, "not json");
        assert!(credentials_from_secret(&s, "gcr.io").is_err());
    }

    #[test]
    fn secret_without_docker_config_is_ignored() {
        let s = secret("token", "abc");
        assert!(credentials_from_secret(&s, "gcr.io").unwrap().is_none());
    }
}
