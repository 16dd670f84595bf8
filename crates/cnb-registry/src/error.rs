//! Registry retrieval errors

use std::time::Duration;

use thiserror::Error;

/// Failure to read metadata from a remote image
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The image reference could not be parsed
    #[error("invalid image reference {image}: {message}")]
    InvalidReference {
        /// The reference as written
        image: String,
        /// Parser message
        message: String,
    },

    /// The registry could not serve the manifest or config (network, auth, not found)
    #[error("unable to fetch remote image {image}: {message}")]
    Resolve {
        /// The image being fetched
        image: String,
        /// Registry client message
        message: String,
    },

    /// The image config blob was not a valid image configuration
    #[error("invalid image config for {image}: {message}")]
    InvalidConfig {
        /// The image being inspected
        image: String,
        /// What was wrong with the config
        message: String,
    },

    /// The image has no label with the expected name
    #[error("metadata label {label} not present on {image}")]
    LabelMissing {
        /// The image being inspected
        image: String,
        /// Label name
        label: String,
    },

    /// The label value does not decode as buildpack metadata
    #[error("unsupported metadata structure in label {label} on {image}: {source}")]
    SchemaMismatch {
        /// The image being inspected
        image: String,
        /// Label name
        label: String,
        /// Decoder error
        #[source]
        source: serde_json::Error,
    },

    /// Pull secrets could not be read or parsed
    #[error("failed to load registry credentials from {secret}: {message}")]
    Credentials {
        /// `namespace/name` of the secret
        secret: String,
        /// What went wrong
        message: String,
    },

    /// The retrieval did not finish before its deadline
    #[error("fetching metadata for {image} timed out after {}s", after.as_secs())]
    Timeout {
        /// The image being fetched
        image: String,
        /// The deadline that was exceeded
        after: Duration,
    },
}

impl RegistryError {
    /// True when retrying cannot help until the image itself changes
    ///
    /// A missing or malformed label stays that way for a given digest.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            RegistryError::LabelMissing { .. } | RegistryError::SchemaMismatch { .. }
        )
    }

    /// Create a resolve error for the image
    pub fn resolve(image: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Resolve {
            image: image.into(),
            message: message.to_string(),
        }
    }

    /// Create an invalid-config error for the image
    pub fn invalid_config(image: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::InvalidConfig {
            image: image.into(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_problems_are_permanent() {
        let missing = RegistryError::LabelMissing {
            image: "app".to_string(),
            label: "io.buildpacks.lifecycle.metadata".to_string(),
        };
        assert!(missing.is_permanent());

        let source = serde_json::from_str::<Vec<u8>>("\"x\"").unwrap_err();
        let mismatch = RegistryError::SchemaMismatch {
            image: "app".to_string(),
            label: "l".to_string(),
            source,
        };
        assert!(mismatch.is_permanent());
    }

    #[test]
    fn transport_problems_are_transient() {
        assert!(!RegistryError::resolve("app", "connection refused").is_permanent());
        assert!(!RegistryError::Timeout {
            image: "app".to_string(),
            after: Duration::from_secs(30)
        }
        .is_permanent());
    }

    #[test]
    fn messages_carry_context() {
        let err = RegistryError::resolve("gcr.io/acme/app", "401 Unauthorized");
        assert_eq!(
            err.to_string(),
            "unable to fetch remote image gcr.io/acme/app: 401 Unauthorized"
        );
    }
}
