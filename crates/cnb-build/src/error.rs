//! Build controller error types

use cnb_registry::RegistryError;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("cannot generate build job: {0}")]
    Generate(String),

    #[error("failed to get build: {0}")]
    GetBuild(#[source] cnb_common::Error),

    #[error("failed to get build job: {0}")]
    GetJob(#[source] cnb_common::Error),

    #[error("failed to create build job: {0}")]
    CreateJob(#[source] cnb_common::Error),

    #[error("failed to read built image metadata: {0}")]
    Metadata(#[source] RegistryError),

    #[error("failed to update build status: {0}")]
    UpdateStatus(#[source] cnb_common::Error),
}

impl BuildError {
    /// Whether a plain retry can succeed
    ///
    /// A malformed key or a build that cannot be turned into a job needs a
    /// spec change. Everything else is worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BuildError::InvalidKey { .. } | BuildError::Generate(_))
    }

    /// Registry metadata that will stay unreadable for this image digest
    pub fn is_permanent_metadata(&self) -> bool {
        matches!(self, BuildError::Metadata(e) if e.is_permanent())
    }

    /// Status write lost an optimistic concurrency race
    pub fn is_conflict(&self) -> bool {
        matches!(self, BuildError::UpdateStatus(e) if e.is_conflict())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn context_phrase_is_prepended() {
        let err = BuildError::CreateJob(cnb_common::Error::internal("quota exceeded"));
        assert_eq!(
            err.to_string(),
            "failed to create build job: internal error [unknown]: quota exceeded"
        );
    }

    #[test]
    fn cause_is_preserved() {
        use std::error::Error as _;
        let err = BuildError::Metadata(RegistryError::resolve("app", "503"));
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("unable to fetch remote image app: 503"));
    }

    #[test]
    fn classification() {
        assert!(!BuildError::Generate("no uid".to_string()).is_retryable());
        assert!(BuildError::GetJob(cnb_common::Error::timeout("get", Duration::from_secs(1)))
            .is_retryable());

        let missing = BuildError::Metadata(RegistryError::LabelMissing {
            image: "app".to_string(),
            label: "l".to_string(),
        });
        assert!(missing.is_retryable());
        assert!(missing.is_permanent_metadata());
    }
}
