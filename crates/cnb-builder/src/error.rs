//! ClusterBuilder controller error types

use cnb_registry::RegistryError;

#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("failed to read builder image metadata: {0}")]
    Metadata(#[source] RegistryError),

    #[error("failed to update builder status: {0}")]
    UpdateStatus(#[source] cnb_common::Error),
}

impl BuilderError {
    /// Label problems persist until the builder tag moves
    pub fn is_permanent(&self) -> bool {
        matches!(self, BuilderError::Metadata(e) if e.is_permanent())
    }
}
