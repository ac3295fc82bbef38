//! Error types for the resource provider.

use thiserror::Error;

/// Errors from the resource lifecycle operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The mesh layer rejected the declaration or a peering failed.
    #[error("mesh: {0}")]
    Mesh(String),

    /// The mesh could not be brought up; it has been torn back down.
    #[error("failed to bring up mesh {mesh}")]
    CreateFailed {
        /// The mesh name.
        mesh: String,
    },

    /// The mesh document could not be read or parsed.
    #[error("mesh document: {0}")]
    Document(String),

    /// Result serialization failed.
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

impl From<wgmesh_core::MeshError> for ProviderError {
    fn from(e: wgmesh_core::MeshError) -> Self {
        Self::Mesh(e.to_string())
    }
}
