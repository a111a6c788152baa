//! File Principal Provider
//!
//! Serves the user principal from a JSON file, re-read on every request so
//! that an external refresher can rotate the streamer token in place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::application::ports::{
    PrincipalError, PrincipalProvider, PrincipalRequest, StreamerPrincipal,
};

/// Reads the principal from disk.
#[derive(Debug, Clone)]
pub struct FilePrincipalProvider {
    path: PathBuf,
}

impl FilePrincipalProvider {
    /// Serve the principal stored at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PrincipalProvider for FilePrincipalProvider {
    async fn get_principal(
        &self,
        request: &PrincipalRequest,
    ) -> Result<StreamerPrincipal, PrincipalError> {
        tracing::debug!(path = %self.path.display(), fields = ?request.fields, "Loading principal");
        let body = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            PrincipalError::Unavailable(format!("{}: {e}", self.path.display()))
        })?;
        serde_json::from_str(&body)
            .map_err(|e| PrincipalError::Malformed(format!("{}: {e}", self.path.display())))
    }
}
