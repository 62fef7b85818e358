//! Thin wrapper around the `object_store` crate for artifact uploads. `object_store` already
//! provides the pluggable-backend abstraction this needs, so we configure its `LocalFileSystem`
//! backend (or a remote one via URL) directly instead of hand-rolling a trait layer over it.

use bytes::Bytes;
use object_store::{local::LocalFileSystem, ObjectStore as ObjStore};
use std::sync::Arc;
use thiserror::Error;

use crate::conf::config::ObjectStore as ObjectStoreConfig;
use crate::models::ArtifactFile;

#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("object store backend error: {0}")]
    Backend(#[from] object_store::Error),
    #[error("io failure reading '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct ObjectStore {
    inner: Arc<dyn ObjStore>,
}

impl ObjectStore {
    pub fn new(config: &ObjectStoreConfig) -> Result<Self, ObjectStoreError> {
        let inner: Arc<dyn ObjStore> = match &config.url {
            Some(url) => {
                let (store, _) = object_store::parse_url(&url.parse().expect("validated at config load"))?;
                Arc::from(store)
            }
            None => {
                std::fs::create_dir_all(&config.root).map_err(|source| ObjectStoreError::Read {
                    path: config.root.clone(),
                    source,
                })?;
                Arc::new(LocalFileSystem::new_with_prefix(&config.root)?)
            }
        };

        Ok(Self { inner })
    }

    /// Upload the file at `local_path` under `<run_id>/<relative_path>`, resolving a
    /// content type from the file's extension, and return its artifact descriptor.
    pub async fn upload(
        &self,
        run_id: &str,
        relative_path: &str,
        local_path: &std::path::Path,
    ) -> Result<ArtifactFile, ObjectStoreError> {
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|source| ObjectStoreError::Read {
                path: local_path.display().to_string(),
                source,
            })?;

        let key = format!("{run_id}/{relative_path}");
        let content_type = mime_guess::from_path(relative_path)
            .first_or_octet_stream()
            .to_string();

        let path = object_store::path::Path::from(key.as_str());
        self.inner
            .put(&path, object_store::PutPayload::from_bytes(Bytes::from(bytes)))
            .await?;

        Ok(ArtifactFile {
            path: relative_path.to_string(),
            content_type,
        })
    }
}
