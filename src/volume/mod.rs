//! The Volume Manager: a scoped per-run working directory on the host, bind-mounted into the
//! run's container at a fixed guest path.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::ArtifactFile;

#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("path '{0}' escapes the run directory")]
    PathEscape(String),
    #[error("io failure on '{path}': {source}")]
    IOFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A `{host, guest}` descriptor suitable for a container bind mount.
#[derive(Debug, Clone)]
pub struct Mount {
    pub host: PathBuf,
    pub guest: String,
}

/// A scoped working directory for a single run.
#[derive(Clone)]
pub struct Volume {
    host: PathBuf,
    guest: String,
}

impl Volume {
    /// Allocate `<base>/<run_id>/`, creating it if absent.
    pub fn new(base: &Path, run_id: &str, guest: impl Into<String>) -> Result<Self, VolumeError> {
        let host = base.join(run_id);
        std::fs::create_dir_all(&host).map_err(|source| VolumeError::IOFailure {
            path: host.display().to_string(),
            source,
        })?;

        Ok(Self { host, guest: guest.into() })
    }

    pub fn host(&self) -> &Path {
        &self.host
    }

    pub fn guest(&self) -> &str {
        &self.guest
    }

    /// Write (overwriting) a UTF-8 file at `host/path`. `path` must be relative and must not
    /// escape the run directory via `..` components.
    pub fn write(&self, path: &str, content: &str) -> Result<(), VolumeError> {
        let target = self.resolve(path)?;

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|source| VolumeError::IOFailure {
                path: parent.display().to_string(),
                source,
            })?;
        }

        std::fs::write(&target, content).map_err(|source| VolumeError::IOFailure {
            path: target.display().to_string(),
            source,
        })
    }

    /// Read a UTF-8 file's contents from `host/path`.
    pub fn read(&self, path: &str) -> Result<String, VolumeError> {
        let target = self.resolve(path)?;

        std::fs::read_to_string(&target).map_err(|source| VolumeError::IOFailure {
            path: target.display().to_string(),
            source,
        })
    }

    /// The `{host, guest}` descriptor handed to the Container Executor.
    pub fn mount(&self) -> Mount {
        Mount {
            host: self.host.clone(),
            guest: self.guest.clone(),
        }
    }

    /// Enumerate every regular file under `host`, upload each to `store`, and return the
    /// descriptors that succeeded. Per-file failures are logged and skipped; if every upload
    /// fails the result is an empty list rather than an error.
    pub async fn upload_files_to_object_store(
        &self,
        store: &crate::objectstore::ObjectStore,
        run_id: &str,
    ) -> Vec<ArtifactFile> {
        let mut files = Vec::new();
        self.collect_files(&self.host, &mut files);

        let mut uploaded = Vec::with_capacity(files.len());
        for absolute in files {
            let relative = match absolute.strip_prefix(&self.host) {
                Ok(rel) => rel.to_string_lossy().into_owned(),
                Err(_) => continue,
            };

            match store.upload(run_id, &relative, &absolute).await {
                Ok(artifact) => uploaded.push(artifact),
                Err(err) => warn!(path = %relative, error = %err, "artifact upload failed, skipping"),
            }
        }

        if uploaded.is_empty() {
            debug!(run_id, "no artifacts uploaded for run");
        }

        uploaded
    }

    fn collect_files(&self, dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.collect_files(&path, out);
            } else if path.is_file() {
                out.push(path);
            }
        }
    }

    /// Recursively remove the run directory. Only called outside development mode.
    pub fn cleanup(&self) -> Result<(), VolumeError> {
        match std::fs::remove_dir_all(&self.host) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(VolumeError::IOFailure {
                path: self.host.display().to_string(),
                source,
            }),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, VolumeError> {
        let relative = Path::new(path);

        if relative.is_absolute() || relative.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(VolumeError::PathEscape(path.to_string()));
        }

        Ok(self.host.join(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let volume = Volume::new(dir.path(), "run-1", "/workspace").unwrap();

        volume.write("nested/out.txt", "hello").unwrap();
        assert_eq!(volume.read("nested/out.txt").unwrap(), "hello");
    }

    #[test]
    fn rejects_parent_dir_escape() {
        let dir = tempfile::tempdir().unwrap();
        let volume = Volume::new(dir.path(), "run-1", "/workspace").unwrap();

        let err = volume.write("../escape.txt", "x").unwrap_err();
        assert!(matches!(err, VolumeError::PathEscape(_)));
    }

    #[test]
    fn mount_reports_guest_path() {
        let dir = tempfile::tempdir().unwrap();
        let volume = Volume::new(dir.path(), "run-1", "/workspace").unwrap();
        let mount = volume.mount();
        assert_eq!(mount.guest, "/workspace");
        assert!(mount.host.ends_with("run-1"));
    }

    #[test]
    fn cleanup_removes_the_run_directory() {
        let dir = tempfile::tempdir().unwrap();
        let volume = Volume::new(dir.path(), "run-1", "/workspace").unwrap();
        volume.write("a.txt", "x").unwrap();

        volume.cleanup().unwrap();
        assert!(!volume.host().exists());
    }
}
