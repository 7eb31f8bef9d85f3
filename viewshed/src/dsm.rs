//! Locating the configured Digital Surface Model.
//!
//! The DSM is never opened for parsing here. The locator only confirms that
//! the configured file is present and readable at the time of the request,
//! since the file may be replaced between requests.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{Result, ViewshedError};

/// A DSM file confirmed present for the current request.
#[derive(Debug, Clone)]
pub struct DsmReference {
    /// Path handed to the engine.
    pub path: PathBuf,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Last modification time, if the platform reports one.
    pub modified: Option<SystemTime>,
}

/// Resolves the process-wide DSM path to a file on disk.
#[derive(Debug, Clone)]
pub struct DsmLocator {
    path: PathBuf,
}

impl DsmLocator {
    /// Create a locator for the given DSM path.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The configured DSM path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Confirm the DSM exists and can be opened for reading.
    ///
    /// # Errors
    ///
    /// Returns [`ViewshedError::DsmNotFound`] if the path is missing, is not a
    /// regular file, or cannot be opened.
    pub async fn locate(&self) -> Result<DsmReference> {
        let not_found = || ViewshedError::DsmNotFound {
            path: self.path.clone(),
        };

        let metadata = tokio::fs::metadata(&self.path).await.map_err(|e| {
            tracing::debug!(path = %self.path.display(), error = %e, "DSM metadata unavailable");
            not_found()
        })?;

        if !metadata.is_file() {
            tracing::debug!(path = %self.path.display(), "DSM path is not a regular file");
            return Err(not_found());
        }

        tokio::fs::File::open(&self.path).await.map_err(|e| {
            tracing::debug!(path = %self.path.display(), error = %e, "DSM file is not readable");
            not_found()
        })?;

        Ok(DsmReference {
            path: self.path.clone(),
            size_bytes: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }

    /// Whether the DSM is currently available.
    pub async fn is_available(&self) -> bool {
        self.locate().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_locate_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dsm.tif");
        fs::write(&path, b"II*\0fake").unwrap();

        let reference = DsmLocator::new(&path).locate().await.unwrap();
        assert_eq!(reference.path, path);
        assert_eq!(reference.size_bytes, 8);
    }

    #[tokio::test]
    async fn test_locate_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let locator = DsmLocator::new(temp_dir.path().join("missing.tif"));

        let result = locator.locate().await;
        assert!(matches!(result, Err(ViewshedError::DsmNotFound { .. })));
        assert!(!locator.is_available().await);
    }

    #[tokio::test]
    async fn test_locate_directory_is_not_a_dsm() {
        let temp_dir = TempDir::new().unwrap();
        let result = DsmLocator::new(temp_dir.path()).locate().await;
        assert!(matches!(result, Err(ViewshedError::DsmNotFound { .. })));
    }

    #[tokio::test]
    async fn test_file_replaced_between_requests() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dsm.tif");
        let locator = DsmLocator::new(&path);

        assert!(!locator.is_available().await);
        fs::write(&path, b"data").unwrap();
        assert!(locator.is_available().await);
        fs::remove_file(&path).unwrap();
        assert!(!locator.is_available().await);
    }
}
