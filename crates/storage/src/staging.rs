//! Private staging files for in-flight uploads.
//!
//! An upload is written to a uniquely named file in the staging directory
//! while its digests accumulate. The file is owner-only and is deleted on
//! abort or drop, so a cancelled or failed upload never leaves data behind.
//! Once the digests are verified, [`StagingFile::finish`] hands ownership to
//! the promotion step as a [`StagedFile`].

use crate::error::{StorageError, StorageResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// A staging file still receiving data.
#[derive(Debug)]
pub struct StagingFile {
    file: Option<fs::File>,
    path: PathBuf,
    bytes_written: u64,
    armed: bool,
}

impl StagingFile {
    /// Create a new staging file in `dir`, creating the directory if needed.
    pub async fn create(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await?;
        }

        let path = dir.join(format!("upload-{}.part", Uuid::new_v4()));
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);
        let file = options.open(&path).await?;

        tracing::debug!(path = %path.display(), "Staging file created");
        Ok(Self {
            file: Some(file),
            path,
            bytes_written: 0,
            armed: true,
        })
    }

    /// Append data.
    pub async fn write(&mut self, data: &[u8]) -> StorageResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StorageError::InvalidPath("staging file is closed".to_string()))?;
        file.write_all(data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and fsync, transferring ownership of the file to the caller.
    pub async fn finish(mut self) -> StorageResult<StagedFile> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        self.armed = false;
        Ok(StagedFile {
            path: std::mem::take(&mut self.path),
            size: self.bytes_written,
            armed: true,
        })
    }

    /// Close and delete the file.
    pub async fn abort(mut self) -> StorageResult<()> {
        drop(self.file.take());
        self.armed = false;
        remove_if_exists(&self.path).await
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// A complete, synced staging file awaiting promotion.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    size: u64,
    armed: bool,
}

impl StagedFile {
    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the file in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Take the path, making the caller responsible for removing the file.
    pub fn into_path(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }

    /// Delete the file.
    pub async fn discard(self) -> StorageResult<()> {
        let path = self.into_path();
        remove_if_exists(&path).await
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

pub(crate) async fn remove_if_exists(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_finish_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut staging = StagingFile::create(dir.path()).await.unwrap();
        staging.write(b"hello ").await.unwrap();
        staging.write(b"world").await.unwrap();
        assert_eq!(staging.bytes_written(), 11);

        let staged = staging.finish().await.unwrap();
        assert_eq!(staged.size(), 11);
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"hello world");

        let path = staged.into_path();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_abort_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut staging = StagingFile::create(dir.path()).await.unwrap();
        staging.write(b"partial").await.unwrap();
        let path = staging.path().to_path_buf();

        staging.abort().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut staging = StagingFile::create(dir.path()).await.unwrap();
            staging.write(b"abandoned").await.unwrap();
            staging.path().to_path_buf()
        };
        assert!(!path.exists());

        let staged_path = {
            let staging = StagingFile::create(dir.path()).await.unwrap();
            let staged = staging.finish().await.unwrap();
            staged.path().to_path_buf()
        };
        assert!(!staged_path.exists());
    }

    #[tokio::test]
    async fn test_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = StagingFile::create(dir.path()).await.unwrap();
        let b = StagingFile::create(dir.path()).await.unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_staging_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let staging_dir = dir.path().join("staging");
        let staging = StagingFile::create(&staging_dir).await.unwrap();

        let file_mode = std::fs::metadata(staging.path()).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);
        let dir_mode = std::fs::metadata(&staging_dir).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }
}
