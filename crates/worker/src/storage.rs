//! Image file storage and the catalogue of known images.
//!
//! Files live at `{root}/images/{uid}/{filename}`; derivatives sit next to
//! their original.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("invalid path component: '{0}'")]
    InvalidPath(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One original image known to the catalogue.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ImageRef {
    pub uid: String,
    pub filename: String,
}

/// Byte-level access to originals and derivatives.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn read(&self, uid: &str, filename: &str) -> Result<Vec<u8>, StorageError>;
    async fn write(&self, uid: &str, filename: &str, bytes: &[u8]) -> Result<(), StorageError>;
    async fn exists(&self, uid: &str, filename: &str) -> Result<bool, StorageError>;
}

/// Enumerates original images for bulk job commands.
#[async_trait]
pub trait ImageCatalog: Send + Sync {
    async fn list(&self) -> Result<Vec<ImageRef>, StorageError>;
    async fn find(&self, uid: &str) -> Result<Option<ImageRef>, StorageError>;
}

/// Suffixes that mark a file as a derivative rather than an original.
const DERIVATIVE_MARKERS: &[&str] = &["-thumb.", "-exif.json"];

pub fn is_derivative(filename: &str) -> bool {
    DERIVATIVE_MARKERS.iter().any(|m| filename.contains(m))
}

/// Filesystem-backed store rooted at the media directory.
#[derive(Debug, Clone)]
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    fn path(&self, uid: &str, filename: &str) -> Result<PathBuf, StorageError> {
        Ok(self.images_dir().join(component(uid)?).join(component(filename)?))
    }

    async fn originals_in(&self, uid: &str) -> Result<Vec<ImageRef>, StorageError> {
        let dir = self.images_dir().join(component(uid)?);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut originals = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(filename) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !is_derivative(&filename) {
                originals.push(ImageRef {
                    uid: uid.to_string(),
                    filename,
                });
            }
        }
        originals.sort();
        Ok(originals)
    }
}

/// Reject anything that could escape the image directory.
fn component(part: &str) -> Result<&str, StorageError> {
    if part.is_empty() || part == "." || part == ".." || part.contains(['/', '\\', '\0']) {
        return Err(StorageError::InvalidPath(part.to_string()));
    }
    Ok(part)
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn read(&self, uid: &str, filename: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path(uid, filename)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(format!("{uid}/{filename}"))),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, uid: &str, filename: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path(uid, filename)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Image file written");
        Ok(())
    }

    async fn exists(&self, uid: &str, filename: &str) -> Result<bool, StorageError> {
        let path = self.path(uid, filename)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}

#[async_trait]
impl ImageCatalog for FsImageStore {
    async fn list(&self) -> Result<Vec<ImageRef>, StorageError> {
        let mut dirs = match tokio::fs::read_dir(self.images_dir()).await {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut images = Vec::new();
        while let Some(entry) = dirs.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(uid) = entry.file_name().to_str() {
                images.extend(self.originals_in(uid).await?);
            }
        }
        images.sort();
        Ok(images)
    }

    async fn find(&self, uid: &str) -> Result<Option<ImageRef>, StorageError> {
        Ok(self.originals_in(uid).await?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn write_then_read_under_uid_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(dir.path());

        store.write("abc123", "photo.jpg", b"bytes").await.unwrap();
        assert!(dir.path().join("images/abc123/photo.jpg").is_file());
        assert_eq!(store.read("abc123", "photo.jpg").await.unwrap(), b"bytes");
        assert!(store.exists("abc123", "photo.jpg").await.unwrap());
        assert!(!store.exists("abc123", "photo-thumb.jpg").await.unwrap());
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(dir.path());
        assert_matches!(store.read("abc123", "photo.jpg").await, Err(StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(dir.path());
        assert_matches!(store.read("..", "passwd").await, Err(StorageError::InvalidPath(_)));
        assert_matches!(store.write("abc", "../x", b"").await, Err(StorageError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn catalog_lists_originals_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::new(dir.path());
        store.write("a", "one.jpg", b"1").await.unwrap();
        store.write("a", "one-thumb.jpg", b"t").await.unwrap();
        store.write("b", "two.png", b"2").await.unwrap();
        store.write("b", "two-exif.json", b"{}").await.unwrap();

        let images = store.list().await.unwrap();
        assert_eq!(
            images,
            vec![
                ImageRef { uid: "a".into(), filename: "one.jpg".into() },
                ImageRef { uid: "b".into(), filename: "two.png".into() },
            ]
        );
        assert_eq!(store.find("b").await.unwrap().unwrap().filename, "two.png");
        assert!(store.find("zzz").await.unwrap().is_none());
    }
}
