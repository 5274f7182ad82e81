use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Extensions accepted for upload.
const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif"];

/// Whether an uploaded file name carries an accepted image extension.
pub fn is_allowed_file(filename: &str) -> bool {
    extension_of(filename).is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Derive the stored name for `bytes`: SHA-256 hex plus the original
/// extension. Identical bytes always map to the same name.
pub fn content_reference(bytes: &[u8], original_name: &str) -> String {
    let hash = Sha256::digest(bytes);
    match extension_of(original_name) {
        Some(ext) => format!("{hash:x}.{ext}"),
        None => format!("{hash:x}"),
    }
}

/// Content-addressed payload store on the local filesystem.
///
/// Files are append-only: a name that already exists is never rewritten,
/// since the same name implies the same bytes.
#[derive(Debug)]
pub struct ContentStore {
    root: PathBuf,
    writes: AtomicU64,
}

impl ContentStore {
    /// Open (creating if needed) the storage root.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            writes: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `bytes` and return their reference. A duplicate upload skips
    /// the write and returns the existing reference.
    ///
    /// Bytes land in a temporary file first and are then hard-linked under
    /// the content name, so the name never points at a partial file and
    /// concurrent identical uploads produce exactly one write.
    pub async fn put(&self, bytes: &[u8], original_name: &str) -> Result<String, StorageError> {
        let reference = content_reference(bytes, original_name);
        let path = self.root.join(&reference);

        if fs::try_exists(&path).await? {
            tracing::debug!(reference = %reference, "Content already stored, skipping write");
            return Ok(reference);
        }

        let staging = self.root.join(format!(".{}.{}.part", reference, Uuid::new_v4()));
        let linked = stage_and_link(&staging, &path, bytes).await;
        let _ = fs::remove_file(&staging).await;

        match linked {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(reference = %reference, bytes = bytes.len(), "Stored new content");
                Ok(reference)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::debug!(reference = %reference, "Lost store race to identical upload");
                Ok(reference)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a reference to the path of an existing stored file.
    pub async fn locate(&self, reference: &str) -> Result<PathBuf, StorageError> {
        validate_reference(reference)?;
        let path = self.root.join(reference);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(StorageError::NotFound(reference.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(reference.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read the bytes of a stored payload.
    pub async fn read(&self, reference: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.locate(reference).await?;
        Ok(fs::read(path).await?)
    }

    /// Number of physical writes performed since open.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

async fn stage_and_link(staging: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(staging)
        .await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    // Fails with AlreadyExists if another upload of the same bytes won.
    fs::hard_link(staging, target).await
}

/// References are produced by [`content_reference`]; anything that could
/// escape the storage root is rejected.
fn validate_reference(reference: &str) -> Result<(), StorageError> {
    let plain = !reference.is_empty()
        && reference != "."
        && reference != ".."
        && !reference.contains(['/', '\\', '\0']);
    if plain {
        Ok(())
    } else {
        Err(StorageError::InvalidReference(reference.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid content reference: {0:?}")]
    InvalidReference(String),

    #[error("No stored content for reference {0}")]
    NotFound(String),
}
