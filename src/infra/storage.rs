//! Filesystem-backed preview storage and retrieval helpers.
//!
//! Stands in for the deployment's object store: `put` persists rendered
//! bytes under a date-partitioned key and returns a durable public URL,
//! `get` reads a stored HTML source back for rendering.

use std::error::Error as StdError;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use futures::{StreamExt, pin_mut, stream};
use sha2::{Digest, Sha256};
use slug::slugify;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

/// Errors that can occur while interacting with the preview storage backend.
#[derive(Debug, Error)]
pub enum PreviewStorageError {
    #[error("invalid stored key")]
    InvalidKey,
    #[error("stored object not found: {key}")]
    NotFound { key: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("payload stream failed")]
    PayloadStream {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("payload is empty")]
    EmptyPayload,
    #[error("payload size exceeds supported range")]
    SizeOverflow,
}

impl PreviewStorageError {
    /// A missing object cannot be fixed by retrying the job.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result of storing a preview payload.
#[derive(Debug, Clone)]
pub struct StoredPreview {
    pub key: String,
    pub url: String,
    pub checksum: String,
    pub size_bytes: i64,
}

/// Filesystem-backed preview storage with a public URL prefix.
#[derive(Debug)]
pub struct PreviewStorage {
    root: PathBuf,
    public_base_url: String,
}

impl PreviewStorage {
    /// Initialise storage rooted at the provided directory, creating it if
    /// necessary. `public_base_url` is the externally reachable prefix the
    /// stored key is appended to.
    pub fn new(root: PathBuf, public_base_url: String) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Store the provided payload and return metadata describing the stored
    /// asset, including its durable public URL.
    ///
    /// The payload is streamed to disk to avoid buffering large captures in
    /// memory.
    pub async fn put_stream<S>(
        &self,
        original_name: &str,
        stream: S,
    ) -> Result<StoredPreview, PreviewStorageError>
    where
        S: futures::Stream<Item = Result<Bytes, PreviewStorageError>>,
    {
        let key = self.build_key(original_name);
        let absolute = self.resolve(&key)?;

        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&absolute).await?;
        let mut hasher = Sha256::new();
        let mut total_bytes: u64 = 0;
        let mut saw_payload = false;

        pin_mut!(stream);
        while let Some(chunk_result) = stream.next().await {
            let chunk = match chunk_result {
                Ok(chunk) => chunk,
                Err(err) => {
                    drop(file);
                    let _ = fs::remove_file(&absolute).await;
                    return Err(err);
                }
            };

            if chunk.is_empty() {
                continue;
            }

            saw_payload = true;
            total_bytes = total_bytes
                .checked_add(chunk.len() as u64)
                .ok_or(PreviewStorageError::SizeOverflow)?;
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
        }

        file.flush().await?;

        if !saw_payload {
            drop(file);
            let _ = fs::remove_file(&absolute).await;
            return Err(PreviewStorageError::EmptyPayload);
        }

        let digest = hasher.finalize();
        let checksum = hex::encode(digest);
        let size_bytes =
            i64::try_from(total_bytes).map_err(|_| PreviewStorageError::SizeOverflow)?;

        let url = format!("{}/{key}", self.public_base_url);

        Ok(StoredPreview {
            key,
            url,
            checksum,
            size_bytes,
        })
    }

    /// Store a fully-buffered payload.
    pub async fn put(
        &self,
        original_name: &str,
        data: Bytes,
    ) -> Result<StoredPreview, PreviewStorageError> {
        let stream = stream::once(async move { Ok::<_, PreviewStorageError>(data) });
        self.put_stream(original_name, stream).await
    }

    /// Read a stored payload into memory. A missing object is reported as
    /// [`PreviewStorageError::NotFound`] so callers can treat it as
    /// non-retriable.
    pub async fn get(&self, key: &str) -> Result<Bytes, PreviewStorageError> {
        let absolute = self.resolve(key)?;
        match fs::read(absolute).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(PreviewStorageError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(err) => Err(PreviewStorageError::Io(err)),
        }
    }

    /// Remove a stored payload. Missing files are treated as success.
    pub async fn delete(&self, key: &str) -> Result<(), PreviewStorageError> {
        let absolute = self.resolve(key)?;
        match fs::remove_file(&absolute).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PreviewStorageError::Io(err)),
        }
    }

    /// Resolve the absolute filesystem path for a stored key.
    fn resolve(&self, key: &str) -> Result<PathBuf, PreviewStorageError> {
        let relative = Path::new(key);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(PreviewStorageError::InvalidKey);
        }

        Ok(self.root.join(relative))
    }

    fn build_key(&self, original_name: &str) -> String {
        let (year, month, day) = time::OffsetDateTime::now_utc().to_calendar_date();
        let directory = format!("{year}/{:02}/{:02}", month as u8, day);
        let identifier = Uuid::new_v4();
        let filename = sanitize_filename(original_name);
        format!("{directory}/{identifier}-{filename}")
    }
}

fn sanitize_filename(original: &str) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("preview");
    let mut base = slugify(stem);
    if base.is_empty() {
        base = "preview".to_string();
    }

    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.trim_matches('.').to_ascii_lowercase())
        .filter(|value| !value.is_empty());

    match extension {
        Some(ext) => format!("{base}.{ext}"),
        None => base,
    }
}
