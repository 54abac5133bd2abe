//! Image and metadata storage over an OpenDAL operator.

use std::time::Duration;

use opendal::{ErrorKind, Operator, services};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    InspectorError, IResult,
    config::{StorageBackend, StorageConfig},
    model::ImageMetadata,
};

const IMAGE_PREFIX: &str = "images/";
const METADATA_PREFIX: &str = "metadata/";

/// Key of the annotated variant of image `id`.
pub fn annotated_key(id: &str) -> String {
    format!("{}_annotated", id)
}

/// Outcome of a full cleanup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub deleted: usize,
    pub errors: usize,
}

#[derive(Clone)]
pub struct AssetStore {
    operator: Operator,
    backend: StorageBackend,
    metadata_retries: u32,
    metadata_backoff: Duration,
}

impl AssetStore {
    pub fn new(config: &StorageConfig) -> IResult<Self> {
        let operator = Self::create_operator(config)?;

        info!(
            "Storage backend initialized: {:?} (root {})",
            config.backend, config.root
        );

        Ok(Self {
            operator,
            backend: config.backend,
            metadata_retries: config.metadata_retries.max(1),
            metadata_backoff: Duration::from_millis(config.metadata_backoff_ms),
        })
    }

    /// Ephemeral store living as long as its clones.
    pub fn memory() -> IResult<Self> {
        Self::new(&StorageConfig::default())
    }

    pub fn backend(&self) -> StorageBackend {
        self.backend
    }

    fn create_operator(config: &StorageConfig) -> IResult<Operator> {
        let operator = match config.backend {
            StorageBackend::Memory => Operator::new(services::Memory::default())?.finish(),
            StorageBackend::Fs => {
                Operator::new(services::Fs::default().root(&config.root))?.finish()
            }
            StorageBackend::S3 => {
                let bucket = config.bucket.as_deref().ok_or_else(|| {
                    InspectorError::ConfigError("S3_BUCKET is required for s3 storage".to_string())
                })?;
                let mut builder = services::S3::default().bucket(bucket).root(&config.root);

                if let Some(ref region) = config.region {
                    builder = builder.region(region);
                }
                if let Some(ref endpoint) = config.endpoint {
                    builder = builder.endpoint(endpoint);
                }
                if let Some(ref access_key_id) = config.access_key_id {
                    builder = builder.access_key_id(access_key_id);
                }
                if let Some(ref secret_access_key) = config.secret_access_key {
                    builder = builder.secret_access_key(secret_access_key);
                }

                Operator::new(builder)?.finish()
            }
        };
        Ok(operator)
    }

    fn image_path(key: &str) -> String {
        format!("{}{}", IMAGE_PREFIX, key)
    }

    fn metadata_path(key: &str) -> String {
        format!("{}{}.json", METADATA_PREFIX, key)
    }

    async fn read_optional(&self, path: &str) -> IResult<Option<Vec<u8>>> {
        match self.operator.read(path).await {
            Ok(buffer) => Ok(Some(buffer.to_vec())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_path(&self, path: &str) -> IResult<()> {
        match self.operator.delete(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn put(&self, key: &str, bytes: Vec<u8>) -> IResult<()> {
        debug!("Storing {} ({} bytes)", key, bytes.len());
        self.operator.write(&Self::image_path(key), bytes).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> IResult<Option<Vec<u8>>> {
        self.read_optional(&Self::image_path(key)).await
    }

    pub async fn exists(&self, key: &str) -> IResult<bool> {
        Ok(self.operator.exists(&Self::image_path(key)).await?)
    }

    /// Deleting a missing key succeeds.
    pub async fn delete(&self, key: &str) -> IResult<()> {
        self.delete_path(&Self::image_path(key)).await
    }

    pub async fn put_meta(&self, key: &str, metadata: &ImageMetadata) -> IResult<()> {
        let json = serde_json::to_vec(metadata)?;
        self.operator.write(&Self::metadata_path(key), json).await?;
        Ok(())
    }

    pub async fn get_meta(&self, key: &str) -> IResult<Option<ImageMetadata>> {
        match self.read_optional(&Self::metadata_path(key)).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn put_annotated(&self, id: &str, bytes: Vec<u8>) -> IResult<()> {
        self.put(&annotated_key(id), bytes).await
    }

    pub async fn get_annotated(&self, id: &str) -> IResult<Option<Vec<u8>>> {
        self.get(&annotated_key(id)).await
    }

    /// Removes the original, the annotated variant and the metadata of `id`.
    /// Each removal is attempted regardless of the others; failures are logged.
    pub async fn delete_image(&self, id: &str) -> usize {
        let paths = [
            Self::image_path(id),
            Self::image_path(&annotated_key(id)),
            Self::metadata_path(id),
        ];

        let mut failures = 0;
        for path in &paths {
            if let Err(e) = self.delete_path(path).await {
                warn!("Failed to delete {}: {}", path, e);
                failures += 1;
            }
        }
        failures
    }

    /// Writes metadata for a freshly uploaded image, waiting with increasing
    /// backoff until the image itself is visible.
    pub async fn store_metadata_after_upload(
        &self,
        id: &str,
        metadata: &ImageMetadata,
    ) -> IResult<()> {
        for attempt in 1..=self.metadata_retries {
            if self.exists(id).await? {
                return self.put_meta(id, metadata).await;
            }
            if attempt < self.metadata_retries {
                warn!(
                    "Image {} not visible yet (attempt {}/{}), retrying...",
                    id, attempt, self.metadata_retries
                );
                tokio::time::sleep(self.metadata_backoff * attempt).await;
            }
        }

        Err(InspectorError::NotFound(format!(
            "Image {} not found after {} attempts",
            id, self.metadata_retries
        )))
    }

    async fn list_files(&self, prefix: &str) -> IResult<Vec<String>> {
        let entries = match self.operator.list(prefix).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(entries
            .into_iter()
            .filter(|entry| entry.metadata().mode().is_file())
            .map(|entry| entry.path().to_string())
            .collect())
    }

    /// Deletes every stored image, annotated variant and metadata document.
    /// `deleted` counts image objects.
    pub async fn delete_all(&self) -> IResult<CleanupSummary> {
        let mut summary = CleanupSummary::default();

        for path in self.list_files(IMAGE_PREFIX).await? {
            match self.delete_path(&path).await {
                Ok(()) => summary.deleted += 1,
                Err(e) => {
                    warn!("Failed to delete {}: {}", path, e);
                    summary.errors += 1;
                }
            }
        }

        for path in self.list_files(METADATA_PREFIX).await? {
            if let Err(e) = self.delete_path(&path).await {
                warn!("Failed to delete {}: {}", path, e);
                summary.errors += 1;
            }
        }

        info!(
            "Cleanup complete: {} deleted, {} errors",
            summary.deleted, summary.errors
        );
        Ok(summary)
    }
}

impl std::fmt::Debug for AssetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetStore")
            .field("backend", &self.backend)
            .finish()
    }
}
