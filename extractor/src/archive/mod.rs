//! Raw extract archive in object storage.
mod local;
mod parquet;
mod s3;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use error_stack::{Report, Result, ResultExt};
use rawtx_observability::{RecordRequest, RequestKind, RequestMetrics};
use tracing::{debug, instrument};

use crate::fetch::RawTransactionRecord;
use crate::range::BlockRange;

pub use self::local::LocalArchiveStore;
pub use self::parquet::raw_records_to_parquet;
pub use self::s3::{ObjectStoreOptions, S3ArchiveStore};

#[derive(Debug)]
pub enum ObjectStoreError {
    /// Not found.
    NotFound,
    /// Request error.
    Request,
}

#[derive(Debug)]
pub enum ArchiveError {
    /// Records could not be encoded as parquet.
    Serialization,
    /// The object store rejected the upload.
    Upload,
    /// The object is missing after a successful upload.
    Verification,
}

/// Write-once blob storage for archive files.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Store `body` at `key`, overwriting any existing object.
    async fn put(&self, key: &str, body: Bytes) -> Result<(), ObjectStoreError>;

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;
}

/// Object key of the archive file of `range`.
pub fn archive_key(chain: &str, range: &BlockRange) -> String {
    format!(
        "{chain}/{chain}_tx_{}_{}.parquet",
        range.start(),
        range.end()
    )
}

/// Uploads the raw extract of a range and checks it landed.
#[derive(Clone)]
pub struct ArchiveWriter {
    store: Arc<dyn ArchiveStore>,
    metrics: RequestMetrics,
}

impl ArchiveWriter {
    pub fn new(store: Arc<dyn ArchiveStore>) -> Self {
        Self {
            store,
            metrics: RequestMetrics::new("rawtx_extractor", RequestKind::ArchivePut),
        }
    }

    /// Returns the key the records were archived at.
    #[instrument(skip(self, range, records), fields(range = %range, key), err(Debug))]
    pub async fn write(
        &self,
        chain: &str,
        range: &BlockRange,
        records: &[RawTransactionRecord],
    ) -> Result<String, ArchiveError> {
        let key = archive_key(chain, range);
        tracing::Span::current().record("key", key.as_str());

        let body = raw_records_to_parquet(records)?;
        let size = body.len();

        self.store
            .put(&key, body)
            .record_request(self.metrics.clone())
            .await
            .change_context(ArchiveError::Upload)
            .attach_printable_lazy(|| format!("key: {key}"))?;

        let exists = self
            .store
            .exists(&key)
            .await
            .change_context(ArchiveError::Verification)
            .attach_printable_lazy(|| format!("key: {key}"))?;

        if !exists {
            return Err(ArchiveError::Verification)
                .attach_printable("archive file is missing after upload")
                .attach_printable_lazy(|| format!("key: {key}"));
        }

        debug!(key, size, rows = records.len(), "archived raw records");

        Ok(key)
    }
}

impl error_stack::Context for ObjectStoreError {}

impl std::fmt::Display for ObjectStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectStoreError::NotFound => write!(f, "object store: not found"),
            ObjectStoreError::Request => write!(f, "object store: request error"),
        }
    }
}

impl error_stack::Context for ArchiveError {}

impl std::fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveError::Serialization => write!(f, "archive: serialization failed"),
            ArchiveError::Upload => write!(f, "archive: upload failed"),
            ArchiveError::Verification => write!(f, "archive: verification failed"),
        }
    }
}

pub trait ObjectStoreResultExt {
    fn is_not_found(&self) -> bool;
}

impl ObjectStoreResultExt for Report<ObjectStoreError> {
    fn is_not_found(&self) -> bool {
        matches!(self.current_context(), ObjectStoreError::NotFound)
    }
}
