use std::{path::PathBuf, sync::Arc};

use clap::Args;
use error_stack::ResultExt;
use tracing::info;

use crate::archive::{ArchiveStore, LocalArchiveStore, ObjectStoreOptions, S3ArchiveStore};
use crate::error::{ExtractError, Result};

#[derive(Args, Debug, Clone)]
pub struct ArchiveArgs {
    /// S3 bucket for the raw parquet archive.
    #[arg(
        long = "archive.s3-bucket",
        env = "S3_LONG_TERM_BUCKET",
        conflicts_with = "archive_local_dir"
    )]
    pub archive_s3_bucket: Option<String>,

    /// Archive to a local directory instead of S3.
    #[arg(long = "archive.local-dir", env = "ARCHIVE_LOCAL_DIR")]
    pub archive_local_dir: Option<PathBuf>,

    /// Prefix prepended to every S3 key.
    #[arg(long = "archive.prefix", env = "ARCHIVE_PREFIX")]
    pub archive_prefix: Option<String>,
}

impl ArchiveArgs {
    /// Build the archive store, checking that the bucket is reachable.
    pub async fn to_archive_store(&self) -> Result<Arc<dyn ArchiveStore>> {
        if let Some(dir) = &self.archive_local_dir {
            info!(dir = %dir.display(), "archiving to local directory");
            return Ok(Arc::new(LocalArchiveStore::new(dir)));
        }

        let Some(bucket) = self.archive_s3_bucket.clone() else {
            return Err(ExtractError::Configuration)
                .attach_printable("one of --archive.s3-bucket or --archive.local-dir is required");
        };

        info!(bucket, prefix = ?self.archive_prefix, "archiving to s3");
        let store = S3ArchiveStore::new_from_env(ObjectStoreOptions {
            bucket,
            prefix: self.archive_prefix.clone(),
        })
        .await;

        store
            .check_bucket()
            .await
            .change_context(ExtractError::Connection)?;

        Ok(Arc::new(store))
    }
}
