use async_trait::async_trait;
use aws_sdk_s3::{config::http::HttpResponse, error::SdkError, primitives::ByteStream};
use bytes::Bytes;
use error_stack::{Result, ResultExt};

use super::{ArchiveStore, ObjectStoreError, ObjectStoreResultExt};

/// Options for the S3 archive.
#[derive(Default, Clone, Debug)]
pub struct ObjectStoreOptions {
    /// The S3 bucket to use.
    pub bucket: String,
    /// Under which prefix to store the data.
    pub prefix: Option<String>,
}

#[derive(Clone)]
pub struct S3ArchiveStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3ArchiveStore {
    pub fn new(config: aws_config::SdkConfig, options: ObjectStoreOptions) -> Self {
        Self::new_from_config((&config).into(), options)
    }

    pub fn new_from_config(config: aws_sdk_s3::Config, options: ObjectStoreOptions) -> Self {
        let client = aws_sdk_s3::Client::from_conf(config);

        Self {
            client,
            bucket: options.bucket,
            prefix: normalize_prefix(options.prefix),
        }
    }

    pub async fn new_from_env(options: ObjectStoreOptions) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(config, options)
    }

    /// Check that the bucket exists and is reachable with the current credentials.
    pub async fn check_bucket(&self) -> Result<(), ObjectStoreError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .change_to_object_store_context()
            .attach_printable("failed to access bucket")
            .attach_printable_lazy(|| format!("bucket name: {}", self.bucket))?;
        Ok(())
    }

    /// Create the bucket. Used to set up test environments.
    pub async fn ensure_bucket(&self) -> Result<(), ObjectStoreError> {
        self.client
            .create_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .change_to_object_store_context()
            .attach_printable("failed to create bucket")
            .attach_printable_lazy(|| format!("bucket name: {}", self.bucket))?;
        Ok(())
    }

    fn full_key(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path)
    }
}

#[async_trait]
impl ArchiveStore for S3ArchiveStore {
    #[tracing::instrument(name = "object_store_put", skip(self, body), fields(size = body.len()))]
    async fn put(&self, key: &str, body: Bytes) -> Result<(), ObjectStoreError> {
        let key = self.full_key(key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .send()
            .await
            .change_to_object_store_context()
            .attach_printable("failed to put object")
            .attach_printable_lazy(|| format!("key: {key}"))?;

        Ok(())
    }

    #[tracing::instrument(name = "object_store_exists", skip(self))]
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        let key = self.full_key(key);

        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .change_to_object_store_context();

        match response {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err)
                .attach_printable("failed to check object")
                .attach_printable_lazy(|| format!("key: {key}")),
        }
    }
}

fn normalize_prefix(prefix: Option<String>) -> String {
    let prefix = prefix.unwrap_or_default();
    if prefix.ends_with('/') || prefix.is_empty() {
        prefix
    } else {
        format!("{}/", prefix)
    }
}

trait ToObjectStoreResult: Sized {
    type Ok;

    fn change_to_object_store_context(self) -> Result<Self::Ok, ObjectStoreError>;
}

impl<T, E> ToObjectStoreResult for std::result::Result<T, SdkError<E, HttpResponse>>
where
    SdkError<E, HttpResponse>: error_stack::Context,
{
    type Ok = T;

    fn change_to_object_store_context(self) -> Result<T, ObjectStoreError> {
        match self {
            Ok(value) => Ok(value),
            Err(err) => match err.raw_response().map(|r| r.status().as_u16()) {
                Some(404) => Err(err).change_context(ObjectStoreError::NotFound),
                _ => Err(err).change_context(ObjectStoreError::Request),
            },
        }
    }
}
