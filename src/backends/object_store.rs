use std::future::Future;

use bytes::Bytes;
use log::debug;
use object_store::ObjectStore;
use object_store::ObjectStoreExt;
use object_store::path::Path;
use url::Url;

use crate::error::{Error, Result};
use crate::range_reader::RangeReader;

/// Cloud object storage backend.
///
/// One implementation covers every store the [`object_store`] crate
/// supports; the per-provider constructors pick up the provider credential
/// chain from the environment. Transport-level retries, signing, and
/// authentication live inside the store implementation.
#[derive(Debug)]
pub struct ObjectStoreReader {
    store: Box<dyn ObjectStore>,
    path: Path,
    source_id: String,
    size: u64,
}

impl ObjectStoreReader {
    /// Wrap a store and object path. Performs a `HEAD` to capture the
    /// object size and to surface a missing object early.
    pub async fn try_new(
        store: Box<dyn ObjectStore>,
        path: impl Into<Path>,
        source_id: impl Into<String>,
    ) -> Result<Self> {
        let path = path.into();
        let source_id = source_id.into();
        let meta = store.head(&path).await.map_err(map_store_error)?;
        debug!("opened {source_id}: {} bytes", meta.size);
        Ok(Self {
            store,
            path,
            source_id,
            size: meta.size,
        })
    }

    /// Build a reader from a URL such as `s3://bucket/key`,
    /// `az://container/key`, `gs://bucket/key`, or `file:///path`.
    ///
    /// Store-specific configuration is read from the environment, as with
    /// the per-provider constructors.
    pub async fn try_from_url(url: &Url) -> Result<Self> {
        let (store, path) = object_store::parse_url(url).map_err(map_store_error)?;
        Self::try_new(store, path, url.to_string()).await
    }

    /// Reader over `s3://{bucket}/{key}` using the AWS credential chain.
    #[cfg(feature = "aws")]
    pub async fn s3(bucket: &str, key: &str) -> Result<Self> {
        let store = object_store::aws::AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()
            .map_err(map_store_error)?;
        Self::try_new(Box::new(store), key, format!("s3://{bucket}/{key}")).await
    }

    /// Reader over `az://{container}/{key}` using the Azure credential chain.
    #[cfg(feature = "azure")]
    pub async fn azure(container: &str, key: &str) -> Result<Self> {
        let store = object_store::azure::MicrosoftAzureBuilder::from_env()
            .with_container_name(container)
            .build()
            .map_err(map_store_error)?;
        Self::try_new(Box::new(store), key, format!("az://{container}/{key}")).await
    }

    /// Reader over `gs://{bucket}/{key}` using the GCP credential chain.
    #[cfg(feature = "gcp")]
    pub async fn gcs(bucket: &str, key: &str) -> Result<Self> {
        let store = object_store::gcp::GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket)
            .build()
            .map_err(map_store_error)?;
        Self::try_new(Box::new(store), key, format!("gs://{bucket}/{key}")).await
    }

    /// The object path within the store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RangeReader for ObjectStoreReader {
    fn read(&self, offset: u64, length: u32) -> impl Future<Output = Result<Bytes>> + Send {
        async move {
            if length == 0 || offset >= self.size {
                return Ok(Bytes::new());
            }
            let end = (offset + u64::from(length)).min(self.size);
            self.store
                .get_range(&self.path, offset..end)
                .await
                .map_err(map_store_error)
        }
    }

    fn size(&self) -> impl Future<Output = Result<Option<u64>>> + Send {
        async move { Ok(Some(self.size)) }
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

fn map_store_error(err: object_store::Error) -> Error {
    match err {
        object_store::Error::NotFound { path, .. } => Error::NotFound(path),
        // The store client retries transient failures internally; what
        // escapes its generic variant is usually still network-shaped.
        err @ object_store::Error::Generic { .. } => Error::IoTransient(Box::new(err)),
        err => Error::IoFatal(Box::new(err)),
    }
}
