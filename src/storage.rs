use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;

use crate::error::{AppError, Result};

/// A backend holding the binary payloads. The record store only keeps the
/// returned urls, everything byte-shaped goes through here. Could be S3,
/// garage, or an in-memory double in tests.
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Identifier recorded in `FileEntry.source` so a reference can be
    /// traced back to the backend that produced it.
    fn backend_tag(&self) -> &'static str;

    /// Store the payload under `{directory}/{name}` and return the public
    /// url of the object.
    async fn upload(
        &self,
        directory: &str,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String>;

    /// Remove the object. Returns whether the backend acknowledged the
    /// deletion.
    async fn delete(&self, directory: &str, name: &str) -> Result<bool>;
}

pub(crate) trait BackendErrorContext<T, E> {
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: ToString + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> BackendErrorContext<T, E> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: ToString + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|err| AppError::StorageBackendError {
            message: f().to_string(),
            source: Box::new(err),
        })
    }
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: Option<String>,
    /// Custom S3-compatible endpoint (garage, minio). Implies path-style
    /// addressing.
    pub endpoint: Option<String>,
    /// Base url prepended to object keys to form the public reference.
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_base_url: String,
}

impl S3Store {
    pub async fn new(conf: S3Config) -> Self {
        let mut loader = aws_config::from_env();
        if let Some(region) = conf.region.clone() {
            loader = loader.region(aws_sdk_s3::config::Region::new(region));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &conf.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = aws_sdk_s3::Client::from_conf(builder.build());

        S3Store {
            client,
            bucket: conf.bucket,
            public_base_url: conf.public_base_url,
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn backend_tag(&self) -> &'static str {
        "s3"
    }

    async fn upload(
        &self,
        directory: &str,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        let key = format!("{directory}/{name}");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .with_context(|| format!("cannot upload {key} to bucket {}", self.bucket))?;

        tracing::info!("uploaded {key} to bucket {}", self.bucket);
        Ok(format!(
            "{}/{key}",
            self.public_base_url.trim_end_matches('/')
        ))
    }

    async fn delete(&self, directory: &str, name: &str) -> Result<bool> {
        let key = format!("{directory}/{name}");
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .with_context(|| format!("cannot delete {key} from bucket {}", self.bucket))?;

        tracing::info!("deleted {key} from bucket {}", self.bucket);
        Ok(true)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    use parking_lot::Mutex;

    use super::*;

    /// In-memory stand-in for the S3 backend, keyed like the real one.
    #[derive(Debug, Default)]
    pub(crate) struct MemoryStore {
        pub(crate) objects: Mutex<HashMap<String, Vec<u8>>>,
        pub(crate) fail_uploads: bool,
    }

    impl MemoryStore {
        pub(crate) fn failing() -> Self {
            MemoryStore {
                objects: Mutex::new(HashMap::new()),
                fail_uploads: true,
            }
        }

        pub(crate) fn contains(&self, key: &str) -> bool {
            self.objects.lock().contains_key(key)
        }

        pub(crate) fn len(&self) -> usize {
            self.objects.lock().len()
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        fn backend_tag(&self) -> &'static str {
            "memory"
        }

        async fn upload(
            &self,
            directory: &str,
            name: &str,
            bytes: Vec<u8>,
            _content_type: &str,
        ) -> Result<String> {
            if self.fail_uploads {
                return Err(AppError::StorageBackendError {
                    message: "upload refused".to_owned(),
                    source: Box::new(std::io::Error::new(std::io::ErrorKind::Other, "boom")),
                });
            }
            let key = format!("{directory}/{name}");
            self.objects.lock().insert(key.clone(), bytes);
            Ok(format!("https://store/{key}"))
        }

        async fn delete(&self, directory: &str, name: &str) -> Result<bool> {
            let key = format!("{directory}/{name}");
            Ok(self.objects.lock().remove(&key).is_some())
        }
    }
}
