//! services/api/src/adapters/image_store.rs
//!
//! S3-compatible blob storage for product photos. Implements the
//! `ImageStorageService` port; uploaded objects are addressed by a public URL
//! built from the configured prefix and the object key.

use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;
use nutriscan_core::domain::ImagePayload;
use nutriscan_core::ports::{ImageStorageService, PortError, PortResult};
use tracing::debug;

use crate::config::StorageConfig;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct S3ImageStore {
    client: Client,
    bucket: String,
    public_url: String,
}

impl S3ImageStore {
    pub async fn new(config: &StorageConfig) -> Self {
        let mut loader = defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(Credentials::new(
                config.access_key.clone(),
                config.secret_key.clone(),
                None,
                None,
                "static",
            ));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        // Path-style addressing works against both MinIO and AWS.
        let mut builder = S3ConfigBuilder::from(&shared).force_path_style(true);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            public_url: config.public_url.trim_end_matches('/').to_string(),
        }
    }

    /// The URL clients use to fetch an object stored under `key`.
    pub fn public_url_for(&self, key: &str) -> String {
        public_url(&self.public_url, key)
    }
}

fn public_url(prefix: &str, key: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), key.trim_start_matches('/'))
}

//=========================================================================================
// `ImageStorageService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ImageStorageService for S3ImageStore {
    async fn upload_image(&self, path: &str, image: &ImagePayload) -> PortResult<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(Bytes::from(image.bytes.clone())))
            .content_type(&image.mime_type)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(format!("s3 put_object {}: {}", path, e)))?;
        debug!(key = path, bytes = image.bytes.len(), "uploaded product image");
        Ok(self.public_url_for(path))
    }

    async fn delete_image(&self, path: &str) -> PortResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(format!("s3 delete_object {}: {}", path, e)))?;
        debug!(key = path, "deleted product image");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_urls_join_prefix_and_key_once() {
        assert_eq!(
            public_url("http://localhost:9000/products/", "/products/u/visual-1.jpg"),
            "http://localhost:9000/products/products/u/visual-1.jpg"
        );
        assert_eq!(
            public_url("https://cdn.example.com", "a.png"),
            "https://cdn.example.com/a.png"
        );
    }
}
