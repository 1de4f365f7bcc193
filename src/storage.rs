use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use tracing::info;

use crate::error::{PipelineError, Result};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<()>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}

/// `ObjectStore` backed by S3
#[derive(Debug, Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
}

impl S3Store {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    pub fn from_conf(config: &aws_types::SdkConfig) -> Self {
        Self::new(aws_sdk_s3::Client::new(config))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|e| PipelineError::from_sdk("s3", e))?;

        info!("Wrote s3://{}/{}", bucket, key);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| PipelineError::from_sdk("s3", e))?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| PipelineError::Storage(format!("Failed to read s3://{}/{}: {}", bucket, key, e)))?;

        Ok(body.into_bytes().to_vec())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| PipelineError::from_sdk("s3", e))?;

        info!("Deleted s3://{}/{}", bucket, key);
        Ok(())
    }
}
