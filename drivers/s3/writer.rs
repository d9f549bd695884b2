//! S3 multipart upload session / S3分片上传会话

use async_trait::async_trait;
use s3::bucket::Bucket;
use s3::serde_types::Part;

use crate::context::CallContext;
use crate::error::Result;
use crate::retry::{retry, RetryPolicy};
use crate::storage::{PartUpload, UploadSession};

use super::errors::{check_status, from_s3_error};

/// Drives one object upload. A payload that fits in one part is sent with
/// a plain PutObject; larger ones use CreateMultipartUpload/UploadPart/
/// CompleteMultipartUpload. Nothing is visible until the final call.
pub(super) struct S3UploadSession {
    bucket: Box<Bucket>,
    key: String,
    content_type: String,
    upload_id: Option<String>,
    parts: Vec<Part>,
    retry: RetryPolicy,
    ctx: CallContext,
}

impl S3UploadSession {
    pub(super) fn new(
        bucket: Box<Bucket>,
        key: &str,
        content_type: String,
        retry: RetryPolicy,
        ctx: &CallContext,
    ) -> Self {
        Self {
            bucket,
            key: key.to_string(),
            content_type,
            upload_id: None,
            parts: Vec::new(),
            retry,
            ctx: ctx.clone(),
        }
    }

    /// 初始化分片上传
    async fn upload_id(&mut self) -> Result<String> {
        if let Some(id) = &self.upload_id {
            return Ok(id.clone());
        }
        let bucket = &self.bucket;
        let key = self.key.as_str();
        let content_type = self.content_type.as_str();
        let response = retry(&self.ctx, &self.retry, "s3.initiate_multipart_upload", move || async move {
            bucket
                .initiate_multipart_upload(key, content_type)
                .await
                .map_err(from_s3_error)
        })
        .await?;
        tracing::debug!("S3分片上传开始: key={}, upload_id={}", self.key, response.upload_id);
        self.upload_id = Some(response.upload_id.clone());
        Ok(response.upload_id)
    }
}

fn clone_parts(parts: &[Part]) -> Vec<Part> {
    parts
        .iter()
        .map(|p| Part {
            part_number: p.part_number,
            etag: p.etag.clone(),
        })
        .collect()
}

#[async_trait]
impl UploadSession for S3UploadSession {
    async fn upload_part(&mut self, part: PartUpload) -> Result<()> {
        if part.is_whole_object() {
            let bucket = &self.bucket;
            let key = self.key.as_str();
            let content_type = self.content_type.as_str();
            let data = &part.data;
            return retry(&self.ctx, &self.retry, "s3.put_object", move || async move {
                let response = bucket
                    .put_object_with_content_type(key, data, content_type)
                    .await
                    .map_err(from_s3_error)?;
                check_status(response.status_code(), response.bytes())
            })
            .await;
        }

        let upload_id = self.upload_id().await?;
        let bucket = &self.bucket;
        let key = self.key.as_str();
        let content_type = self.content_type.as_str();
        let upload_id = upload_id.as_str();
        let part_number = part.number;
        let data = &part.data;
        tracing::debug!("S3上传分片: key={}, part={}, size={}", key, part_number, data.len());
        let uploaded = retry(&self.ctx, &self.retry, "s3.upload_part", move || async move {
            bucket
                .put_multipart_chunk(data.to_vec(), key, part_number, upload_id, content_type)
                .await
                .map_err(from_s3_error)
        })
        .await?;
        self.parts.push(uploaded);
        Ok(())
    }

    async fn complete(&mut self) -> Result<()> {
        // single-part objects were already written by PutObject
        let Some(upload_id) = self.upload_id.clone() else {
            return Ok(());
        };
        self.parts.sort_by_key(|p| p.part_number);

        let bucket = &self.bucket;
        let key = self.key.as_str();
        let upload_id = upload_id.as_str();
        let parts = &self.parts;
        retry(&self.ctx, &self.retry, "s3.complete_multipart_upload", move || async move {
            let response = bucket
                .complete_multipart_upload(key, upload_id, clone_parts(parts))
                .await
                .map_err(from_s3_error)?;
            check_status(response.status_code(), response.bytes())
        })
        .await?;
        tracing::debug!("S3分片上传完成: key={}", self.key);
        Ok(())
    }

    async fn abort(&mut self) {
        if let Some(upload_id) = self.upload_id.take() {
            match self.bucket.abort_upload(&self.key, &upload_id).await {
                Ok(()) => tracing::debug!("S3分片上传取消: key={}", self.key),
                Err(e) => tracing::warn!("S3 abort failed: key={}, upload_id={}, error={}", self.key, upload_id, e),
            }
        }
    }
}
