//! GCS resumable upload session / GCS断点续传会话

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{CONTENT_RANGE, LOCATION};
use reqwest::Client;

use crate::context::CallContext;
use crate::error::{BlobError, Result};
use crate::retry::retry;
use crate::storage::{PartUpload, UploadSession};

use super::driver::{response_error, GcsClient};
use super::types::UploadInit;

/// Status GCS answers for an accepted, non-final chunk
const RESUME_INCOMPLETE: u16 = 308;

/// `Content-Range` of a chunk; the total is only known with the last one
fn content_range(offset: u64, len: u64, last: bool) -> String {
    match (last, len) {
        (true, 0) => format!("bytes */{}", offset),
        (true, _) => format!("bytes {}-{}/{}", offset, offset + len - 1, offset + len),
        (false, _) => format!("bytes {}-{}/*", offset, offset + len.max(1) - 1),
    }
}

pub(super) struct GcsUploadSession {
    client: Arc<GcsClient>,
    key: String,
    content_type: String,
    metadata: HashMap<String, String>,
    session_url: Option<String>,
    ctx: CallContext,
}

impl GcsUploadSession {
    pub(super) fn new(
        client: Arc<GcsClient>,
        key: &str,
        content_type: String,
        metadata: HashMap<String, String>,
        ctx: &CallContext,
    ) -> Self {
        Self {
            client,
            key: key.to_string(),
            content_type,
            metadata,
            session_url: None,
            ctx: ctx.clone(),
        }
    }

    /// Start the session on first use / 初始化上传会话
    async fn session_url(&mut self) -> Result<String> {
        if let Some(url) = &self.session_url {
            return Ok(url.clone());
        }
        let init = UploadInit {
            name: &self.key,
            content_type: &self.content_type,
            metadata: &self.metadata,
        };
        let url = self.client.upload_url();
        let key = self.key.as_str();
        let content_type = self.content_type.as_str();
        let response = self
            .client
            .execute(&self.ctx, "gcs.start_upload", |c: &Client| {
                c.post(&url)
                    .query(&[("uploadType", "resumable"), ("name", key)])
                    .header("X-Upload-Content-Type", content_type)
                    .json(&init)
            })
            .await?;
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| BlobError::Unknown("resumable upload started without a Location header".to_string()))?
            .to_string();
        tracing::debug!("GCS上传会话开始: key={}", self.key);
        self.session_url = Some(location.clone());
        Ok(location)
    }
}

#[async_trait]
impl UploadSession for GcsUploadSession {
    async fn upload_part(&mut self, part: PartUpload) -> Result<()> {
        let url = self.session_url().await?;
        let range = content_range(part.offset, part.data.len() as u64, part.last);
        tracing::debug!("GCS上传分片: key={}, part={}, range={}", self.key, part.number, range);

        let client = &*self.client;
        let url = url.as_str();
        let range = range.as_str();
        let data = &part.data;
        let last = part.last;
        retry(&self.ctx, &client.retry, "gcs.upload_chunk", move || async move {
            let response = client
                .send(&|c: &Client| c.put(url).header(CONTENT_RANGE, range).body(data.clone()))
                .await?;
            let status = response.status().as_u16();
            match status {
                RESUME_INCOMPLETE if !last => Ok(()),
                200 | 201 if last => Ok(()),
                100..=399 => Err(BlobError::Unknown(format!(
                    "unexpected status {} for upload chunk {}",
                    status, range
                ))),
                _ => Err(response_error(response).await),
            }
        })
        .await
    }

    async fn complete(&mut self) -> Result<()> {
        // the final chunk already finalized the object
        tracing::debug!("GCS上传完成: key={}", self.key);
        Ok(())
    }

    async fn abort(&mut self) {
        let Some(url) = self.session_url.take() else {
            return;
        };
        // GCS answers 499 to a cancelled session
        match self.client.send(&|c: &Client| c.delete(url.as_str())).await {
            Ok(response) => tracing::debug!("GCS上传取消: key={}, status={}", self.key, response.status()),
            Err(e) => tracing::warn!("GCS abort failed: key={}, error={}", self.key, e),
        }
    }
}
