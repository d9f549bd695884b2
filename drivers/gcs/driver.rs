//! GCS驱动核心实现
//!
//! Talks to the JSON API directly over reqwest:
//! - 读取：对象元数据 + `alt=media` 流式下载，支持Range
//! - 上传：resumable upload session, one PUT per chunk
//! - 复制：`rewriteTo`, looped until the server reports `done`
//!
//! Same-key writers: the session whose final chunk lands last wins; an
//! unfinished session never replaces the live object.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use crate::context::CallContext;
use crate::error::{BlobError, Result};
use crate::retry::{retry, RetryPolicy};
use crate::storage::http::{body_reader, build_client, error_body};
use crate::storage::{
    validate_key, BoxWriter, ByteRange, Capability, ChunkedUploadWriter, DriverReader,
    DriverSettings, ListPage, ListQuery, ObjectMetadata, ReaderAttributes, StorageDriver,
    WriterOptions,
};

use super::auth::TokenProvider;
use super::config::GcsConfig;
use super::types::{api_error, GcsObject, ListResponse, RewriteResponse};
use super::writer::GcsUploadSession;

/// Resumable upload chunks must be multiples of 256 KiB / 分片对齐
pub(super) const CHUNK_ALIGNMENT: usize = 256 * 1024;

/// Shared by the driver and its upload sessions / GCS客户端
pub(super) struct GcsClient {
    http: Client,
    auth: TokenProvider,
    pub base_url: String,
    pub bucket: String,
    pub retry: RetryPolicy,
    /// Applied to every request except media downloads
    request_timeout: Duration,
}

impl GcsClient {
    pub fn bucket_url(&self) -> String {
        format!("{}/storage/v1/b/{}", self.base_url, urlencoding::encode(&self.bucket))
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("{}/o/{}", self.bucket_url(), urlencoding::encode(key))
    }

    pub fn upload_url(&self) -> String {
        format!("{}/upload/storage/v1/b/{}/o", self.base_url, urlencoding::encode(&self.bucket))
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        Ok(match self.auth.token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    /// Send once with the request timeout; a 401 drops the cached token and
    /// resends / 发送请求
    pub async fn send<F>(&self, build: &F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Sync,
    {
        self.send_with(build, Some(self.request_timeout)).await
    }

    async fn send_with<F>(&self, build: &F, timeout: Option<Duration>) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Sync,
    {
        let request = || match timeout {
            Some(timeout) => build(&self.http).timeout(timeout),
            None => build(&self.http),
        };
        let response = self.authorize(request()).await?.send().await?;
        if response.status() == StatusCode::UNAUTHORIZED && self.auth.refreshable() {
            // Token过期，刷新后重试
            tracing::debug!("GCS returned 401, refreshing access token");
            self.auth.invalidate().await;
            return Ok(self.authorize(request()).await?.send().await?);
        }
        Ok(response)
    }

    /// Retrying request that fails on any non-2xx status / 发起API请求
    pub async fn execute<F>(&self, ctx: &CallContext, operation: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Sync,
    {
        self.execute_with(ctx, operation, Some(self.request_timeout), build).await
    }

    /// Like [`execute`](Self::execute) for responses whose body is streamed
    /// to the caller; only the context bounds them / 流式下载请求
    pub async fn execute_streaming<F>(&self, ctx: &CallContext, operation: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Sync,
    {
        self.execute_with(ctx, operation, None, build).await
    }

    async fn execute_with<F>(
        &self,
        ctx: &CallContext,
        operation: &str,
        timeout: Option<Duration>,
        build: F,
    ) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Sync,
    {
        let build = &build;
        retry(ctx, &self.retry, operation, move || async move {
            let response = self.send_with(build, timeout).await?;
            if response.status().is_success() {
                Ok(response)
            } else {
                Err(response_error(response).await)
            }
        })
        .await
    }
}

pub(super) async fn response_error(response: Response) -> BlobError {
    let (status, body) = error_body(response).await;
    api_error(status, &body)
}

/// GCS驱动
pub struct GcsDriver {
    client: Arc<GcsClient>,
    settings: DriverSettings,
}

impl GcsDriver {
    pub fn new(config: GcsConfig, settings: DriverSettings) -> Result<Self> {
        let http = build_client(&settings.http)?;
        let client = GcsClient {
            auth: TokenProvider::new(config.token_source, http.clone()),
            http,
            base_url: config.base_url,
            bucket: config.bucket,
            retry: settings.retry.clone(),
            request_timeout: settings.http.request_timeout(),
        };
        Ok(Self {
            client: Arc::new(client),
            settings,
        })
    }

    async fn object(&self, ctx: &CallContext, key: &str) -> Result<GcsObject> {
        let url = self.client.object_url(key);
        let response = self
            .client
            .execute(ctx, "gcs.get_object", |c: &Client| c.get(&url))
            .await?;
        Ok(response.json().await?)
    }

    fn chunk_size(&self, options: &WriterOptions) -> usize {
        let requested = self.settings.upload.effective_chunk_size(options.buffer_size);
        requested.div_ceil(CHUNK_ALIGNMENT) * CHUNK_ALIGNMENT
    }
}

#[async_trait]
impl StorageDriver for GcsDriver {
    fn name(&self) -> &str {
        "gcp"
    }

    fn capabilities(&self) -> Capability {
        Capability {
            can_range_read: true,
            can_multipart_upload: true,
            can_server_side_copy: true,
            max_chunk_size: None,
        }
    }

    async fn probe(&self, ctx: &CallContext) -> Result<()> {
        let url = self.client.bucket_url();
        self.client
            .execute(ctx, "gcs.get_bucket", |c: &Client| c.get(&url))
            .await?;
        tracing::debug!("GCS bucket reachable: {} at {}", self.client.bucket, self.client.base_url);
        Ok(())
    }

    async fn open_writer(&self, ctx: &CallContext, key: &str, options: &WriterOptions) -> Result<BoxWriter> {
        validate_key(key)?;
        let chunk_size = self.chunk_size(options);
        let session = GcsUploadSession::new(
            self.client.clone(),
            key,
            options.resolved_content_type(key),
            options.metadata.clone(),
            ctx,
        );
        tracing::debug!("GCS upload opened: key={}, chunk_size={}", key, chunk_size);
        Ok(Box::new(ChunkedUploadWriter::spawn(session, ctx, key, chunk_size)))
    }

    async fn open_reader(&self, ctx: &CallContext, key: &str, range: Option<ByteRange>) -> Result<DriverReader> {
        let object = self.object(ctx, key).await?;
        let generation = object.generation.clone();
        let meta = object.into_metadata();
        let attributes = ReaderAttributes::from(&meta);
        let (start, len) = range.map_or((0, meta.size), |r| r.clamp(meta.size));

        if len == 0 {
            return Ok(DriverReader {
                attributes,
                body: Box::new(Cursor::new(Vec::new())),
            });
        }

        // pin the generation so a concurrent overwrite cannot mix contents
        let mut params = vec![("alt", "media".to_string())];
        if let Some(generation) = generation {
            params.push(("generation", generation));
        }
        let range_header = range.map(|_| format!("bytes={}-{}", start, start + len - 1));
        let url = self.client.object_url(key);
        let response = self
            .client
            .execute_streaming(ctx, "gcs.download", |c: &Client| {
                let request = c.get(&url).query(&params);
                match &range_header {
                    Some(value) => request.header(RANGE, value),
                    None => request,
                }
            })
            .await?;

        Ok(DriverReader {
            attributes,
            body: body_reader(ctx, response),
        })
    }

    async fn list_page(&self, ctx: &CallContext, query: &ListQuery) -> Result<ListPage> {
        let mut params = vec![
            ("prefix", query.prefix.clone()),
            ("maxResults", query.page_size.max(1).to_string()),
        ];
        if let Some(delimiter) = &query.delimiter {
            params.push(("delimiter", delimiter.clone()));
        }
        if let Some(token) = &query.page_token {
            params.push(("pageToken", token.clone()));
        }

        let url = format!("{}/o", self.client.bucket_url());
        let response = self
            .client
            .execute(ctx, "gcs.list_objects", |c: &Client| c.get(&url).query(&params))
            .await?;
        let listed: ListResponse = response.json().await?;

        let mut objects: Vec<ObjectMetadata> = listed
            .items
            .into_iter()
            .map(GcsObject::into_metadata)
            .chain(listed.prefixes.into_iter().map(ObjectMetadata::directory))
            .collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(ListPage {
            objects,
            next_page_token: listed.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn attributes(&self, ctx: &CallContext, key: &str) -> Result<ObjectMetadata> {
        Ok(self.object(ctx, key).await?.into_metadata())
    }

    async fn delete(&self, ctx: &CallContext, key: &str) -> Result<()> {
        let url = self.client.object_url(key);
        self.client
            .execute(ctx, "gcs.delete_object", |c: &Client| c.delete(&url))
            .await?;
        Ok(())
    }

    /// Objects: rewrite, repeated with the returned token / 服务端复制
    async fn copy(&self, ctx: &CallContext, dst_key: &str, src_key: &str) -> Result<()> {
        validate_key(dst_key)?;
        let url = format!(
            "{}/rewriteTo/b/{}/o/{}",
            self.client.object_url(src_key),
            urlencoding::encode(&self.client.bucket),
            urlencoding::encode(dst_key)
        );

        let mut rewrite_token: Option<String> = None;
        loop {
            let token = rewrite_token.as_deref();
            let response = self
                .client
                .execute(ctx, "gcs.rewrite_object", |c: &Client| {
                    let request = c.post(&url).header(CONTENT_LENGTH, "0");
                    match token {
                        Some(t) => request.query(&[("rewriteToken", t)]),
                        None => request,
                    }
                })
                .await?;
            let progress: RewriteResponse = response.json().await?;
            if progress.done {
                tracing::debug!("GCS rewrite done: {} -> {}", src_key, dst_key);
                return Ok(());
            }
            match progress.rewrite_token {
                Some(t) => rewrite_token = Some(t),
                None => return Err(BlobError::Unknown("rewrite incomplete without a rewriteToken".to_string())),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        tracing::debug!("GCS driver closed: {}", self.client.bucket);
        Ok(())
    }
}
