//! Azure Blob驱动核心实现
//!
//! REST calls over reqwest, authorized by Shared Key or a SAS token.
//! Same-key writers: the last Put Blob / Put Block List to commit wins;
//! staged blocks are invisible until committed.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::IF_MATCH;
use reqwest::{Client, RequestBuilder, Response, Url};

use crate::context::CallContext;
use crate::error::{BlobError, Result};
use crate::retry::{retry, RetryPolicy};
use crate::storage::http::{body_reader, build_client, error_body};
use crate::storage::{
    validate_key, BoxWriter, ByteRange, Capability, ChunkedUploadWriter, DriverReader,
    DriverSettings, ListPage, ListQuery, ObjectMetadata, ReaderAttributes, StorageDriver,
    WriterOptions,
};

use super::config::{AzureAuth, AzureConfig};
use super::types::{api_error, metadata_from_headers, BlobEntry, EnumerationResults};
use super::writer::{metadata_headers, AzureUploadSession};

pub(super) const API_VERSION: &str = "2021-08-06";
/// Largest Put Block payload (4000 MiB) / 最大块大小
const MAX_BLOCK_SIZE: u64 = 4000 * 1024 * 1024;
const COPY_POLL_INTERVAL: Duration = Duration::from_millis(500);

fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn append_query(url: &mut Url, extra: &str) {
    let query = match url.query() {
        Some(q) if !q.is_empty() => format!("{}&{}", q, extra),
        _ => extra.to_string(),
    };
    url.set_query(Some(&query));
}

/// Shared by the driver and its upload sessions / Azure客户端
pub(super) struct AzureClient {
    http: Client,
    auth: AzureAuth,
    pub endpoint: String,
    pub container: String,
    pub retry: RetryPolicy,
    /// Applied to every request except blob downloads
    request_timeout: Duration,
}

impl AzureClient {
    pub fn container_url(&self) -> String {
        format!("{}/{}", self.endpoint, urlencoding::encode(&self.container))
    }

    pub fn blob_url(&self, key: &str) -> String {
        format!("{}/{}", self.container_url(), encode_key(key))
    }

    /// Blob URL readable by the service itself, for `x-ms-copy-source`
    fn source_url(&self, key: &str) -> String {
        match &self.auth {
            AzureAuth::Sas(token) => format!("{}?{}", self.blob_url(key), token),
            AzureAuth::SharedKey(_) => self.blob_url(key),
        }
    }

    /// Stamp version and date, authorize, send once / 签名并发送
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
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let mut builder = build(&self.http)
            .header("x-ms-version", API_VERSION)
            .header("x-ms-date", date);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let mut request = builder.build()?;
        match &self.auth {
            AzureAuth::SharedKey(key) => key.sign(&mut request)?,
            AzureAuth::Sas(token) => append_query(request.url_mut(), token),
        }
        Ok(self.http.execute(request).await?)
    }

    /// Retrying request that fails on any non-2xx status / 发起API请求
    pub async fn execute<F>(&self, ctx: &CallContext, operation: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Sync,
    {
        self.execute_with(ctx, operation, Some(self.request_timeout), build).await
    }

    /// Request whose body is streamed to the caller; only the context
    /// bounds it / 流式下载请求
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
    let code = response
        .headers()
        .get("x-ms-error-code")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let (status, body) = error_body(response).await;
    api_error(status, code.as_deref(), &body)
}

/// Azure Blob驱动
pub struct AzureDriver {
    client: Arc<AzureClient>,
    settings: DriverSettings,
}

impl AzureDriver {
    pub fn new(config: AzureConfig, settings: DriverSettings) -> Result<Self> {
        let client = AzureClient {
            http: build_client(&settings.http)?,
            auth: config.auth,
            endpoint: config.endpoint,
            container: config.container,
            retry: settings.retry.clone(),
            request_timeout: settings.http.request_timeout(),
        };
        Ok(Self {
            client: Arc::new(client),
            settings,
        })
    }

    /// Get Blob Properties / 获取对象属性
    async fn properties(&self, ctx: &CallContext, key: &str) -> Result<(ObjectMetadata, Response)> {
        let url = self.client.blob_url(key);
        let response = self
            .client
            .execute(ctx, "azure.get_blob_properties", |c: &Client| c.head(&url))
            .await?;
        Ok((metadata_from_headers(key, response.headers()), response))
    }

    /// Wait for an asynchronous server-side copy / 等待异步复制
    async fn wait_for_copy(&self, ctx: &CallContext, key: &str) -> Result<()> {
        loop {
            ctx.run(async {
                tokio::time::sleep(COPY_POLL_INTERVAL).await;
                Ok(())
            })
            .await?;
            let (_, response) = self.properties(ctx, key).await?;
            let status = response
                .headers()
                .get("x-ms-copy-status")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("success");
            match status {
                "pending" => continue,
                "success" => return Ok(()),
                other => {
                    return Err(BlobError::Unknown(format!("copy to {} ended with status {}", key, other)))
                }
            }
        }
    }
}

#[async_trait]
impl StorageDriver for AzureDriver {
    fn name(&self) -> &str {
        "azure"
    }

    fn capabilities(&self) -> Capability {
        Capability {
            can_range_read: true,
            can_multipart_upload: true,
            can_server_side_copy: true,
            max_chunk_size: Some(MAX_BLOCK_SIZE),
        }
    }

    async fn probe(&self, ctx: &CallContext) -> Result<()> {
        let url = self.client.container_url();
        self.client
            .execute(ctx, "azure.get_container_properties", |c: &Client| {
                c.get(&url).query(&[("restype", "container")])
            })
            .await?;
        tracing::debug!("Azure container reachable: {} at {}", self.client.container, self.client.endpoint);
        Ok(())
    }

    async fn open_writer(&self, ctx: &CallContext, key: &str, options: &WriterOptions) -> Result<BoxWriter> {
        validate_key(key)?;
        let chunk_size = self
            .settings
            .upload
            .effective_chunk_size(options.buffer_size)
            .min(MAX_BLOCK_SIZE as usize);
        let session = AzureUploadSession::new(
            self.client.clone(),
            key,
            options.resolved_content_type(key),
            metadata_headers(&options.metadata)?,
            ctx,
        );
        tracing::debug!("Azure upload opened: key={}, chunk_size={}", key, chunk_size);
        Ok(Box::new(ChunkedUploadWriter::spawn(session, ctx, key, chunk_size)))
    }

    async fn open_reader(&self, ctx: &CallContext, key: &str, range: Option<ByteRange>) -> Result<DriverReader> {
        let (meta, _) = self.properties(ctx, key).await?;
        let attributes = ReaderAttributes::from(&meta);
        let (start, len) = range.map_or((0, meta.size), |r| r.clamp(meta.size));

        if len == 0 {
            return Ok(DriverReader {
                attributes,
                body: Box::new(Cursor::new(Vec::new())),
            });
        }

        let url = self.client.blob_url(key);
        let range_header = range.map(|_| format!("bytes={}-{}", start, start + len - 1));
        // the ETag pins the version whose properties were returned
        let etag = meta.etag.as_ref().map(|e| format!("\"{}\"", e));
        let response = self
            .client
            .execute_streaming(ctx, "azure.get_blob", |c: &Client| {
                let mut request = c.get(&url);
                if let Some(value) = &range_header {
                    request = request.header("x-ms-range", value);
                }
                if let Some(value) = &etag {
                    request = request.header(IF_MATCH, value);
                }
                request
            })
            .await?;

        Ok(DriverReader {
            attributes,
            body: body_reader(ctx, response),
        })
    }

    async fn list_page(&self, ctx: &CallContext, query: &ListQuery) -> Result<ListPage> {
        let mut params = vec![
            ("restype", "container".to_string()),
            ("comp", "list".to_string()),
            ("maxresults", query.page_size.max(1).to_string()),
        ];
        if !query.prefix.is_empty() {
            params.push(("prefix", query.prefix.clone()));
        }
        if let Some(delimiter) = &query.delimiter {
            params.push(("delimiter", delimiter.clone()));
        }
        if let Some(marker) = &query.page_token {
            params.push(("marker", marker.clone()));
        }

        let url = self.client.container_url();
        let response = self
            .client
            .execute(ctx, "azure.list_blobs", |c: &Client| c.get(&url).query(&params))
            .await?;
        let body = response.text().await?;
        let results: EnumerationResults = quick_xml::de::from_str(&body)
            .map_err(|e| BlobError::Unknown(format!("invalid List Blobs response: {}", e)))?;

        let mut objects: Vec<ObjectMetadata> = results
            .blobs
            .entries
            .into_iter()
            .map(BlobEntry::into_metadata)
            .collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(ListPage {
            objects,
            next_page_token: results.next_marker.filter(|m| !m.is_empty()),
        })
    }

    async fn attributes(&self, ctx: &CallContext, key: &str) -> Result<ObjectMetadata> {
        Ok(self.properties(ctx, key).await?.0)
    }

    async fn delete(&self, ctx: &CallContext, key: &str) -> Result<()> {
        let url = self.client.blob_url(key);
        self.client
            .execute(ctx, "azure.delete_blob", |c: &Client| c.delete(&url))
            .await?;
        Ok(())
    }

    /// Copy Blob within the account / 服务端复制
    async fn copy(&self, ctx: &CallContext, dst_key: &str, src_key: &str) -> Result<()> {
        validate_key(dst_key)?;
        self.properties(ctx, src_key).await?;

        let url = self.client.blob_url(dst_key);
        let source = self.client.source_url(src_key);
        let response = self
            .client
            .execute(ctx, "azure.copy_blob", |c: &Client| {
                c.put(&url).header("x-ms-copy-source", source.as_str()).body(Vec::new())
            })
            .await?;
        let pending = response
            .headers()
            .get("x-ms-copy-status")
            .map_or(false, |v| v.as_bytes() == b"pending");
        if pending {
            tracing::debug!("Azure copy pending: {} -> {}", src_key, dst_key);
            self.wait_for_copy(ctx, dst_key).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        tracing::debug!("Azure driver closed: {}", self.client.container);
        Ok(())
    }
}
