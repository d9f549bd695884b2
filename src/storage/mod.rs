use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::context::CallContext;
use crate::error::{BlobError, Result};

pub mod http;
pub mod listing;
pub mod registry;
pub mod upload;

pub use registry::{DriverFactory, DriverRegistry, DriverRequest, DriverSettings};
pub use upload::{ChunkedUploadWriter, PartUpload, UploadSession};

/// Boxed streaming writer returned by drivers / 驱动返回的写入器
///
/// `shutdown` commits the object. Dropping the writer before `shutdown`
/// completes, or cancelling the context it was opened with, discards the
/// upload and leaves whatever was at the key before untouched.
pub type BoxWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Boxed streaming reader returned by drivers / 驱动返回的读取器
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Object entry information / 对象条目信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Full key within the bucket / 对象键
    pub key: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Raw MD5 digest when the backend reports one / MD5摘要
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// Directory-like entry produced by a delimiter listing / 目录条目
    #[serde(default)]
    pub is_dir: bool,
}

impl ObjectMetadata {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            ..Default::default()
        }
    }

    /// Entry for a common prefix in a delimiter listing / 公共前缀条目
    pub fn directory(prefix: impl Into<String>) -> Self {
        Self {
            key: prefix.into(),
            is_dir: true,
            ..Default::default()
        }
    }
}

/// Options for an upload / 上传选项
#[derive(Debug, Clone, Default)]
pub struct WriterOptions {
    /// Content type hint; guessed from the key when absent / 内容类型
    pub content_type: Option<String>,
    /// User metadata stored with the object / 用户元数据
    pub metadata: HashMap<String, String>,
    /// Overrides the configured part size / 覆盖分片大小
    pub buffer_size: Option<usize>,
}

impl WriterOptions {
    pub fn content_type(mut self, value: impl Into<String>) -> Self {
        self.content_type = Some(value.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Content type to send: explicit hint, then a guess from the key
    /// 解析最终内容类型
    pub fn resolved_content_type(&self, key: &str) -> String {
        match &self.content_type {
            Some(ct) if !ct.is_empty() => ct.clone(),
            _ => mime_guess::from_path(key).first_or_octet_stream().to_string(),
        }
    }
}

/// Byte range of a partial read, `length: None` means to the end / 读取范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    /// Inclusive end for HTTP `Range` headers, if bounded
    pub fn last_byte(&self) -> Option<u64> {
        self.length.map(|len| self.offset + len.saturating_sub(1))
    }

    /// `bytes=a-b` or `bytes=a-` / HTTP Range头
    pub fn to_header(&self) -> String {
        match self.last_byte() {
            Some(end) => format!("bytes={}-{}", self.offset, end),
            None => format!("bytes={}-", self.offset),
        }
    }

    /// Clamp to an object of `size` bytes, returning (start, len) / 按对象大小截断
    pub fn clamp(&self, size: u64) -> (u64, u64) {
        let start = self.offset.min(size);
        let available = size - start;
        let len = self.length.map_or(available, |l| l.min(available));
        (start, len)
    }
}

/// Attributes known when a reader is opened / 读取器属性
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReaderAttributes {
    /// Size of the whole object, not of the range / 对象总大小
    pub size: u64,
    pub content_type: Option<String>,
    pub modified: Option<DateTime<Utc>>,
}

impl From<&ObjectMetadata> for ReaderAttributes {
    fn from(meta: &ObjectMetadata) -> Self {
        Self {
            size: meta.size,
            content_type: meta.content_type.clone(),
            modified: meta.modified,
        }
    }
}

/// Opened download / 已打开的下载
pub struct DriverReader {
    pub attributes: ReaderAttributes,
    pub body: BoxReader,
}

/// One page request of a listing / 列举请求
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub prefix: String,
    pub delimiter: Option<String>,
    /// Opaque token from the previous page / 分页令牌
    pub page_token: Option<String>,
    pub page_size: usize,
}

/// One page of a listing / 列举结果页
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectMetadata>,
    pub next_page_token: Option<String>,
}

/// Driver capability declaration / 驱动能力声明
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capability {
    /// Support range reading / 支持范围读取
    pub can_range_read: bool,
    /// Writes stream in parts instead of buffering the whole payload / 支持分片上传
    pub can_multipart_upload: bool,
    /// Support server-side copy (no download needed) / 支持服务端复制
    pub can_server_side_copy: bool,
    /// Maximum part size (None means no limit) / 最大分片大小
    pub max_chunk_size: Option<u64>,
}

/// Storage driver interface (provides only primitive operations) / 存储驱动接口
///
/// Implementations own their connection pool and normalize every backend
/// failure into [`BlobError`] before returning it.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Driver name / 驱动名称
    fn name(&self) -> &str;

    /// Driver capabilities / 驱动能力
    fn capabilities(&self) -> Capability;

    /// Cheap handshake proving the bucket exists and is reachable / 连通性探测
    async fn probe(&self, ctx: &CallContext) -> Result<()>;

    /// Open object writer; nothing is visible until shutdown succeeds / 打开写入器
    async fn open_writer(
        &self,
        ctx: &CallContext,
        key: &str,
        options: &WriterOptions,
    ) -> Result<BoxWriter>;

    /// Open object reader (supports range reading) / 打开读取器
    async fn open_reader(
        &self,
        ctx: &CallContext,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<DriverReader>;

    /// List one page of objects / 列举一页对象
    async fn list_page(&self, ctx: &CallContext, query: &ListQuery) -> Result<ListPage>;

    /// Object attributes / 对象属性
    async fn attributes(&self, ctx: &CallContext, key: &str) -> Result<ObjectMetadata>;

    /// Delete object, `NotFound` when absent / 删除对象
    async fn delete(&self, ctx: &CallContext, key: &str) -> Result<()>;

    /// Copy object (default implementation: read then write) / 复制对象
    async fn copy(&self, ctx: &CallContext, dst_key: &str, src_key: &str) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        let src = self.attributes(ctx, src_key).await?;
        let mut reader = self.open_reader(ctx, src_key, None).await?;
        let options = WriterOptions {
            content_type: src.content_type.clone(),
            metadata: src.metadata.clone(),
            buffer_size: None,
        };
        let mut writer = self.open_writer(ctx, dst_key, &options).await?;
        ctx.run(async {
            tokio::io::copy(&mut reader.body, &mut writer).await?;
            // shutdown commits the destination
            writer.shutdown().await?;
            Ok::<(), BlobError>(())
        })
        .await
    }

    /// Release connections; later calls fail with `ClosedHandle` / 释放资源
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Reject keys no backend can store / 校验对象键
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(BlobError::InvalidArgument("object key must not be empty".to_string()));
    }
    if key.len() > 1024 {
        return Err(BlobError::InvalidArgument(format!(
            "object key is {} bytes, limit is 1024",
            key.len()
        )));
    }
    Ok(())
}
