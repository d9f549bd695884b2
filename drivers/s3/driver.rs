//! S3驱动核心实现
//!
//! 设计原则：
//! - 只提供原语（open_reader, open_writer, list等）
//! - 分片上传，内存只保留有限分片
//! - Every response status is checked: rust-s3 is built without
//!   `fail-on-err`, so non-2xx answers come back as data
//!
//! Same-key writers: the last `CompleteMultipartUpload` (or `PutObject`)
//! to finish wins; S3 never exposes a partially uploaded object.

use std::io;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use s3::bucket::Bucket;
use s3::command::Command;
use s3::creds::Credentials;
use s3::request::tokio_backend::ReqwestRequest;
use s3::request::Request;
use s3::serde_types::HeadObjectResult;
use s3::Region;
use tokio_util::io::StreamReader;

use crate::context::CallContext;
use crate::error::{BlobError, Result};
use crate::retry::retry;
use crate::storage::http::{parse_http_date, ContextReader};
use crate::storage::{
    validate_key, BoxWriter, ByteRange, Capability, ChunkedUploadWriter, DriverReader,
    DriverSettings, ListPage, ListQuery, ObjectMetadata, ReaderAttributes, StorageDriver,
    WriterOptions,
};

use super::config::S3Config;
use super::errors::{check_status, from_response, from_s3_error};
use super::writer::S3UploadSession;

/// Largest part S3 accepts (5 GiB) / S3最大分片
const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// S3驱动
pub struct S3Driver {
    config: S3Config,
    /// Carries `HttpConfig::request_timeout`
    bucket: Box<Bucket>,
    /// GetObject only: a streamed body is bounded by the context alone
    stream_bucket: Box<Bucket>,
    settings: DriverSettings,
}

impl S3Driver {
    /// 创建新的S3驱动实例
    pub fn new(config: S3Config, settings: DriverSettings) -> Result<Self> {
        let stream_bucket = Self::create_bucket(&config)?;
        let bucket = stream_bucket
            .with_request_timeout(settings.http.request_timeout())
            .map_err(from_s3_error)?;
        Ok(Self {
            config,
            bucket,
            stream_bucket,
            settings,
        })
    }

    /// 创建S3 Bucket客户端
    fn create_bucket(config: &S3Config) -> Result<Box<Bucket>> {
        let credentials = Credentials::new(
            Some(config.access_key_id.as_str()),
            Some(config.secret_access_key.as_str()),
            if config.session_token.is_empty() { None } else { Some(config.session_token.as_str()) },
            None,
            None,
        )
        .map_err(|e| BlobError::Authentication(format!("invalid S3 credentials: {}", e)))?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        };

        let bucket = Bucket::new(&config.bucket, region, credentials).map_err(from_s3_error)?;

        let bucket = if config.force_path_style {
            bucket.with_path_style()
        } else {
            bucket
        };

        Ok(bucket)
    }

    /// HeadObject with NotFound for a missing key / 获取对象元数据
    async fn head(&self, ctx: &CallContext, key: &str) -> Result<ObjectMetadata> {
        retry(ctx, &self.settings.retry, "s3.head_object", move || async move {
            let (head, status) = self.bucket.head_object(key).await.map_err(from_s3_error)?;
            if status == 404 {
                return Err(BlobError::NotFound(format!("s3://{}/{}", self.config.bucket, key)));
            }
            check_status(status, b"")?;
            Ok(head_metadata(key, head))
        })
        .await
    }

    /// Bucket clone carrying `x-amz-meta-*` headers for a new object
    fn bucket_with_metadata(&self, options: &WriterOptions) -> Result<Box<Bucket>> {
        let mut bucket = self.bucket.clone();
        for (name, value) in &options.metadata {
            let valid_name = !name.is_empty()
                && name
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
            let valid_value = value.bytes().all(|b| b == b'\t' || (0x20..0x7f).contains(&b));
            if !valid_name || !valid_value {
                return Err(BlobError::InvalidArgument(format!(
                    "metadata {:?} cannot be sent as an S3 header",
                    name
                )));
            }
            bucket.add_header(&format!("x-amz-meta-{}", name.to_ascii_lowercase()), value);
        }
        Ok(bucket)
    }
}

fn head_metadata(key: &str, head: HeadObjectResult) -> ObjectMetadata {
    let etag = head.e_tag.map(|e| e.trim_matches('"').to_string());
    ObjectMetadata {
        key: key.to_string(),
        size: head.content_length.unwrap_or(0).max(0) as u64,
        content_type: head.content_type,
        modified: head.last_modified.as_deref().and_then(parse_http_date),
        md5: etag.as_deref().and_then(md5_from_etag),
        etag,
        metadata: head.metadata.unwrap_or_default(),
        is_dir: false,
    }
}

/// Single-part ETags are the hex MD5 of the content / 单分片ETag即MD5
fn md5_from_etag(etag: &str) -> Option<Vec<u8>> {
    if etag.len() != 32 || etag.contains('-') {
        return None;
    }
    hex::decode(etag).ok()
}

#[async_trait]
impl StorageDriver for S3Driver {
    fn name(&self) -> &str {
        "aws"
    }

    fn capabilities(&self) -> Capability {
        Capability {
            can_range_read: true,
            can_multipart_upload: true,
            can_server_side_copy: true,
            max_chunk_size: Some(MAX_PART_SIZE),
        }
    }

    async fn probe(&self, ctx: &CallContext) -> Result<()> {
        let (_, status) = retry(ctx, &self.settings.retry, "s3.probe", move || async move {
            self.bucket
                .list_page(String::new(), None, None, None, Some(1))
                .await
                .map_err(from_s3_error)
        })
        .await?;
        check_status(status, b"")?;
        tracing::debug!("S3 bucket reachable: {} at {}", self.config.bucket, self.config.endpoint);
        Ok(())
    }

    async fn open_writer(&self, ctx: &CallContext, key: &str, options: &WriterOptions) -> Result<BoxWriter> {
        validate_key(key)?;
        let chunk_size = self.settings.upload.effective_chunk_size(options.buffer_size);
        let session = S3UploadSession::new(
            self.bucket_with_metadata(options)?,
            key,
            options.resolved_content_type(key),
            self.settings.retry.clone(),
            ctx,
        );
        tracing::debug!("S3 upload opened: key={}, chunk_size={}", key, chunk_size);
        Ok(Box::new(ChunkedUploadWriter::spawn(session, ctx, key, chunk_size)))
    }

    async fn open_reader(&self, ctx: &CallContext, key: &str, range: Option<ByteRange>) -> Result<DriverReader> {
        let meta = self.head(ctx, key).await?;
        let (start, len) = range.map_or((0, meta.size), |r| r.clamp(meta.size));

        if len == 0 {
            return Ok(DriverReader {
                attributes: ReaderAttributes::from(&meta),
                body: Box::new(tokio::io::empty()),
            });
        }

        // the ETag pins the version whose size was returned / 固定版本
        let mut bucket = self.stream_bucket.clone();
        if let Some(etag) = &meta.etag {
            bucket.add_header("if-match", &format!("\"{}\"", etag));
        }
        let bucket = &bucket;

        // 打开流式响应，正文按需读取
        let response = retry(ctx, &self.settings.retry, "s3.get_object", move || async move {
            let command = if range.is_some() {
                Command::GetObjectRange { start, end: Some(start + len - 1) }
            } else {
                Command::GetObject
            };
            let request = ReqwestRequest::new(bucket, key, command)
                .await
                .map_err(from_s3_error)?;
            let response = request.response_data_to_stream().await.map_err(from_s3_error)?;
            if !(200..300).contains(&response.status_code) {
                let status = response.status_code;
                let body: Vec<u8> = response
                    .bytes
                    .try_fold(Vec::new(), |mut acc, chunk| async move {
                        acc.extend_from_slice(&chunk);
                        Ok(acc)
                    })
                    .await
                    .unwrap_or_default();
                return Err(from_response(status, &String::from_utf8_lossy(&body)));
            }
            Ok(response)
        })
        .await?;

        let stream = response
            .bytes
            .map_err(|e| io::Error::from(from_s3_error(e)));
        Ok(DriverReader {
            attributes: ReaderAttributes::from(&meta),
            body: Box::new(ContextReader::new(ctx, StreamReader::new(stream))),
        })
    }

    async fn list_page(&self, ctx: &CallContext, query: &ListQuery) -> Result<ListPage> {
        let (result, status) = retry(ctx, &self.settings.retry, "s3.list_objects", move || async move {
            self.bucket
                .list_page(
                    query.prefix.clone(),
                    query.delimiter.clone(),
                    query.page_token.clone(),
                    None,
                    Some(query.page_size.max(1)),
                )
                .await
                .map_err(from_s3_error)
        })
        .await?;
        check_status(status, b"")?;

        let mut objects: Vec<ObjectMetadata> = result
            .contents
            .into_iter()
            .map(|obj| {
                let etag = obj.e_tag.map(|e| e.trim_matches('"').to_string());
                ObjectMetadata {
                    size: obj.size,
                    modified: DateTime::parse_from_rfc3339(&obj.last_modified)
                        .ok()
                        .map(|d| d.with_timezone(&Utc)),
                    md5: etag.as_deref().and_then(md5_from_etag),
                    etag,
                    ..ObjectMetadata::new(obj.key, 0)
                }
            })
            .collect();

        // 处理目录（公共前缀）
        for cp in result.common_prefixes.unwrap_or_default() {
            objects.push(ObjectMetadata::directory(cp.prefix));
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(ListPage {
            objects,
            next_page_token: if result.is_truncated {
                result.next_continuation_token
            } else {
                None
            },
        })
    }

    async fn attributes(&self, ctx: &CallContext, key: &str) -> Result<ObjectMetadata> {
        self.head(ctx, key).await
    }

    async fn delete(&self, ctx: &CallContext, key: &str) -> Result<()> {
        // DeleteObject answers 204 for missing keys too
        self.head(ctx, key).await?;
        retry(ctx, &self.settings.retry, "s3.delete_object", move || async move {
            let response = self.bucket.delete_object(key).await.map_err(from_s3_error)?;
            check_status(response.status_code(), response.bytes())
        })
        .await
    }

    /// S3 CopyObject, verified with a HEAD on the destination / 服务端复制
    async fn copy(&self, ctx: &CallContext, dst_key: &str, src_key: &str) -> Result<()> {
        validate_key(dst_key)?;
        self.head(ctx, src_key).await?;

        // copy_object_internal的from参数需要URL编码（中文等非ASCII字符）
        let encoded_src = urlencoding::encode(src_key).into_owned();
        tracing::debug!("S3 CopyObject: src_key={}, encoded={}, dst_key={}", src_key, encoded_src, dst_key);

        let encoded = encoded_src.as_str();
        retry(ctx, &self.settings.retry, "s3.copy_object", move || async move {
            let status = self
                .bucket
                .copy_object_internal(encoded, dst_key)
                .await
                .map_err(from_s3_error)?;
            check_status(status, b"")
        })
        .await?;

        // 验证新文件是否存在
        self.head(ctx, dst_key).await.map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        tracing::debug!("S3 driver closed: {}", self.config.bucket);
        Ok(())
    }
}
