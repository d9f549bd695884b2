//! Cloud-agnostic bucket handle / 统一存储桶接口
//!
//! [`Bucket`] wraps one driver and forwards already-normalized errors. It
//! holds no mutable state beyond the close flag, so clones can be shared
//! freely across tasks.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};
use tokio::sync::OnceCell;

use crate::context::CallContext;
use crate::error::{BlobError, Result};
use crate::storage::{
    BoxReader, BoxWriter, ByteRange, Capability, ListQuery, ObjectMetadata, ReaderAttributes,
    StorageDriver, WriterOptions,
};

const DEFAULT_PAGE_SIZE: usize = 1000;

struct BucketInner {
    driver: Box<dyn StorageDriver>,
    closed: AtomicBool,
    close_result: OnceCell<Result<()>>,
    page_size: usize,
}

impl BucketInner {
    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(BlobError::ClosedHandle(format!("bucket ({}) is closed", self.driver.name())))
        } else {
            Ok(())
        }
    }
}

/// 存储桶
#[derive(Clone)]
pub struct Bucket {
    inner: Arc<BucketInner>,
}

impl Bucket {
    pub fn new(driver: Box<dyn StorageDriver>) -> Self {
        Self::with_page_size(driver, DEFAULT_PAGE_SIZE)
    }

    /// Bucket whose listings fetch `page_size` entries per request
    pub fn with_page_size(driver: Box<dyn StorageDriver>, page_size: usize) -> Self {
        Self {
            inner: Arc::new(BucketInner {
                driver,
                closed: AtomicBool::new(false),
                close_result: OnceCell::new(),
                page_size: page_size.max(1),
            }),
        }
    }

    /// Provider name of the driver / 驱动名称
    pub fn provider(&self) -> &str {
        self.inner.driver.name()
    }

    pub fn capabilities(&self) -> Capability {
        self.inner.driver.capabilities()
    }

    /// Writer for `key`. Opening is deferred: failures surface on the first
    /// write or on close / 创建写入器
    pub fn new_writer(&self, ctx: &CallContext, key: &str, options: WriterOptions) -> Writer {
        Writer {
            bucket: self.inner.clone(),
            ctx: ctx.clone(),
            key: key.to_string(),
            options,
            state: WriterState::Pending,
        }
    }

    /// Open, write everything, close / 一次性写入
    pub async fn write(&self, ctx: &CallContext, key: &str, data: &[u8], options: WriterOptions) -> Result<()> {
        let mut writer = self.new_writer(ctx, key, options);
        writer.write_all(data).await?;
        writer.close().await
    }

    /// 打开读取器
    pub async fn new_reader(&self, ctx: &CallContext, key: &str) -> Result<Reader> {
        self.open_reader(ctx, key, None).await
    }

    /// Reader over `length` bytes from `offset`; `None` reads to the end.
    /// Ranges past the end are clamped / 范围读取
    pub async fn new_range_reader(
        &self,
        ctx: &CallContext,
        key: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<Reader> {
        self.open_reader(ctx, key, Some(ByteRange::new(offset, length))).await
    }

    async fn open_reader(&self, ctx: &CallContext, key: &str, range: Option<ByteRange>) -> Result<Reader> {
        self.inner.check_open()?;
        let opened = ctx.run(self.inner.driver.open_reader(ctx, key, range)).await?;
        Ok(Reader {
            attributes: opened.attributes,
            body: Some(opened.body),
        })
    }

    /// Read the whole object / 读取全部内容
    pub async fn read_all(&self, ctx: &CallContext, key: &str) -> Result<Vec<u8>> {
        let mut reader = self.new_reader(ctx, key).await?;
        let mut data = Vec::with_capacity(reader.attributes.size as usize);
        ctx.run(async {
            reader.read_to_end(&mut data).await?;
            Ok::<(), BlobError>(())
        })
        .await?;
        reader.close()?;
        Ok(data)
    }

    /// Lazy listing; each call starts again from the beginning / 列举对象
    pub fn list(&self, ctx: &CallContext, options: ListOptions) -> ListIterator {
        ListIterator {
            bucket: self.inner.clone(),
            ctx: ctx.clone(),
            query: ListQuery {
                prefix: options.prefix,
                delimiter: options.delimiter,
                page_token: None,
                page_size: self.inner.page_size,
            },
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// 删除对象
    pub async fn delete(&self, ctx: &CallContext, key: &str) -> Result<()> {
        self.inner.check_open()?;
        ctx.run(self.inner.driver.delete(ctx, key)).await?;
        tracing::debug!("Deleted {} from {}", key, self.provider());
        Ok(())
    }

    /// 对象属性
    pub async fn attributes(&self, ctx: &CallContext, key: &str) -> Result<ObjectMetadata> {
        self.inner.check_open()?;
        ctx.run(self.inner.driver.attributes(ctx, key)).await
    }

    /// `false` instead of `NotFound` / 对象是否存在
    pub async fn exists(&self, ctx: &CallContext, key: &str) -> Result<bool> {
        match self.attributes(ctx, key).await {
            Ok(_) => Ok(true),
            Err(BlobError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Copy `src_key` to `dst_key`, server side when the backend can
    /// 复制对象
    pub async fn copy(&self, ctx: &CallContext, dst_key: &str, src_key: &str) -> Result<()> {
        self.inner.check_open()?;
        ctx.run(self.inner.driver.copy(ctx, dst_key, src_key)).await
    }

    /// Release the driver exactly once; later calls return the first
    /// outcome / 关闭存储桶
    pub async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Release);
        self.inner
            .close_result
            .get_or_init(|| async {
                let result = self.inner.driver.close().await;
                match &result {
                    Ok(()) => tracing::info!("Bucket closed: {}", self.provider()),
                    Err(e) => tracing::warn!("Bucket close failed: {}: {}", self.provider(), e),
                }
                result
            })
            .await
            .clone()
    }
}

/// Listing options / 列举选项
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub prefix: String,
    /// Group keys below the delimiter into directory entries
    pub delimiter: Option<String>,
}

impl ListOptions {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delimiter: None,
        }
    }

    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }
}

/// Page-by-page cursor over a listing / 列举迭代器
pub struct ListIterator {
    bucket: Arc<BucketInner>,
    ctx: CallContext,
    query: ListQuery,
    buffer: VecDeque<ObjectMetadata>,
    exhausted: bool,
}

impl ListIterator {
    /// Next entry, `None` at the end / 下一个对象
    pub async fn next(&mut self) -> Result<Option<ObjectMetadata>> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Ok(Some(entry));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.bucket.check_open()?;
            let page = self
                .ctx
                .run(self.bucket.driver.list_page(&self.ctx, &self.query))
                .await?;
            self.exhausted = page.next_page_token.is_none();
            self.query.page_token = page.next_page_token;
            self.buffer.extend(page.objects);
        }
    }

    /// Collect the remaining entries / 收集剩余对象
    pub async fn collect(mut self) -> Result<Vec<ObjectMetadata>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<ObjectMetadata>> + Send {
        futures::stream::try_unfold(self, |mut iter| async move {
            Ok(iter.next().await?.map(|entry| (entry, iter)))
        })
    }
}

enum WriterState {
    /// Driver writer not opened yet
    Pending,
    Open(BoxWriter),
    Closed,
    Failed(BlobError),
}

/// Single-use upload handle / 写入器
///
/// Nothing is visible until [`Writer::close`] returns `Ok`. Dropping an
/// unclosed writer discards the upload.
pub struct Writer {
    bucket: Arc<BucketInner>,
    ctx: CallContext,
    key: String,
    options: WriterOptions,
    state: WriterState,
}

impl Writer {
    pub fn key(&self) -> &str {
        &self.key
    }

    async fn open(&mut self) -> Result<&mut BoxWriter> {
        match &self.state {
            WriterState::Closed => {
                return Err(BlobError::ClosedHandle(format!("writer for {} is closed", self.key)))
            }
            WriterState::Failed(e) => return Err(e.clone()),
            WriterState::Pending => {
                let opened = match self.bucket.check_open() {
                    Ok(()) => {
                        self.ctx
                            .run(self.bucket.driver.open_writer(&self.ctx, &self.key, &self.options))
                            .await
                    }
                    Err(e) => Err(e),
                };
                match opened {
                    Ok(writer) => self.state = WriterState::Open(writer),
                    Err(e) => {
                        self.state = WriterState::Failed(e.clone());
                        return Err(e);
                    }
                }
            }
            WriterState::Open(_) => {}
        }
        match &mut self.state {
            WriterState::Open(writer) => Ok(writer),
            _ => Err(BlobError::Unknown("writer state changed unexpectedly".to_string())),
        }
    }

    /// Remember the first failure; the driver writer is dropped, which
    /// aborts its upload
    fn fail(&mut self, err: BlobError) -> BlobError {
        tracing::debug!("Writer for {} failed: {}", self.key, err);
        self.state = WriterState::Failed(err.clone());
        err
    }

    /// 写入全部数据
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let ctx = self.ctx.clone();
        let writer = self.open().await?;
        let result = ctx
            .run(async {
                writer.write_all(data).await?;
                Ok::<(), BlobError>(())
            })
            .await;
        result.map_err(|e| self.fail(e))
    }

    /// Stream everything from `reader` / 从读取器复制
    pub async fn copy_from<R>(&mut self, reader: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let ctx = self.ctx.clone();
        let writer = self.open().await?;
        let result = ctx
            .run(async { Ok::<u64, BlobError>(tokio::io::copy(reader, writer).await?) })
            .await;
        result.map_err(|e| self.fail(e))
    }

    /// Commit the object. A second call fails with `ClosedHandle` / 提交
    pub async fn close(&mut self) -> Result<()> {
        let ctx = self.ctx.clone();
        let writer = self.open().await?;
        let result = ctx
            .run(async {
                writer.shutdown().await?;
                Ok::<(), BlobError>(())
            })
            .await;
        match result {
            Ok(()) => {
                self.state = WriterState::Closed;
                tracing::debug!("Writer committed: {}", self.key);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Discard the upload; prior content at the key stays / 放弃写入
    pub fn abort(&mut self) {
        if matches!(self.state, WriterState::Open(_)) {
            tracing::debug!("Writer aborted: {}", self.key);
        }
        self.state = WriterState::Closed;
    }
}

/// Single-use download handle / 读取器
pub struct Reader {
    attributes: ReaderAttributes,
    body: Option<BoxReader>,
}

impl Reader {
    pub fn attributes(&self) -> &ReaderAttributes {
        &self.attributes
    }

    /// Size of the whole object / 对象大小
    pub fn size(&self) -> u64 {
        self.attributes.size
    }

    pub fn content_type(&self) -> Option<&str> {
        self.attributes.content_type.as_deref()
    }

    /// Release the download. A second call fails with `ClosedHandle` / 关闭
    pub fn close(&mut self) -> Result<()> {
        match self.body.take() {
            Some(_) => Ok(()),
            None => Err(BlobError::ClosedHandle("reader is closed".to_string())),
        }
    }
}

impl AsyncRead for Reader {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.body.as_mut() {
            Some(body) => Pin::new(body).poll_read(cx, buf),
            None => Poll::Ready(Err(BlobError::ClosedHandle("reader is closed".to_string()).into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::memory::MemoryDriver;
    use crate::error::ErrorKind;
    use futures::TryStreamExt;

    const GOPHER: [u8; 12] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D];

    fn bucket() -> Bucket {
        Bucket::with_page_size(Box::new(MemoryDriver::new("test")), 2)
    }

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let ctx = CallContext::background();
        let bucket = bucket();
        bucket
            .write(&ctx, "gopher.png", &GOPHER, WriterOptions::default())
            .await
            .unwrap();
        assert_eq!(bucket.read_all(&ctx, "gopher.png").await.unwrap(), GOPHER);

        let reader = bucket.new_reader(&ctx, "gopher.png").await.unwrap();
        assert_eq!(reader.size(), 12);
        assert_eq!(reader.content_type(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_manual_writer_matches_write() {
        let ctx = CallContext::background();
        let bucket = bucket();
        let mut writer = bucket.new_writer(&ctx, "parts.bin", WriterOptions::default());
        writer.write_all(&GOPHER[..5]).await.unwrap();
        writer.write_all(&GOPHER[5..]).await.unwrap();
        // not visible before close
        assert!(!bucket.exists(&ctx, "parts.bin").await.unwrap());
        writer.close().await.unwrap();
        assert_eq!(bucket.read_all(&ctx, "parts.bin").await.unwrap(), GOPHER);
    }

    #[tokio::test]
    async fn test_overwrite_replaces() {
        let ctx = CallContext::background();
        let bucket = bucket();
        bucket.write(&ctx, "k", b"first version", WriterOptions::default()).await.unwrap();
        bucket.write(&ctx, "k", b"second", WriterOptions::default()).await.unwrap();
        assert_eq!(bucket.read_all(&ctx, "k").await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_delete_then_read() {
        let ctx = CallContext::background();
        let bucket = bucket();
        bucket.write(&ctx, "k", b"v", WriterOptions::default()).await.unwrap();
        bucket.delete(&ctx, "k").await.unwrap();
        let err = bucket.read_all(&ctx, "k").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(bucket.delete(&ctx, "k").await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_writer_close_twice() {
        let ctx = CallContext::background();
        let bucket = bucket();
        let mut writer = bucket.new_writer(&ctx, "k", WriterOptions::default());
        writer.write_all(b"data").await.unwrap();
        writer.close().await.unwrap();
        assert_eq!(writer.close().await.unwrap_err().kind(), ErrorKind::ClosedHandle);
        assert_eq!(writer.write_all(b"more").await.unwrap_err().kind(), ErrorKind::ClosedHandle);
        assert_eq!(bucket.read_all(&ctx, "k").await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_empty_object() {
        let ctx = CallContext::background();
        let bucket = bucket();
        let mut writer = bucket.new_writer(&ctx, "empty", WriterOptions::default());
        writer.close().await.unwrap();
        assert_eq!(bucket.attributes(&ctx, "empty").await.unwrap().size, 0);
    }

    #[tokio::test]
    async fn test_lazy_writer_error() {
        let ctx = CallContext::background();
        let bucket = bucket();
        // invalid key only fails once the writer is used
        let mut writer = bucket.new_writer(&ctx, "", WriterOptions::default());
        assert_eq!(writer.write_all(b"x").await.unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(writer.close().await.unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_cancelled_write_keeps_prior_content() {
        let bucket = bucket();
        let ctx = CallContext::background();
        bucket.write(&ctx, "k", b"prior", WriterOptions::default()).await.unwrap();

        let write_ctx = ctx.child();
        let mut writer = bucket.new_writer(&write_ctx, "k", WriterOptions::default());
        writer.write_all(b"partial").await.unwrap();
        write_ctx.cancel();
        assert_eq!(writer.close().await.unwrap_err().kind(), ErrorKind::Cancelled);
        assert_eq!(bucket.read_all(&ctx, "k").await.unwrap(), b"prior");
    }

    #[tokio::test]
    async fn test_aborted_writer_leaves_nothing() {
        let ctx = CallContext::background();
        let bucket = bucket();
        let mut writer = bucket.new_writer(&ctx, "k", WriterOptions::default());
        writer.write_all(b"data").await.unwrap();
        writer.abort();
        assert!(!bucket.exists(&ctx, "k").await.unwrap());
        assert_eq!(writer.close().await.unwrap_err().kind(), ErrorKind::ClosedHandle);
    }

    #[tokio::test]
    async fn test_list_prefix_across_pages() {
        let ctx = CallContext::background();
        let bucket = bucket();
        for key in ["a/1", "a/2", "a/3", "b/1", "a/sub/4"] {
            bucket.write(&ctx, key, key.as_bytes(), WriterOptions::default()).await.unwrap();
        }
        bucket.delete(&ctx, "a/2").await.unwrap();

        let keys: Vec<String> = bucket
            .list(&ctx, ListOptions::prefix("a/"))
            .collect()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.key)
            .collect();
        assert_eq!(keys, vec!["a/1", "a/3", "a/sub/4"]);

        let entries: Vec<ObjectMetadata> = bucket
            .list(&ctx, ListOptions::prefix("a/").delimiter("/"))
            .into_stream()
            .try_collect()
            .await
            .unwrap();
        let dirs: Vec<&str> = entries.iter().filter(|m| m.is_dir).map(|m| m.key.as_str()).collect();
        assert_eq!(dirs, vec!["a/sub/"]);
        assert_eq!(entries.len(), 3);
    }

    #[tokio::test]
    async fn test_range_reader() {
        let ctx = CallContext::background();
        let bucket = bucket();
        bucket.write(&ctx, "k", b"0123456789", WriterOptions::default()).await.unwrap();

        let mut reader = bucket.new_range_reader(&ctx, "k", 2, Some(3)).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"234");
        assert_eq!(reader.size(), 10);

        let mut reader = bucket.new_range_reader(&ctx, "k", 8, Some(100)).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"89");
    }

    #[tokio::test]
    async fn test_reader_close() {
        let ctx = CallContext::background();
        let bucket = bucket();
        bucket.write(&ctx, "k", b"v", WriterOptions::default()).await.unwrap();
        let mut reader = bucket.new_reader(&ctx, "k").await.unwrap();
        reader.close().unwrap();
        assert_eq!(reader.close().unwrap_err().kind(), ErrorKind::ClosedHandle);
        let mut buf = [0u8; 1];
        let err: BlobError = reader.read(&mut buf).await.unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::ClosedHandle);
    }

    #[tokio::test]
    async fn test_copy_and_exists() {
        let ctx = CallContext::background();
        let bucket = bucket();
        bucket
            .write(&ctx, "src", b"payload", WriterOptions::default().metadata("owner", "gopher"))
            .await
            .unwrap();
        bucket.copy(&ctx, "dst", "src").await.unwrap();
        assert_eq!(bucket.read_all(&ctx, "dst").await.unwrap(), b"payload");
        let meta = bucket.attributes(&ctx, "dst").await.unwrap();
        assert_eq!(meta.metadata.get("owner").map(String::as_str), Some("gopher"));
        assert!(bucket.exists(&ctx, "src").await.unwrap());
        assert_eq!(bucket.copy(&ctx, "x", "missing").await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let ctx = CallContext::background();
        let bucket = bucket();
        bucket.write(&ctx, "k", b"v", WriterOptions::default()).await.unwrap();

        let other = bucket.clone();
        let (a, b) = tokio::join!(bucket.close(), other.close());
        assert!(a.is_ok() && b.is_ok());
        assert!(bucket.close().await.is_ok());

        assert_eq!(bucket.read_all(&ctx, "k").await.unwrap_err().kind(), ErrorKind::ClosedHandle);
        let mut writer = bucket.new_writer(&ctx, "k2", WriterOptions::default());
        assert_eq!(writer.write_all(b"v").await.unwrap_err().kind(), ErrorKind::ClosedHandle);
        let err = bucket.list(&ctx, ListOptions::default()).next().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClosedHandle);
    }

    #[tokio::test]
    async fn test_concurrent_writes() {
        let ctx = CallContext::background();
        let bucket = bucket();
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let bucket = bucket.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let key = format!("k{}", i);
                    bucket.write(&ctx, &key, key.as_bytes(), WriterOptions::default()).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        let all = bucket.list(&ctx, ListOptions::default()).collect().await.unwrap();
        assert_eq!(all.len(), 8);
    }
}
