//! Memory driver core / 内存驱动核心实现
//!
//! Objects live in a sorted map owned by the driver. A writer buffers its
//! payload and swaps it into the map on shutdown, so concurrent writers to
//! one key are last-commit-wins and readers never see partial content.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::io::AsyncWrite;

use crate::context::CallContext;
use crate::error::{BlobError, Result};
use crate::storage::listing::paginate;
use crate::storage::{
    validate_key, BoxWriter, ByteRange, Capability, DriverReader, ListPage, ListQuery,
    ObjectMetadata, ReaderAttributes, StorageDriver, WriterOptions,
};

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    metadata: HashMap<String, String>,
    modified: DateTime<Utc>,
    md5: [u8; 16],
}

impl StoredObject {
    fn to_metadata(&self, key: &str) -> ObjectMetadata {
        ObjectMetadata {
            key: key.to_string(),
            size: self.data.len() as u64,
            content_type: Some(self.content_type.clone()),
            modified: Some(self.modified),
            etag: Some(hex::encode(self.md5)),
            md5: Some(self.md5.to_vec()),
            metadata: self.metadata.clone(),
            is_dir: false,
        }
    }
}

type ObjectMap = Arc<RwLock<BTreeMap<String, StoredObject>>>;

/// Memory driver / 内存驱动
pub struct MemoryDriver {
    bucket: String,
    objects: ObjectMap,
}

impl MemoryDriver {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    fn get(&self, key: &str) -> Result<StoredObject> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(format!("{}/{}", self.bucket, key)))
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    fn name(&self) -> &str {
        "mem"
    }

    fn capabilities(&self) -> Capability {
        Capability {
            can_range_read: true,
            can_multipart_upload: false,
            can_server_side_copy: true,
            max_chunk_size: None,
        }
    }

    async fn probe(&self, ctx: &CallContext) -> Result<()> {
        ctx.check()
    }

    async fn open_writer(&self, ctx: &CallContext, key: &str, options: &WriterOptions) -> Result<BoxWriter> {
        validate_key(key)?;
        ctx.check()?;
        Ok(Box::new(MemoryWriter {
            objects: self.objects.clone(),
            key: key.to_string(),
            content_type: options.resolved_content_type(key),
            metadata: options.metadata.clone(),
            buffer: Vec::new(),
            committed: false,
            ctx: ctx.clone(),
        }))
    }

    async fn open_reader(&self, ctx: &CallContext, key: &str, range: Option<ByteRange>) -> Result<DriverReader> {
        ctx.check()?;
        let object = self.get(key)?;
        let attributes = ReaderAttributes {
            size: object.data.len() as u64,
            content_type: Some(object.content_type.clone()),
            modified: Some(object.modified),
        };
        let data = match range {
            Some(range) => {
                let (start, len) = range.clamp(object.data.len() as u64);
                object.data.slice(start as usize..(start + len) as usize)
            }
            None => object.data,
        };
        Ok(DriverReader {
            attributes,
            body: Box::new(Cursor::new(data)),
        })
    }

    async fn list_page(&self, ctx: &CallContext, query: &ListQuery) -> Result<ListPage> {
        ctx.check()?;
        let entries: Vec<ObjectMetadata> = self
            .objects
            .read()
            .range(query.prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&query.prefix))
            .map(|(k, v)| v.to_metadata(k))
            .collect();
        Ok(paginate(entries, query))
    }

    async fn attributes(&self, ctx: &CallContext, key: &str) -> Result<ObjectMetadata> {
        ctx.check()?;
        Ok(self.get(key)?.to_metadata(key))
    }

    async fn delete(&self, ctx: &CallContext, key: &str) -> Result<()> {
        ctx.check()?;
        match self.objects.write().remove(key) {
            Some(_) => Ok(()),
            None => Err(BlobError::NotFound(format!("{}/{}", self.bucket, key))),
        }
    }

    async fn copy(&self, ctx: &CallContext, dst_key: &str, src_key: &str) -> Result<()> {
        validate_key(dst_key)?;
        ctx.check()?;
        let mut object = self.get(src_key)?;
        object.modified = Utc::now();
        self.objects.write().insert(dst_key.to_string(), object);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let count = {
            let mut objects = self.objects.write();
            let count = objects.len();
            objects.clear();
            count
        };
        tracing::debug!("Memory bucket {} released {} objects", self.bucket, count);
        Ok(())
    }
}

/// Buffers the payload, publishes it on shutdown / 内存写入器
struct MemoryWriter {
    objects: ObjectMap,
    key: String,
    content_type: String,
    metadata: HashMap<String, String>,
    buffer: Vec<u8>,
    committed: bool,
    ctx: CallContext,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        if this.ctx.is_cancelled() {
            return Poll::Ready(Err(BlobError::cancelled().into()));
        }
        if this.committed {
            return Poll::Ready(Err(BlobError::ClosedHandle("write after shutdown".to_string()).into()));
        }
        this.buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.committed {
            return Poll::Ready(Ok(()));
        }
        if this.ctx.is_cancelled() {
            this.buffer = Vec::new();
            return Poll::Ready(Err(BlobError::cancelled().into()));
        }
        let data = Bytes::from(std::mem::take(&mut this.buffer));
        let object = StoredObject {
            md5: md5::compute(&data).0,
            data,
            content_type: this.content_type.clone(),
            metadata: std::mem::take(&mut this.metadata),
            modified: Utc::now(),
        };
        this.objects.write().insert(this.key.clone(), object);
        this.committed = true;
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn put(driver: &MemoryDriver, key: &str, data: &[u8]) {
        let ctx = CallContext::background();
        let mut w = driver.open_writer(&ctx, key, &WriterOptions::default()).await.unwrap();
        w.write_all(data).await.unwrap();
        w.shutdown().await.unwrap();
    }

    async fn get(driver: &MemoryDriver, key: &str, range: Option<ByteRange>) -> Result<Vec<u8>> {
        let mut reader = driver.open_reader(&CallContext::background(), key, range).await?;
        let mut out = Vec::new();
        reader.body.read_to_end(&mut out).await?;
        Ok(out)
    }

    #[tokio::test]
    async fn test_write_read_replace() {
        let driver = MemoryDriver::new("b");
        put(&driver, "k", b"first").await;
        put(&driver, "k", b"second").await;
        assert_eq!(get(&driver, "k", None).await.unwrap(), b"second");
        assert_eq!(get(&driver, "k", Some(ByteRange::new(1, Some(3)))).await.unwrap(), b"eco");

        let meta = driver.attributes(&CallContext::background(), "k").await.unwrap();
        assert_eq!(meta.size, 6);
        assert_eq!(meta.etag.as_deref(), Some(hex::encode(md5::compute(b"second").0).as_str()));
    }

    #[tokio::test]
    async fn test_uncommitted_writer_invisible() {
        let driver = MemoryDriver::new("b");
        put(&driver, "k", b"old").await;
        let ctx = CallContext::background();
        let mut w = driver.open_writer(&ctx, "k", &WriterOptions::default()).await.unwrap();
        w.write_all(b"new but never closed").await.unwrap();
        drop(w);
        assert_eq!(get(&driver, "k", None).await.unwrap(), b"old");

        let ctx = CallContext::background();
        let mut w = driver.open_writer(&ctx, "k2", &WriterOptions::default()).await.unwrap();
        w.write_all(b"partial").await.unwrap();
        ctx.cancel();
        assert!(w.shutdown().await.is_err());
        let err = get(&driver, "k2", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let driver = MemoryDriver::new("b");
        for key in ["a/1", "a/2", "b/1"] {
            put(&driver, key, b"x").await;
        }
        let ctx = CallContext::background();
        driver.delete(&ctx, "a/2").await.unwrap();
        let err = driver.delete(&ctx, "a/2").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let page = driver
            .list_page(
                &ctx,
                &ListQuery {
                    prefix: "a/".into(),
                    page_size: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a/1"]);
    }

    #[tokio::test]
    async fn test_copy() {
        let driver = MemoryDriver::new("b");
        put(&driver, "src", b"payload").await;
        driver.copy(&CallContext::background(), "dst", "src").await.unwrap();
        assert_eq!(get(&driver, "dst", None).await.unwrap(), b"payload");
    }
}
