use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;

use crate::context::CallContext;
use crate::error::{BlobError, Result};

use super::driver::{attrs_path, join_error, map_io, BlobAttrs, TEMP_PREFIX};

#[derive(Debug, Clone, Copy, PartialEq)]
enum WriterState {
    Writing,
    Flushing,
    Committing,
    Done,
    Failed,
}

/// Streams into a temp file and renames it over the key on shutdown
/// 本地写入器：临时文件 + 原子重命名
pub(super) struct LocalWriter {
    file: Option<tokio::fs::File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    key: String,
    attrs: BlobAttrs,
    hasher: md5::Context,
    written: u64,
    state: WriterState,
    commit: Option<JoinHandle<io::Result<()>>>,
    error: Option<BlobError>,
    ctx: CallContext,
}

impl LocalWriter {
    pub(super) async fn create(
        ctx: &CallContext,
        key: &str,
        final_path: PathBuf,
        attrs: BlobAttrs,
    ) -> Result<Self> {
        let parent = final_path
            .parent()
            .map(PathBuf::from)
            .ok_or_else(|| BlobError::InvalidArgument(format!("key {:?} has no parent directory", key)))?;
        let temp_path = parent.join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4()));

        let temp = temp_path.clone();
        let file = tokio::task::spawn_blocking(move || {
            // Ensure parent directory exists / 确保父目录存在
            std::fs::create_dir_all(&parent)?;
            std::fs::File::create(&temp)
        })
        .await
        .map_err(join_error)?
        .map_err(|e| map_io(e, key))?;

        tracing::debug!("Local upload started: key={}, temp={:?}", key, temp_path);
        Ok(Self {
            file: Some(tokio::fs::File::from_std(file)),
            temp_path,
            final_path,
            key: key.to_string(),
            attrs,
            hasher: md5::Context::new(),
            written: 0,
            state: WriterState::Writing,
            commit: None,
            error: None,
            ctx: ctx.clone(),
        })
    }

    fn fail(&mut self, err: BlobError) -> io::Error {
        self.state = WriterState::Failed;
        self.file = None;
        let _ = std::fs::remove_file(&self.temp_path);
        self.error = Some(err.clone());
        err.into()
    }

    fn start_commit(&mut self) -> io::Result<()> {
        let digest = std::mem::replace(&mut self.hasher, md5::Context::new()).compute();
        self.attrs.md5 = hex::encode(digest.0);
        self.attrs.size = Some(self.written);
        let attrs_json = serde_json::to_string(&self.attrs)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let temp = self.temp_path.clone();
        let target = self.final_path.clone();
        self.commit = Some(tokio::task::spawn_blocking(move || {
            std::fs::File::open(&temp)?.sync_all()?;
            let mut attrs_temp = temp.clone().into_os_string();
            attrs_temp.push(".attrs");
            let attrs_temp = PathBuf::from(attrs_temp);
            std::fs::write(&attrs_temp, attrs_json)?;
            // sidecar first: readers match it to the content by size, so the
            // new content never shows up with the previous attributes
            if let Err(e) = std::fs::rename(&attrs_temp, attrs_path(&target)) {
                let _ = std::fs::remove_file(&attrs_temp);
                return Err(e);
            }
            std::fs::rename(&temp, &target)
        }));
        Ok(())
    }
}

impl AsyncWrite for LocalWriter {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.state != WriterState::Writing {
            let err = this
                .error
                .clone()
                .unwrap_or_else(|| BlobError::ClosedHandle("write after shutdown".to_string()));
            return Poll::Ready(Err(err.into()));
        }
        if this.ctx.is_cancelled() {
            return Poll::Ready(Err(this.fail(BlobError::cancelled())));
        }
        let Some(file) = this.file.as_mut() else {
            return Poll::Ready(Err(BlobError::ClosedHandle("file released".to_string()).into()));
        };
        match ready!(Pin::new(file).poll_write(cx, buf)) {
            Ok(n) => {
                this.hasher.consume(&buf[..n]);
                this.written += n as u64;
                Poll::Ready(Ok(n))
            }
            Err(e) => {
                let key = this.key.clone();
                Poll::Ready(Err(this.fail(map_io(e, &key))))
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.file.as_mut() {
            Some(file) => Pin::new(file).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match this.state {
                WriterState::Writing => {
                    if this.ctx.is_cancelled() {
                        return Poll::Ready(Err(this.fail(BlobError::cancelled())));
                    }
                    this.state = WriterState::Flushing;
                }
                WriterState::Flushing => {
                    if let Some(file) = this.file.as_mut() {
                        if let Err(e) = ready!(Pin::new(file).poll_shutdown(cx)) {
                            let key = this.key.clone();
                            return Poll::Ready(Err(this.fail(map_io(e, &key))));
                        }
                    }
                    this.file = None;
                    if let Err(e) = this.start_commit() {
                        return Poll::Ready(Err(this.fail(BlobError::from(e))));
                    }
                    this.state = WriterState::Committing;
                }
                WriterState::Committing => {
                    let Some(handle) = this.commit.as_mut() else {
                        this.state = WriterState::Done;
                        continue;
                    };
                    let outcome = ready!(Pin::new(handle).poll(cx));
                    this.commit = None;
                    match outcome {
                        Ok(Ok(())) => {
                            tracing::debug!("Local upload committed: key={}", this.key);
                            this.state = WriterState::Done;
                        }
                        Ok(Err(e)) => {
                            let key = this.key.clone();
                            return Poll::Ready(Err(this.fail(map_io(e, &key))));
                        }
                        Err(e) => return Poll::Ready(Err(this.fail(join_error(e)))),
                    }
                }
                WriterState::Done => return Poll::Ready(Ok(())),
                WriterState::Failed => {
                    let err = this
                        .error
                        .clone()
                        .unwrap_or_else(|| BlobError::Unknown("upload failed".to_string()));
                    return Poll::Ready(Err(err.into()));
                }
            }
        }
    }
}

impl Drop for LocalWriter {
    fn drop(&mut self) {
        // a running commit owns the temp file
        if matches!(self.state, WriterState::Writing | WriterState::Flushing) {
            self.file = None;
            let _ = std::fs::remove_file(&self.temp_path);
            tracing::debug!("Local upload discarded: key={}", self.key);
        }
    }
}
