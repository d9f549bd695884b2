//! Streaming part upload shared by the network drivers / 分片流式上传
//!
//! - The writer buffers one part, hands it to a background task over a
//!   bounded channel and keeps accepting bytes: at most
//!   `MAX_BUFFER_CHUNKS + 2` parts live in memory.
//! - The task holds back the newest part so the backend learns which part
//!   is the last one.
//! - Dropping the writer or cancelling its context aborts the session; the
//!   object only becomes visible through `UploadSession::complete`.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::PollSender;

use crate::context::CallContext;
use crate::error::{BlobError, Result};

const MAX_BUFFER_CHUNKS: usize = 2; // channel容量2
const ABORT_TIMEOUT: Duration = Duration::from_secs(30);

/// One part handed to the backend / 单个分片
#[derive(Debug, Clone)]
pub struct PartUpload {
    /// 1-based part number / 分片序号
    pub number: u32,
    /// Byte offset of this part within the object / 分片偏移
    pub offset: u64,
    pub data: Bytes,
    /// Final part. Only a zero-length object has an empty one, since a full
    /// chunk is always held back for it
    pub last: bool,
}

impl PartUpload {
    /// The whole object fits in this single part / 单分片即完整对象
    pub fn is_whole_object(&self) -> bool {
        self.last && self.number == 1
    }
}

/// Backend side of an upload / 后端上传会话
#[async_trait]
pub trait UploadSession: Send + 'static {
    /// Upload one part, called sequentially in order / 上传分片
    async fn upload_part(&mut self, part: PartUpload) -> Result<()>;

    /// Make the uploaded parts visible as one object / 完成上传
    async fn complete(&mut self) -> Result<()>;

    /// Discard uploaded parts, best effort / 取消上传
    async fn abort(&mut self);
}

/// 分片数据
enum ChunkData {
    Part(Bytes),
    Complete,
}

/// Background task driving one session / 后台上传任务
async fn run_upload<S: UploadSession>(
    mut session: S,
    ctx: CallContext,
    mut rx: mpsc::Receiver<ChunkData>,
    key: String,
) -> Result<()> {
    let mut held: Option<Bytes> = None;
    let mut number = 1u32;
    let mut offset = 0u64;

    let result = loop {
        let message = tokio::select! {
            biased;
            _ = ctx.cancelled() => break Err(BlobError::cancelled()),
            message = rx.recv() => message,
        };

        match message {
            Some(ChunkData::Part(data)) => {
                if let Some(previous) = held.replace(data) {
                    let len = previous.len() as u64;
                    let part = PartUpload {
                        number,
                        offset,
                        data: previous,
                        last: false,
                    };
                    tracing::debug!("Uploading part: key={}, part={}, size={}", key, number, len);
                    if let Err(e) = ctx.run(session.upload_part(part)).await {
                        break Err(e);
                    }
                    number += 1;
                    offset += len;
                }
            }
            Some(ChunkData::Complete) => {
                let part = PartUpload {
                    number,
                    offset,
                    data: held.take().unwrap_or_default(),
                    last: true,
                };
                tracing::debug!("Uploading last part: key={}, part={}, size={}", key, number, part.data.len());
                if let Err(e) = ctx.run(session.upload_part(part)).await {
                    break Err(e);
                }
                break ctx.run(session.complete()).await;
            }
            None => {
                break Err(BlobError::Cancelled(format!(
                    "writer for {} dropped before close",
                    key
                )))
            }
        }
    };

    match &result {
        Ok(()) => tracing::debug!("Upload completed: key={}", key),
        Err(e) => {
            tracing::debug!("Upload aborted: key={}, reason={}", key, e);
            if tokio::time::timeout(ABORT_TIMEOUT, session.abort()).await.is_err() {
                tracing::warn!("Abort timed out: key={}", key);
            }
        }
    }
    result
}

#[derive(Clone, Copy, PartialEq, Debug)]
enum ShutdownState {
    NotStarted,
    SendingRemainder,
    SendingComplete,
    Waiting,
    Done,
}

/// `AsyncWrite` front of a background [`UploadSession`] / 分片上传写入器
pub struct ChunkedUploadWriter {
    tx: PollSender<ChunkData>,
    result_rx: Option<oneshot::Receiver<Result<()>>>,
    buffer: BytesMut,
    chunk_size: usize,
    /// 待发送的分片
    pending: Option<ChunkData>,
    state: ShutdownState,
    failed: Option<BlobError>,
    ctx: CallContext,
}

impl ChunkedUploadWriter {
    /// Spawn the upload task and return its writer / 启动上传任务
    pub fn spawn<S: UploadSession>(session: S, ctx: &CallContext, key: &str, chunk_size: usize) -> Self {
        let (tx, rx) = mpsc::channel::<ChunkData>(MAX_BUFFER_CHUNKS);
        let (result_tx, result_rx) = oneshot::channel::<Result<()>>();

        let task_ctx = ctx.clone();
        let task_key = key.to_string();
        tokio::spawn(async move {
            let result = run_upload(session, task_ctx, rx, task_key).await;
            let _ = result_tx.send(result);
        });

        let chunk_size = chunk_size.max(1);
        Self {
            tx: PollSender::new(tx),
            result_rx: Some(result_rx),
            buffer: BytesMut::with_capacity(chunk_size),
            chunk_size,
            pending: None,
            state: ShutdownState::NotStarted,
            failed: None,
            ctx: ctx.clone(),
        }
    }

    fn fail(&mut self, err: BlobError) -> io::Error {
        self.failed = Some(err.clone());
        err.into()
    }

    /// The channel closed early: the task's result says why / 获取任务错误
    fn poll_task_error(&mut self, cx: &mut Context<'_>) -> Poll<io::Error> {
        let err = match self.result_rx.as_mut() {
            Some(rx) => match ready!(Pin::new(rx).poll(cx)) {
                Ok(Err(e)) => e,
                Ok(Ok(())) => BlobError::Unknown("upload finished before all data was sent".to_string()),
                Err(_) => BlobError::Unknown("upload task terminated unexpectedly".to_string()),
            },
            None => BlobError::Unknown("upload channel closed".to_string()),
        };
        self.result_rx = None;
        Poll::Ready(self.fail(err))
    }

    /// Hand the pending chunk to the task once the channel has room / 发送待发分片
    fn poll_send_pending(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.pending.is_none() {
            return Poll::Ready(Ok(()));
        }
        match ready!(self.tx.poll_reserve(cx)) {
            Ok(()) => {
                if let Some(item) = self.pending.take() {
                    if self.tx.send_item(item).is_err() {
                        let err = ready!(self.poll_task_error(cx));
                        return Poll::Ready(Err(err));
                    }
                }
                Poll::Ready(Ok(()))
            }
            Err(_) => {
                let err = ready!(self.poll_task_error(cx));
                Poll::Ready(Err(err))
            }
        }
    }

    fn check_usable(&mut self) -> io::Result<()> {
        if let Some(err) = &self.failed {
            return Err(err.clone().into());
        }
        if self.ctx.is_cancelled() {
            return Err(self.fail(BlobError::cancelled()));
        }
        Ok(())
    }
}

impl AsyncWrite for ChunkedUploadWriter {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.check_usable()?;
        if this.state != ShutdownState::NotStarted {
            return Poll::Ready(Err(BlobError::ClosedHandle("write after shutdown".to_string()).into()));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        // 如果有待发送的分片，必须先发送完，不接受新数据
        ready!(this.poll_send_pending(cx))?;

        let space = this.chunk_size - this.buffer.len();
        let accepted = buf.len().min(space);
        this.buffer.extend_from_slice(&buf[..accepted]);

        if this.buffer.len() >= this.chunk_size {
            let chunk = this.buffer.split().freeze();
            this.pending = Some(ChunkData::Part(chunk));
            if let Poll::Ready(Err(e)) = this.poll_send_pending(cx) {
                return Poll::Ready(Err(e));
            }
        }

        Poll::Ready(Ok(accepted))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.check_usable()?;
        this.poll_send_pending(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            match this.state {
                ShutdownState::NotStarted => {
                    this.check_usable()?;
                    ready!(this.poll_send_pending(cx))?;
                    if !this.buffer.is_empty() {
                        let chunk = this.buffer.split().freeze();
                        this.pending = Some(ChunkData::Part(chunk));
                    }
                    this.state = ShutdownState::SendingRemainder;
                }
                ShutdownState::SendingRemainder => {
                    ready!(this.poll_send_pending(cx))?;
                    this.pending = Some(ChunkData::Complete);
                    this.state = ShutdownState::SendingComplete;
                }
                ShutdownState::SendingComplete => {
                    ready!(this.poll_send_pending(cx))?;
                    this.tx.close();
                    this.state = ShutdownState::Waiting;
                }
                ShutdownState::Waiting => {
                    let Some(rx) = this.result_rx.as_mut() else {
                        this.state = ShutdownState::Done;
                        continue;
                    };
                    let outcome = ready!(Pin::new(rx).poll(cx));
                    this.result_rx = None;
                    this.state = ShutdownState::Done;
                    match outcome {
                        Ok(Ok(())) => return Poll::Ready(Ok(())),
                        Ok(Err(e)) => return Poll::Ready(Err(this.fail(e))),
                        Err(_) => {
                            let err = BlobError::Unknown("upload task terminated unexpectedly".to_string());
                            return Poll::Ready(Err(this.fail(err)));
                        }
                    }
                }
                ShutdownState::Done => {
                    return match &this.failed {
                        Some(err) => Poll::Ready(Err(err.clone().into())),
                        None => Poll::Ready(Ok(())),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;

    #[derive(Default)]
    struct Recorded {
        parts: Vec<(u32, u64, Vec<u8>, bool)>,
        completed: bool,
        aborted: bool,
    }

    struct FakeSession {
        log: Arc<Mutex<Recorded>>,
        fail_on_part: Option<u32>,
    }

    #[async_trait]
    impl UploadSession for FakeSession {
        async fn upload_part(&mut self, part: PartUpload) -> Result<()> {
            if self.fail_on_part == Some(part.number) {
                return Err(BlobError::Permission("AccessDenied".into()));
            }
            self.log
                .lock()
                .parts
                .push((part.number, part.offset, part.data.to_vec(), part.last));
            Ok(())
        }

        async fn complete(&mut self) -> Result<()> {
            self.log.lock().completed = true;
            Ok(())
        }

        async fn abort(&mut self) {
            self.log.lock().aborted = true;
        }
    }

    fn session(fail_on_part: Option<u32>) -> (FakeSession, Arc<Mutex<Recorded>>) {
        let log = Arc::new(Mutex::new(Recorded::default()));
        (
            FakeSession {
                log: log.clone(),
                fail_on_part,
            },
            log,
        )
    }

    #[tokio::test]
    async fn test_parts_split_and_last_flag() {
        let (session, log) = session(None);
        let mut writer = ChunkedUploadWriter::spawn(session, &CallContext::background(), "k", 4);
        writer.write_all(b"0123456789").await.unwrap();
        writer.shutdown().await.unwrap();

        let log = log.lock();
        assert!(log.completed);
        assert!(!log.aborted);
        assert_eq!(
            log.parts,
            vec![
                (1, 0, b"0123".to_vec(), false),
                (2, 4, b"4567".to_vec(), false),
                (3, 8, b"89".to_vec(), true),
            ]
        );
    }

    #[tokio::test]
    async fn test_boundary_payload_ends_with_held_part() {
        let (session, log) = session(None);
        let mut writer = ChunkedUploadWriter::spawn(session, &CallContext::background(), "k", 4);
        writer.write_all(b"01234567").await.unwrap();
        writer.shutdown().await.unwrap();

        let log = log.lock();
        assert_eq!(log.parts.len(), 2);
        assert_eq!(log.parts[1], (2, 4, b"4567".to_vec(), true));
    }

    #[tokio::test]
    async fn test_empty_object_single_last_part() {
        let (session, log) = session(None);
        let mut writer = ChunkedUploadWriter::spawn(session, &CallContext::background(), "k", 4);
        writer.shutdown().await.unwrap();

        let log = log.lock();
        assert_eq!(log.parts, vec![(1, 0, Vec::new(), true)]);
        assert!(log.completed);
    }

    #[tokio::test]
    async fn test_drop_without_shutdown_aborts() {
        let (session, log) = session(None);
        let mut writer = ChunkedUploadWriter::spawn(session, &CallContext::background(), "k", 4);
        writer.write_all(b"0123456789").await.unwrap();
        drop(writer);

        for _ in 0..100 {
            if log.lock().aborted {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let log = log.lock();
        assert!(log.aborted);
        assert!(!log.completed);
    }

    #[tokio::test]
    async fn test_cancel_aborts_and_fails_shutdown() {
        let (session, log) = session(None);
        let ctx = CallContext::background();
        let mut writer = ChunkedUploadWriter::spawn(session, &ctx, "k", 4);
        writer.write_all(b"01").await.unwrap();
        ctx.cancel();
        let err: BlobError = writer.shutdown().await.unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        for _ in 0..100 {
            if log.lock().aborted {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(log.lock().aborted);
        assert!(!log.lock().completed);
    }

    #[tokio::test]
    async fn test_part_failure_surfaces_normalized_error() {
        let (session, log) = session(Some(1));
        let mut writer = ChunkedUploadWriter::spawn(session, &CallContext::background(), "k", 4);
        let write_result = writer.write_all(b"0123456789abcdef").await;
        let err: BlobError = match write_result {
            Err(e) => e.into(),
            Ok(()) => writer.shutdown().await.unwrap_err().into(),
        };
        assert_eq!(err.kind(), ErrorKind::Permission);
        assert!(log.lock().aborted);
        assert!(!log.lock().completed);
    }
}
