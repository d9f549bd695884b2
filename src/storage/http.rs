//! reqwest plumbing shared by the REST drivers / HTTP辅助函数

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use reqwest::{Client, Response};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::StreamReader;

use crate::config::HttpConfig;
use crate::context::CallContext;
use crate::error::{BlobError, Result};

use super::BoxReader;

/// Build the driver's connection pool / 创建HTTP客户端
///
/// Redirects are not followed: resumable upload endpoints answer with
/// status codes in the 3xx range that must reach the driver.
///
/// No total timeout is set here: it would also cut off streamed bodies.
/// Drivers put `HttpConfig::request_timeout` on each non-streaming request.
pub fn build_client(config: &HttpConfig) -> Result<Client> {
    Client::builder()
        .connect_timeout(config.connect_timeout())
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(concat!("cloudblob/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| BlobError::Unknown(format!("failed to build HTTP client: {}", e)))
}

/// Status code and body of a failed response / 读取错误响应
pub async fn error_body(response: Response) -> (u16, String) {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    (status, body)
}

/// Parse an RFC 1123 date as sent in `Last-Modified` headers / 解析HTTP日期
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Stream a response body as an `AsyncRead` that fails with `Cancelled`
/// once `ctx` is done / 流式读取响应体
pub fn body_reader(ctx: &CallContext, response: Response) -> BoxReader {
    let stream = response
        .bytes_stream()
        .map_err(|e| io::Error::from(BlobError::from_transport(&e)));
    Box::new(ContextReader::new(ctx, StreamReader::new(stream)))
}

/// `AsyncRead` wrapper that stops with `Cancelled` when its context fires
/// 可取消读取器
pub struct ContextReader<R> {
    inner: R,
    cancelled: Pin<Box<dyn Future<Output = ()> + Send>>,
}

impl<R> ContextReader<R> {
    pub fn new(ctx: &CallContext, inner: R) -> Self {
        let ctx = ctx.clone();
        Self {
            inner,
            cancelled: Box::pin(async move { ctx.cancelled().await }),
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ContextReader<R> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if self.cancelled.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(BlobError::cancelled().into()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}
