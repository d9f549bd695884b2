//! Cancellation and deadline carrier / 取消与截止时间
//!
//! Every bucket and driver operation takes a [`CallContext`]. Racing a
//! future against the context drops it on cancellation, which aborts any
//! in-flight HTTP request owned by that future.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{BlobError, Result};

#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// Context that is never cancelled and has no deadline / 无取消无超时
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().with_deadline(Instant::now() + timeout)
    }

    /// Keep the earlier of the existing and the new deadline / 取较早的截止时间
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Child shares cancellation with the parent but can be cancelled alone
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// Resolves once the token fires or the deadline passes / 等待取消
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Fail fast when the context is already done / 检查是否已取消
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(BlobError::cancelled())
        } else {
            Ok(())
        }
    }

    /// Run `fut` until it finishes or the context is done / 在上下文内执行
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(BlobError::cancelled()),
            result = fut => result,
        }
    }
}
