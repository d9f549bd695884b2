use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::ExitCode;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use anyhow::{anyhow, Context};
use clap::Parser;
use tokio::io::{AsyncRead, ReadBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cloudblob::config::load_config;
use cloudblob::{BlobError, Bucket, CallContext, EnvCredentials, Provider, Resolver, WriterOptions};

/// Upload a file to any supported blob store / 上传文件到对象存储
#[derive(Debug, Parser)]
#[command(
    name = "cloudblob",
    version,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_TARGET"), ", built ", env!("BUILD_TIME"), ")")
)]
struct Cli {
    /// Storage provider / 存储提供方
    #[arg(long, value_enum)]
    cloud: Provider,

    /// Bucket, container or directory / 存储桶名称
    #[arg(long, env = "CLOUDBLOB_BUCKET", default_value = "cloudblob-bucket")]
    bucket: String,

    /// Object key, defaults to the file name / 对象键
    #[arg(long)]
    key: Option<String>,

    /// JSON config file, `./cloudblob.json` when present / 配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    /// File to upload / 要上传的文件
    file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cloudblob=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", describe(&e));
            ExitCode::FAILURE
        }
    }
}

/// `<KindError>: <stage>: <message>` / 错误输出
fn describe(err: &anyhow::Error) -> String {
    match err.chain().find_map(|e| e.downcast_ref::<BlobError>()) {
        Some(blob) => format!("{}: {:#}", blob.kind(), err),
        None => format!("{:#}", err),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref()).context("setup: loading configuration")?;

    // Ctrl-C cancels whatever is in flight / 中断时取消
    let ctx = CallContext::background();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            interrupt.cancel();
        }
    });

    let resolver = Resolver::with_default_drivers(Arc::new(EnvCredentials), &config);
    let bucket = resolver
        .resolve_provider(&ctx, cli.cloud, &cli.bucket)
        .await
        .with_context(|| format!("setup: opening {} bucket {:?}", cli.cloud, cli.bucket))?;

    let uploaded = upload(&ctx, &bucket, &cli).await;
    let closed = bucket.close().await.context("close: releasing bucket");
    uploaded?;
    closed?;
    Ok(())
}

async fn upload(ctx: &CallContext, bucket: &Bucket, cli: &Cli) -> anyhow::Result<()> {
    let key = match &cli.key {
        Some(key) => key.clone(),
        None => cli
            .file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("read: {} has no file name", cli.file.display()))?,
    };

    let file = tokio::fs::File::open(&cli.file)
        .await
        .with_context(|| format!("read: opening {}", cli.file.display()))?;
    let mut source = SourceReader::new(file);

    let label = cli.file.display().to_string();
    let size = upload_from(ctx, bucket, &key, &mut source, &label).await?;

    tracing::info!("Uploaded {} ({} bytes) to {} bucket {:?} as {}", cli.file.display(), size, cli.cloud, cli.bucket, key);
    Ok(())
}

/// Stream `source` into `key` and commit it. A failure while reading the
/// local file is reported under `read:`, not `write:` / 上传并提交
async fn upload_from<R>(
    ctx: &CallContext,
    bucket: &Bucket,
    key: &str,
    source: &mut SourceReader<R>,
    label: &str,
) -> anyhow::Result<u64>
where
    R: AsyncRead + Unpin + Send,
{
    let mut writer = bucket.new_writer(ctx, key, WriterOptions::default());
    let size = match writer.copy_from(source).await {
        Ok(size) => size,
        Err(e) if source.failed() => {
            return Err(e).with_context(|| format!("read: reading {}", label));
        }
        Err(e) => {
            return Err(e).with_context(|| format!("write: uploading {} to {}", label, key));
        }
    };
    writer
        .close()
        .await
        .with_context(|| format!("close: committing {}", key))?;
    Ok(size)
}

/// Records whether the wrapped reader has failed / 记录读取失败
struct SourceReader<R> {
    inner: R,
    failed: bool,
}

impl<R> SourceReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, failed: false }
    }

    fn failed(&self) -> bool {
        self.failed
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for SourceReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Err(_)) = &poll {
            self.failed = true;
        }
        poll
    }
}
