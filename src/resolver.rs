//! Provider name + bucket name -> live [`Bucket`] / 驱动解析器
//!
//! The only place that knows provider names. Drivers come from an explicit
//! [`DriverRegistry`]; credentials from an injected [`CredentialSource`].

use std::fmt;
use std::sync::Arc;

use clap::ValueEnum;

use crate::bucket::Bucket;
use crate::config::BlobConfig;
use crate::context::CallContext;
use crate::credentials::{CredentialSource, EnvCredentials};
use crate::error::{BlobError, Result};
use crate::storage::{DriverRegistry, DriverRequest, DriverSettings};

/// Built-in providers / 内置提供方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Provider {
    /// Amazon S3 and S3-compatible stores
    Aws,
    /// Google Cloud Storage
    Gcp,
    /// Azure Blob Storage
    Azure,
    /// Local directory
    File,
    /// Process memory
    Mem,
}

impl Provider {
    /// Registry name / 注册名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Gcp => "gcp",
            Provider::Azure => "azure",
            Provider::File => "file",
            Provider::Mem => "mem",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 驱动解析器
#[derive(Clone)]
pub struct Resolver {
    registry: DriverRegistry,
    credentials: Arc<dyn CredentialSource>,
    settings: DriverSettings,
    page_size: usize,
}

impl Resolver {
    pub fn new(registry: DriverRegistry, credentials: Arc<dyn CredentialSource>, config: &BlobConfig) -> Self {
        Self {
            registry,
            credentials,
            settings: DriverSettings::from(config),
            page_size: config.upload.effective_page_size(),
        }
    }

    /// Resolver over every built-in driver / 使用内置驱动
    pub fn with_default_drivers(credentials: Arc<dyn CredentialSource>, config: &BlobConfig) -> Self {
        Self::new(crate::drivers::default_registry(), credentials, config)
    }

    /// Built-in drivers, process environment, default config
    pub fn from_env() -> Self {
        Self::with_default_drivers(Arc::new(EnvCredentials), &BlobConfig::default())
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    /// Build and probe a driver for `bucket` / 解析并连接存储桶
    ///
    /// Fails with `UnsupportedProvider` before any I/O for unknown names,
    /// with `Authentication` when credentials cannot be acquired and with
    /// `Connection` when the bucket cannot be reached.
    pub async fn resolve(&self, ctx: &CallContext, provider: &str, bucket: &str) -> Result<Bucket> {
        let factory = self.registry.get(provider)?;
        let request = DriverRequest {
            bucket,
            credentials: self.credentials.as_ref(),
            settings: &self.settings,
        };
        let driver = factory.create_driver(&request)?;

        // Verify driver validity before handing it out / 验证驱动有效性
        if let Err(e) = ctx.run(driver.probe(ctx)).await {
            if let Err(close_err) = driver.close().await {
                tracing::debug!("Closing unreachable driver failed: {}", close_err);
            }
            return Err(match e {
                BlobError::Cancelled(_) | BlobError::Authentication(_) => e,
                other => BlobError::Connection(format!(
                    "{} bucket {:?} is not reachable: {}",
                    provider, bucket, other
                )),
            });
        }

        tracing::info!("Resolved {} bucket {:?} ({})", provider, bucket, driver.name());
        Ok(Bucket::with_page_size(driver, self.page_size))
    }

    pub async fn resolve_provider(&self, ctx: &CallContext, provider: Provider, bucket: &str) -> Result<Bucket> {
        self.resolve(ctx, provider.as_str(), bucket).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::error::ErrorKind;
    use crate::storage::WriterOptions;

    fn resolver(credentials: StaticCredentials) -> Resolver {
        Resolver::with_default_drivers(Arc::new(credentials), &BlobConfig::default())
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let ctx = CallContext::background();
        let err = resolver(StaticCredentials::new())
            .resolve(&ctx, "unknown-cloud", "b")
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::UnsupportedProvider);
    }

    #[test]
    fn test_provider_names_are_registered() {
        let resolver = resolver(StaticCredentials::new());
        for provider in Provider::value_variants() {
            assert!(resolver.registry().contains(provider.as_str()), "{}", provider);
        }
    }

    #[tokio::test]
    async fn test_resolve_mem() {
        let ctx = CallContext::background();
        let bucket = resolver(StaticCredentials::new())
            .resolve_provider(&ctx, Provider::Mem, "scratch")
            .await
            .unwrap();
        assert_eq!(bucket.provider(), "mem");
        bucket.write(&ctx, "k", b"v", WriterOptions::default()).await.unwrap();
        bucket.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let ctx = CallContext::background();
        let resolver = resolver(StaticCredentials::new());
        for provider in [Provider::Aws, Provider::Gcp, Provider::Azure] {
            let err = resolver.resolve_provider(&ctx, provider, "photos").await.err().unwrap();
            assert_eq!(err.kind(), ErrorKind::Authentication, "{}", provider);
        }
    }

    #[tokio::test]
    async fn test_unreachable_bucket() {
        let ctx = CallContext::background();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = resolver(StaticCredentials::new())
            .resolve_provider(&ctx, Provider::File, missing.to_str().unwrap())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Connection);

        let source = StaticCredentials::new().with_var("STORAGE_EMULATOR_HOST", "127.0.0.1:9");
        let config = BlobConfig {
            retry: crate::config::RetryConfig {
                max_attempts: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = Resolver::with_default_drivers(Arc::new(source), &config)
            .resolve_provider(&ctx, Provider::Gcp, "photos")
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_cancelled_resolve() {
        let ctx = CallContext::background();
        ctx.cancel();
        let err = resolver(StaticCredentials::new())
            .resolve_provider(&ctx, Provider::Mem, "scratch")
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
