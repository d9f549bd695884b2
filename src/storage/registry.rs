use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{BlobConfig, HttpConfig, UploadConfig};
use crate::credentials::CredentialSource;
use crate::error::{BlobError, Result};
use crate::retry::RetryPolicy;

use super::StorageDriver;

/// Per-driver tuning derived from the client config / 驱动运行参数
#[derive(Debug, Clone, Default)]
pub struct DriverSettings {
    pub retry: RetryPolicy,
    pub upload: UploadConfig,
    pub http: HttpConfig,
}

impl From<&BlobConfig> for DriverSettings {
    fn from(config: &BlobConfig) -> Self {
        Self {
            retry: RetryPolicy::from(&config.retry),
            upload: config.upload.clone(),
            http: config.http.clone(),
        }
    }
}

/// Everything a factory needs to build one driver / 创建驱动所需参数
pub struct DriverRequest<'a> {
    pub bucket: &'a str,
    pub credentials: &'a dyn CredentialSource,
    pub settings: &'a DriverSettings,
}

/// Driver factory trait / 驱动工厂 trait
///
/// `create_driver` acquires credentials and builds the client. It must not
/// touch the network; reachability is checked afterwards with `probe`.
pub trait DriverFactory: Send + Sync {
    /// Provider name the factory is registered under / 驱动类型名称
    fn driver_type(&self) -> &'static str;

    /// Extra names accepted for this provider / 别名
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// Create driver instance / 创建驱动实例
    fn create_driver(&self, request: &DriverRequest<'_>) -> Result<Box<dyn StorageDriver>>;
}

/// Explicit table of driver factories keyed by provider name / 驱动注册表
///
/// Built by the caller and handed to the resolver; there is no
/// process-wide registry.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: HashMap<String, Arc<dyn DriverFactory>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register driver factory under its type name and aliases / 注册驱动工厂
    pub fn register(&mut self, factory: impl DriverFactory + 'static) -> &mut Self {
        let factory: Arc<dyn DriverFactory> = Arc::new(factory);
        let driver_type = factory.driver_type();
        for name in std::iter::once(driver_type).chain(factory.aliases().iter().copied()) {
            self.factories.insert(name.to_string(), factory.clone());
        }
        tracing::info!("Driver factory registered: {}", driver_type);
        self
    }

    pub fn with(mut self, factory: impl DriverFactory + 'static) -> Self {
        self.register(factory);
        self
    }

    /// Look up a factory, `UnsupportedProvider` when unknown / 查找驱动工厂
    pub fn get(&self, provider: &str) -> Result<Arc<dyn DriverFactory>> {
        self.factories
            .get(provider)
            .cloned()
            .ok_or_else(|| BlobError::UnsupportedProvider(format!("no driver registered for {:?}", provider)))
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.factories.contains_key(provider)
    }

    /// List all registered provider names (sorted) / 列出所有驱动类型
    pub fn list_driver_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}
