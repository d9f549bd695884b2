//! Azure驱动工厂

use crate::error::Result;
use crate::storage::{DriverFactory, DriverRequest, StorageDriver};

use super::config::AzureConfig;
use super::driver::AzureDriver;

/// Azure驱动工厂
pub struct AzureDriverFactory;

impl DriverFactory for AzureDriverFactory {
    fn driver_type(&self) -> &'static str {
        "azure"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["azblob"]
    }

    fn create_driver(&self, request: &DriverRequest<'_>) -> Result<Box<dyn StorageDriver>> {
        let config = AzureConfig::from_credentials(request.bucket, request.credentials)?;
        tracing::debug!(
            "Creating Azure driver: account={}, container={}, endpoint={}",
            config.account,
            config.container,
            config.endpoint
        );
        Ok(Box::new(AzureDriver::new(config, request.settings.clone())?))
    }
}
