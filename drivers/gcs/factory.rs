//! GCS驱动工厂

use crate::error::Result;
use crate::storage::{DriverFactory, DriverRequest, StorageDriver};

use super::config::GcsConfig;
use super::driver::GcsDriver;

/// GCS驱动工厂
pub struct GcsDriverFactory;

impl DriverFactory for GcsDriverFactory {
    fn driver_type(&self) -> &'static str {
        "gcp"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["gcs"]
    }

    fn create_driver(&self, request: &DriverRequest<'_>) -> Result<Box<dyn StorageDriver>> {
        let config = GcsConfig::from_credentials(request.bucket, request.credentials)?;
        tracing::debug!(
            "Creating GCS driver: bucket={}, base_url={}, auth={:?}",
            config.bucket,
            config.base_url,
            config.token_source
        );
        Ok(Box::new(GcsDriver::new(config, request.settings.clone())?))
    }
}
