//! S3驱动工厂

use crate::error::Result;
use crate::storage::{DriverFactory, DriverRequest, StorageDriver};

use super::config::S3Config;
use super::driver::S3Driver;

/// S3驱动工厂
pub struct S3DriverFactory;

impl DriverFactory for S3DriverFactory {
    fn driver_type(&self) -> &'static str {
        "aws"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["s3"]
    }

    fn create_driver(&self, request: &DriverRequest<'_>) -> Result<Box<dyn StorageDriver>> {
        let config = S3Config::from_credentials(request.bucket, request.credentials)?;
        tracing::debug!(
            "Creating S3 driver: bucket={}, region={}, endpoint={}",
            config.bucket,
            config.region,
            config.endpoint
        );
        Ok(Box::new(S3Driver::new(config, request.settings.clone())?))
    }
}
