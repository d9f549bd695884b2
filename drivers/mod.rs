// Driver package / 驱动包
pub mod azure;
pub mod gcs;
pub mod local;
pub mod memory;
pub mod s3;

use crate::storage::DriverRegistry;

/// Register all drivers / 注册所有驱动
pub fn register_all(registry: &mut DriverRegistry) {
    // Register S3 driver / 注册S3对象存储驱动
    registry.register(s3::S3DriverFactory);
    // Register GCS driver / 注册GCS驱动
    registry.register(gcs::GcsDriverFactory);
    // Register Azure Blob driver / 注册Azure Blob驱动
    registry.register(azure::AzureDriverFactory);
    // Register local directory driver / 注册本地驱动
    registry.register(local::LocalDriverFactory);
    // Register in-memory driver / 注册内存驱动
    registry.register(memory::MemoryDriverFactory);
}

/// Registry holding every built-in driver / 内置驱动注册表
pub fn default_registry() -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    register_all(&mut registry);
    registry
}
