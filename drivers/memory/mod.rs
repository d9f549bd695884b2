//! In-process memory driver / 内存驱动

mod driver;

pub use driver::MemoryDriver;

use crate::error::Result;
use crate::storage::{DriverFactory, DriverRequest, StorageDriver};

/// Memory driver factory / 内存驱动工厂
pub struct MemoryDriverFactory;

impl DriverFactory for MemoryDriverFactory {
    fn driver_type(&self) -> &'static str {
        "mem"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["memory"]
    }

    fn create_driver(&self, request: &DriverRequest<'_>) -> Result<Box<dyn StorageDriver>> {
        Ok(Box::new(MemoryDriver::new(request.bucket)))
    }
}
