//! Local directory driver / 本地目录驱动

mod driver;
mod writer;

pub use driver::LocalDriver;

use std::path::PathBuf;

use crate::error::{BlobError, Result};
use crate::storage::{DriverFactory, DriverRequest, StorageDriver};

/// Local driver factory / 本地驱动工厂
///
/// The bucket name is the path of an existing directory. It is never
/// created here; `probe` reports a missing directory.
pub struct LocalDriverFactory;

impl DriverFactory for LocalDriverFactory {
    fn driver_type(&self) -> &'static str {
        "file"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["local"]
    }

    fn create_driver(&self, request: &DriverRequest<'_>) -> Result<Box<dyn StorageDriver>> {
        if request.bucket.is_empty() {
            return Err(BlobError::InvalidArgument("file bucket needs a directory path".to_string()));
        }
        let root = PathBuf::from(request.bucket);

        // 确保是绝对路径
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()
                .map_err(|e| BlobError::Unknown(format!("cannot resolve working directory: {}", e)))?
                .join(root)
        };
        Ok(Box::new(LocalDriver::new(root)))
    }
}
