//! S3 driver (AWS and S3-compatible stores) / S3对象存储驱动

mod config;
mod driver;
mod errors;
mod factory;
mod writer;

pub use config::S3Config;
pub use driver::S3Driver;
pub use factory::S3DriverFactory;
