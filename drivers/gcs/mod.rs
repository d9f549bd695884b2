//! Google Cloud Storage driver over the JSON API / GCS对象存储驱动

mod auth;
mod config;
mod driver;
mod factory;
mod types;
mod writer;

pub use auth::TokenSource;
pub use config::GcsConfig;
pub use driver::GcsDriver;
pub use factory::GcsDriverFactory;
