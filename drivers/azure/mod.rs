//! Azure Blob Storage driver over the REST API / Azure Blob存储驱动

mod config;
mod driver;
mod factory;
mod signer;
mod types;
mod writer;

pub use config::{AzureAuth, AzureConfig};
pub use driver::AzureDriver;
pub use factory::AzureDriverFactory;
pub use signer::SharedKey;
