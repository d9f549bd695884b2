//! Cloud-agnostic blob storage / 统一对象存储
//!
//! Resolve a [`Bucket`] for a provider name, then read, write, list and
//! delete objects the same way on every backend.

pub mod bucket;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod resolver;
pub mod retry;
pub mod storage;

// Driver modules (point to project root drivers via path attribute) / 驱动模块
#[path = "../drivers/mod.rs"]
pub mod drivers;

pub use bucket::{Bucket, ListIterator, ListOptions, Reader, Writer};
pub use config::BlobConfig;
pub use context::CallContext;
pub use credentials::{CredentialSource, EnvCredentials, StaticCredentials};
pub use error::{BlobError, ErrorKind, Result};
pub use resolver::{Provider, Resolver};
pub use storage::{ObjectMetadata, StorageDriver, WriterOptions};
