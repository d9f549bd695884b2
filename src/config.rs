//! Client configuration module / 客户端配置模块
//!
//! Tuning knobs shared by every driver: retry policy, upload chunking and
//! HTTP timeouts. Loaded from a JSON file when one exists, defaults otherwise.
//! Credentials never live here; they come from a `CredentialSource`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name looked up in the working directory / 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "cloudblob.json";

/// Minimum part size accepted by S3 multipart upload (5 MiB) / S3最小分片
pub const MIN_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Application configuration / 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Retry configuration / 重试配置
    pub retry: RetryConfig,
    /// Upload and listing configuration / 上传与列举配置
    pub upload: UploadConfig,
    /// HTTP client configuration / HTTP客户端配置
    pub http: HttpConfig,
}

/// Retry configuration / 重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one / 总尝试次数
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

/// Upload configuration / 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Bytes buffered per part before it is sent / 分片大小（字节）
    pub chunk_size: usize,
    /// Objects requested per list page / 每页列举数量
    pub list_page_size: usize,
}

/// HTTP configuration / HTTP配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8 * 1024 * 1024,
            list_page_size: 1000,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 300,
            connect_timeout_secs: 30,
        }
    }
}

impl UploadConfig {
    /// Per-writer override or the configured size, clamped to what every
    /// backend accepts / 规范化分片大小
    pub fn effective_chunk_size(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.chunk_size).max(MIN_CHUNK_SIZE)
    }

    pub fn effective_page_size(&self) -> usize {
        self.list_page_size.clamp(1, 1000)
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

/// Get the default config file path / 获取默认配置文件路径
fn default_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(DEFAULT_CONFIG_FILE)
}

/// Load configuration from `path`, or from `./cloudblob.json` when present.
/// An explicit path must exist; the implicit one falls back to defaults.
/// 加载配置文件，不存在则使用默认配置
pub fn load_config(path: Option<&Path>) -> anyhow::Result<BlobConfig> {
    use anyhow::Context;

    let (config_path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (default_config_path(), false),
    };

    if !explicit && !config_path.exists() {
        tracing::debug!("No config file at {:?}, using defaults", config_path);
        return Ok(BlobConfig::default());
    }

    let content = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config file {:?}", config_path))?;
    let config = parse_config(&content)
        .with_context(|| format!("Failed to parse config file {:?}", config_path))?;

    tracing::info!("Loaded configuration from {:?}", config_path);
    Ok(config)
}

pub fn parse_config(content: &str) -> serde_json::Result<BlobConfig> {
    serde_json::from_str(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = parse_config(r#"{"retry": {"max_attempts": 7}}"#).unwrap();
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.initial_backoff_ms, 100);
        assert_eq!(config.upload.chunk_size, 8 * 1024 * 1024);
        assert_eq!(config.http.connect_timeout_secs, 30);
    }

    #[test]
    fn test_chunk_size_clamped() {
        let upload = UploadConfig {
            chunk_size: 1024,
            list_page_size: 5000,
        };
        assert_eq!(upload.effective_chunk_size(None), MIN_CHUNK_SIZE);
        assert_eq!(upload.effective_chunk_size(Some(MIN_CHUNK_SIZE * 2)), MIN_CHUNK_SIZE * 2);
        assert_eq!(upload.effective_page_size(), 1000);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(load_config(Some(&missing)).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{"upload": {"list_page_size": 10}}"#).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.upload.list_page_size, 10);
    }
}
