//! GCS JSON API payloads / GCS API响应结构

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BlobError;
use crate::storage::ObjectMetadata;

/// Object resource / 对象资源
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GcsObject {
    pub name: String,
    /// int64 encoded as a string
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
    #[serde(default)]
    pub etag: Option<String>,
    /// Base64 MD5 of the content
    #[serde(default)]
    pub md5_hash: Option<String>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(default)]
    pub generation: Option<String>,
}

impl GcsObject {
    pub fn into_metadata(self) -> ObjectMetadata {
        ObjectMetadata {
            size: self.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0),
            content_type: self.content_type,
            modified: self
                .updated
                .as_deref()
                .and_then(|u| DateTime::parse_from_rfc3339(u).ok())
                .map(|d| d.with_timezone(&Utc)),
            etag: self.etag,
            md5: self.md5_hash.as_deref().and_then(|h| STANDARD.decode(h).ok()),
            metadata: self.metadata.unwrap_or_default(),
            ..ObjectMetadata::new(self.name, 0)
        }
    }
}

/// Objects: list response / 列举响应
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ListResponse {
    #[serde(default)]
    pub items: Vec<GcsObject>,
    #[serde(default)]
    pub prefixes: Vec<String>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Objects: rewrite response / 服务端复制响应
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RewriteResponse {
    pub done: bool,
    #[serde(default)]
    pub rewrite_token: Option<String>,
}

/// Metadata sent when a resumable upload starts / 上传初始化请求体
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct UploadInit<'a> {
    pub name: &'a str,
    pub content_type: &'a str,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: &'a HashMap<String, String>,
}

/// Token刷新响应
#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Token错误
#[derive(Debug, Deserialize)]
pub(super) struct TokenError {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// API错误
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorItem {
    #[serde(default)]
    reason: Option<String>,
}

/// Map an error response by its first reason, then by status / 映射GCS错误
pub(super) fn api_error(status: u16, body: &str) -> BlobError {
    let Ok(parsed) = serde_json::from_str::<ApiError>(body) else {
        let snippet: String = body.chars().take(200).collect();
        return BlobError::from_status(status, format!("HTTP {}: {}", status, snippet));
    };
    let reason = parsed
        .error
        .errors
        .iter()
        .find_map(|e| e.reason.clone())
        .unwrap_or_default();
    let message = format!("{} (HTTP {}, {})", parsed.error.message, status, reason);
    match reason.as_str() {
        "notFound" => BlobError::NotFound(message),
        "forbidden" | "insufficientPermissions" | "accessDenied" | "authError" | "required"
        | "unauthorized" => BlobError::Permission(message),
        "rateLimitExceeded" | "userRateLimitExceeded" | "quotaExceeded" | "tooManyRequests" => {
            BlobError::Throttled(message)
        }
        "backendError" | "internalError" => BlobError::Connection(message),
        "invalid" | "invalidArgument" | "badRequest" | "required_parameter" => BlobError::InvalidArgument(message),
        _ => BlobError::from_status(status, message),
    }
}
