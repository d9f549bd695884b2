//! Azure Blob REST payloads and error mapping / Azure响应结构

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::HeaderMap;
use serde::Deserialize;

use crate::error::BlobError;
use crate::storage::http::parse_http_date;
use crate::storage::ObjectMetadata;

/// List Blobs response / 列举响应
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct EnumerationResults {
    #[serde(default)]
    pub blobs: Blobs,
    #[serde(default)]
    pub next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct Blobs {
    #[serde(rename = "$value", default)]
    pub entries: Vec<BlobEntry>,
}

#[derive(Debug, Deserialize)]
pub(super) enum BlobEntry {
    Blob(BlobItem),
    BlobPrefix(BlobPrefixItem),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct BlobItem {
    pub name: String,
    pub properties: BlobProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct BlobPrefixItem {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct BlobProperties {
    #[serde(rename = "Last-Modified", default)]
    pub last_modified: Option<String>,
    #[serde(rename = "Etag", default)]
    pub etag: Option<String>,
    #[serde(rename = "Content-Length", default)]
    pub content_length: Option<u64>,
    #[serde(rename = "Content-Type", default)]
    pub content_type: Option<String>,
    #[serde(rename = "Content-MD5", default)]
    pub content_md5: Option<String>,
}

fn decode_md5(value: Option<&str>) -> Option<Vec<u8>> {
    value.filter(|v| !v.is_empty()).and_then(|v| STANDARD.decode(v).ok())
}

impl BlobEntry {
    pub fn into_metadata(self) -> ObjectMetadata {
        match self {
            BlobEntry::Blob(blob) => {
                let props = blob.properties;
                ObjectMetadata {
                    content_type: props.content_type.filter(|c| !c.is_empty()),
                    modified: props.last_modified.as_deref().and_then(parse_http_date),
                    md5: decode_md5(props.content_md5.as_deref()),
                    etag: props.etag.map(|e| e.trim_matches('"').to_string()),
                    ..ObjectMetadata::new(blob.name, props.content_length.unwrap_or(0))
                }
            }
            BlobEntry::BlobPrefix(prefix) => ObjectMetadata::directory(prefix.name),
        }
    }
}

/// Metadata from Get Blob Properties headers / 从响应头解析元数据
pub(super) fn metadata_from_headers(key: &str, headers: &HeaderMap) -> ObjectMetadata {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let metadata: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            let field = name.as_str().strip_prefix("x-ms-meta-")?;
            Some((field.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect();
    ObjectMetadata {
        content_type: header("content-type").map(str::to_string),
        modified: header("last-modified").and_then(parse_http_date),
        etag: header("etag").map(|e| e.trim_matches('"').to_string()),
        md5: decode_md5(header("content-md5")),
        metadata,
        ..ObjectMetadata::new(key, header("content-length").and_then(|v| v.parse().ok()).unwrap_or(0))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

/// Map an Azure error code, falling back to the HTTP status / 按错误码映射
pub(super) fn from_code(code: &str, status: u16, message: String) -> BlobError {
    match code {
        "BlobNotFound" | "ContainerNotFound" | "ResourceNotFound" => BlobError::NotFound(message),
        "AuthenticationFailed" | "AuthorizationFailure" | "AuthorizationPermissionMismatch"
        | "InsufficientAccountPermissions" | "AccountIsDisabled" | "NoAuthenticationInformation" => {
            BlobError::Permission(message)
        }
        "ServerBusy" | "TooManyRequests" => BlobError::Throttled(message),
        "OperationTimedOut" | "InternalError" => BlobError::Connection(message),
        "InvalidRange" | "InvalidBlockList" | "InvalidBlockId" | "InvalidBlobOrBlock"
        | "InvalidQueryParameterValue" | "InvalidHeaderValue" | "InvalidMetadata"
        | "OutOfRangeInput" | "RequestBodyTooLarge" | "InvalidResourceName" => BlobError::InvalidArgument(message),
        _ => BlobError::from_status(status, message),
    }
}

/// Error for a failed response: `x-ms-error-code` first, then the XML body
pub(super) fn api_error(status: u16, error_code: Option<&str>, body: &str) -> BlobError {
    let parsed = quick_xml::de::from_str::<ErrorBody>(body).ok();
    let code = error_code
        .map(str::to_string)
        .or_else(|| parsed.as_ref().map(|p| p.code.clone()))
        .unwrap_or_default();
    let detail = parsed
        .map(|p| p.message.lines().next().unwrap_or("").to_string())
        .filter(|m| !m.is_empty());
    let message = match detail {
        Some(detail) => format!("{}: {} (HTTP {})", code, detail, status),
        None => format!("{} (HTTP {})", code, status),
    };
    from_code(&code, status, message)
}
