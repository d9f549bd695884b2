//! S3 error normalization / S3错误映射

use s3::error::S3Error;
use serde::Deserialize;

use crate::error::BlobError;

/// `<Error><Code>..</Code><Message>..</Message></Error>` body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

/// Map an S3 error code, falling back to the HTTP status / 按错误码映射
pub(super) fn from_code(code: &str, status: u16, message: String) -> BlobError {
    match code {
        "NoSuchKey" | "NoSuchBucket" | "NoSuchUpload" | "NotFound" => BlobError::NotFound(message),
        "AccessDenied" | "AllAccessDisabled" | "AccountProblem" | "InvalidAccessKeyId"
        | "SignatureDoesNotMatch" | "ExpiredToken" | "InvalidToken" | "TokenRefreshRequired" => {
            BlobError::Permission(message)
        }
        "SlowDown" | "Throttling" | "ThrottlingException" | "RequestLimitExceeded"
        | "TooManyRequests" | "ServiceUnavailable" => BlobError::Throttled(message),
        "RequestTimeout" | "InternalError" | "RequestTimeTooSkewed" => BlobError::Connection(message),
        "InvalidArgument" | "InvalidRange" | "EntityTooSmall" | "EntityTooLarge" | "KeyTooLongError"
        | "InvalidPart" | "InvalidPartOrder" | "MalformedXML" => BlobError::InvalidArgument(message),
        _ => BlobError::from_status(status, message),
    }
}

/// Map a non-success response from its status and XML body / 映射错误响应
pub(super) fn from_response(status: u16, body: &str) -> BlobError {
    match quick_xml::de::from_str::<ErrorBody>(body) {
        Ok(err) => {
            let message = if err.message.is_empty() {
                format!("{} (HTTP {})", err.code, status)
            } else {
                format!("{}: {} (HTTP {})", err.code, err.message, status)
            };
            from_code(&err.code, status, message)
        }
        Err(_) => BlobError::from_status(status, format!("HTTP {}", status)),
    }
}

/// Map an error returned by rust-s3 / 映射rust-s3错误
pub(super) fn from_s3_error(err: S3Error) -> BlobError {
    match err {
        S3Error::HttpFailWithBody(status, body) => from_response(status, &body),
        other => {
            let message = other.to_string();
            let lower = message.to_ascii_lowercase();
            if lower.contains("credential") {
                BlobError::Authentication(message)
            } else if lower.contains("timed out")
                || lower.contains("timeout")
                || lower.contains("connect")
                || lower.contains("dns")
                || lower.contains("error sending request")
                || lower.contains("broken pipe")
                || lower.contains("reset by peer")
            {
                BlobError::Connection(message)
            } else {
                BlobError::Unknown(message)
            }
        }
    }
}

/// Error for a response whose status is not 2xx / 检查响应状态
pub(super) fn check_status(status: u16, body: &[u8]) -> Result<(), BlobError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(from_response(status, &String::from_utf8_lossy(body)))
    }
}
