//! GCS驱动配置

use std::path::PathBuf;

use serde::Deserialize;

use crate::credentials::CredentialSource;
use crate::error::{BlobError, Result};

use super::auth::{parse_private_key, TokenSource, DEFAULT_TOKEN_URI};

const DEFAULT_BASE_URL: &str = "https://storage.googleapis.com";

/// GCS配置
#[derive(Debug, Clone)]
pub struct GcsConfig {
    /// 存储桶名称
    pub bucket: String,
    /// API base URL, `https://storage.googleapis.com` or an emulator
    pub base_url: String,
    pub token_source: TokenSource,
}

/// Application default credentials file / 凭证文件
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialsFile {
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
    ServiceAccount {
        client_email: String,
        private_key: String,
        #[serde(default)]
        token_uri: Option<String>,
    },
}

impl GcsConfig {
    /// Resolve endpoint and token source / 读取环境凭证
    ///
    /// Order: `STORAGE_EMULATOR_HOST` (anonymous), `GOOGLE_OAUTH_ACCESS_TOKEN`,
    /// `GOOGLE_APPLICATION_CREDENTIALS`, the gcloud application default
    /// credentials file, then the metadata server named by `GCE_METADATA_HOST`.
    pub fn from_credentials(bucket: &str, source: &dyn CredentialSource) -> Result<Self> {
        if bucket.is_empty() {
            return Err(BlobError::InvalidArgument("GCS bucket name must not be empty".to_string()));
        }

        if let Some(host) = source.var("STORAGE_EMULATOR_HOST") {
            let base_url = if host.contains("://") { host } else { format!("http://{}", host) };
            return Ok(Self {
                bucket: bucket.to_string(),
                base_url: base_url.trim_end_matches('/').to_string(),
                token_source: TokenSource::Anonymous,
            });
        }

        Ok(Self {
            bucket: bucket.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            token_source: Self::token_source(source)?,
        })
    }

    fn token_source(source: &dyn CredentialSource) -> Result<TokenSource> {
        if let Some(token) = source.var("GOOGLE_OAUTH_ACCESS_TOKEN") {
            return Ok(TokenSource::Static(token));
        }

        if let Some(path) = source.var("GOOGLE_APPLICATION_CREDENTIALS") {
            let path = PathBuf::from(path);
            let content = source.read_file(&path).map_err(|e| {
                BlobError::Authentication(format!("cannot read {}: {}", path.display(), e))
            })?;
            return parse_credentials_file(&content);
        }

        let default_file = source
            .home_dir()
            .map(|home| home.join(".config/gcloud/application_default_credentials.json"));
        if let Some(content) = default_file.and_then(|p| source.read_file(&p).ok()) {
            return parse_credentials_file(&content);
        }

        if let Some(host) = source.var("GCE_METADATA_HOST") {
            return Ok(TokenSource::Metadata { host });
        }

        Err(BlobError::Authentication(
            "no Google credentials found: set GOOGLE_APPLICATION_CREDENTIALS or STORAGE_EMULATOR_HOST".to_string(),
        ))
    }
}

fn parse_credentials_file(content: &str) -> Result<TokenSource> {
    let file: CredentialsFile = serde_json::from_str(content)
        .map_err(|e| BlobError::Authentication(format!("unsupported Google credentials file: {}", e)))?;
    Ok(match file {
        CredentialsFile::AuthorizedUser {
            client_id,
            client_secret,
            refresh_token,
        } => TokenSource::RefreshToken {
            client_id,
            client_secret,
            refresh_token,
            token_uri: DEFAULT_TOKEN_URI.to_string(),
        },
        CredentialsFile::ServiceAccount {
            client_email,
            private_key,
            token_uri,
        } => TokenSource::ServiceAccount {
            client_email,
            key: parse_private_key(&private_key)?,
            token_uri: token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
        },
    })
}
