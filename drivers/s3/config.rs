//! S3驱动配置

use std::path::PathBuf;

use crate::credentials::{parse_ini, CredentialSource};
use crate::error::{BlobError, Result};

/// S3配置
#[derive(Debug, Clone)]
pub struct S3Config {
    /// 存储桶名称
    pub bucket: String,
    /// S3端点地址
    /// AWS: https://s3.{region}.amazonaws.com
    /// MinIO: http://localhost:9000
    pub endpoint: String,
    /// 区域
    pub region: String,
    /// Access Key ID
    pub access_key_id: String,
    /// Secret Access Key
    pub secret_access_key: String,
    /// Session Token（用于临时凭证）
    pub session_token: String,
    /// 强制使用路径风格（而非虚拟主机风格）
    /// MinIO等需要设置为true
    pub force_path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl S3Config {
    /// Acquire credentials and endpoint from the ambient sources / 读取环境凭证
    ///
    /// Static keys from `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY` win over
    /// the shared credentials file profile (`AWS_PROFILE`, default `default`).
    pub fn from_credentials(bucket: &str, source: &dyn CredentialSource) -> Result<Self> {
        if bucket.is_empty() {
            return Err(BlobError::InvalidArgument("S3 bucket name must not be empty".to_string()));
        }

        let region = source
            .var("AWS_REGION")
            .or_else(|| source.var("AWS_DEFAULT_REGION"))
            .unwrap_or_else(default_region);

        let (access_key_id, secret_access_key, session_token) =
            match (source.var("AWS_ACCESS_KEY_ID"), source.var("AWS_SECRET_ACCESS_KEY")) {
                (Some(id), Some(secret)) => (id, secret, source.var("AWS_SESSION_TOKEN").unwrap_or_default()),
                (Some(_), None) | (None, Some(_)) => {
                    return Err(BlobError::Authentication(
                        "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together".to_string(),
                    ))
                }
                (None, None) => Self::profile_credentials(source)?,
            };

        let endpoint = source
            .var("AWS_ENDPOINT_URL_S3")
            .or_else(|| source.var("AWS_ENDPOINT_URL"))
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", region));

        Ok(Self {
            bucket: bucket.to_string(),
            endpoint,
            region,
            access_key_id,
            secret_access_key,
            session_token,
            force_path_style: source.flag("AWS_S3_FORCE_PATH_STYLE"),
        })
    }

    /// Keys from the shared credentials file / 读取共享凭证文件
    fn profile_credentials(source: &dyn CredentialSource) -> Result<(String, String, String)> {
        let path = match source.var("AWS_SHARED_CREDENTIALS_FILE") {
            Some(p) => PathBuf::from(p),
            None => source
                .home_dir()
                .map(|home| home.join(".aws").join("credentials"))
                .ok_or_else(|| BlobError::Authentication("no AWS credentials found".to_string()))?,
        };
        let profile = source.var("AWS_PROFILE").unwrap_or_else(|| "default".to_string());

        let content = source.read_file(&path).map_err(|e| {
            BlobError::Authentication(format!("no AWS credentials found ({}: {})", path.display(), e))
        })?;
        let sections = parse_ini(&content);
        let section = sections.get(&profile).ok_or_else(|| {
            BlobError::Authentication(format!("profile {:?} not found in {}", profile, path.display()))
        })?;

        match (section.get("aws_access_key_id"), section.get("aws_secret_access_key")) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Ok((
                id.clone(),
                secret.clone(),
                section.get("aws_session_token").cloned().unwrap_or_default(),
            )),
            _ => Err(BlobError::Authentication(format!(
                "profile {:?} has no access key pair",
                profile
            ))),
        }
    }
}
