//! Azure驱动配置

use crate::credentials::CredentialSource;
use crate::error::{BlobError, Result};

use super::signer::SharedKey;

const DEFAULT_DOMAIN: &str = "blob.core.windows.net";

/// How requests are authorized / 认证方式
#[derive(Debug, Clone)]
pub enum AzureAuth {
    SharedKey(SharedKey),
    /// SAS query string without the leading `?`
    Sas(String),
}

/// Azure配置
#[derive(Debug, Clone)]
pub struct AzureConfig {
    pub account: String,
    /// 容器名称
    pub container: String,
    /// `https://{account}.{domain}`, or `{protocol}://{domain}/{account}` for
    /// a local emulator
    pub endpoint: String,
    pub auth: AzureAuth,
}

impl AzureConfig {
    /// Read the storage account from the ambient sources / 读取环境凭证
    ///
    /// `AZURE_STORAGE_KEY` wins over `AZURE_STORAGE_SAS_TOKEN`.
    pub fn from_credentials(container: &str, source: &dyn CredentialSource) -> Result<Self> {
        if container.is_empty() {
            return Err(BlobError::InvalidArgument("Azure container name must not be empty".to_string()));
        }
        let account = source
            .var("AZURE_STORAGE_ACCOUNT")
            .ok_or_else(|| BlobError::Authentication("AZURE_STORAGE_ACCOUNT is not set".to_string()))?;

        let protocol = source
            .var("AZURE_STORAGE_PROTOCOL")
            .unwrap_or_else(|| "https".to_string());
        if protocol != "https" && protocol != "http" {
            return Err(BlobError::InvalidArgument(format!(
                "AZURE_STORAGE_PROTOCOL must be http or https, got {:?}",
                protocol
            )));
        }
        let domain = source
            .var("AZURE_STORAGE_DOMAIN")
            .unwrap_or_else(|| DEFAULT_DOMAIN.to_string());
        let endpoint = if source.flag("AZURE_STORAGE_IS_LOCAL_EMULATOR") {
            format!("{}://{}/{}", protocol, domain, account)
        } else {
            format!("{}://{}.{}", protocol, account, domain)
        };

        let auth = match (source.var("AZURE_STORAGE_KEY"), source.var("AZURE_STORAGE_SAS_TOKEN")) {
            (Some(key), _) => AzureAuth::SharedKey(SharedKey::new(&account, &key)?),
            (None, Some(sas)) => AzureAuth::Sas(sas.trim_start_matches('?').to_string()),
            (None, None) => {
                return Err(BlobError::Authentication(
                    "set AZURE_STORAGE_KEY or AZURE_STORAGE_SAS_TOKEN".to_string(),
                ))
            }
        };

        Ok(Self {
            account,
            container: container.to_string(),
            endpoint,
            auth,
        })
    }
}
