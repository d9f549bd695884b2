//! Shared Key request signing / 共享密钥签名
//!
//! StringToSign = VERB, eleven standard headers, canonicalized `x-ms-*`
//! headers, then `/{account}{path}` with the sorted query parameters.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Request;
use sha2::Sha256;

use crate::error::{BlobError, Result};

type HmacSha256 = Hmac<Sha256>;

const STANDARD_HEADERS: [&str; 11] = [
    "content-encoding",
    "content-language",
    "content-length",
    "content-md5",
    "content-type",
    "date",
    "if-modified-since",
    "if-match",
    "if-none-match",
    "if-unmodified-since",
    "range",
];

#[derive(Clone)]
pub struct SharedKey {
    account: String,
    key: Vec<u8>,
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedKey({})", self.account)
    }
}

impl SharedKey {
    /// `key` is the base64 account key / 账户密钥
    pub fn new(account: &str, key: &str) -> Result<Self> {
        let key = STANDARD
            .decode(key.trim())
            .map_err(|e| BlobError::Authentication(format!("AZURE_STORAGE_KEY is not valid base64: {}", e)))?;
        Ok(Self {
            account: account.to_string(),
            key,
        })
    }

    fn string_to_sign(&self, request: &Request) -> String {
        let headers = request.headers();
        let mut out = String::new();
        out.push_str(request.method().as_str());
        out.push('\n');

        for name in STANDARD_HEADERS {
            let value = if name == "content-length" {
                // 0 is signed as an empty string
                request
                    .body()
                    .and_then(|b| b.as_bytes())
                    .map(|b| b.len())
                    .filter(|len| *len > 0)
                    .map(|len| len.to_string())
                    .unwrap_or_default()
            } else {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string()
            };
            out.push_str(&value);
            out.push('\n');
        }

        let mut ms_headers: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (name, value) in headers {
            if name.as_str().starts_with("x-ms-") {
                if let Ok(v) = value.to_str() {
                    ms_headers.entry(name.as_str()).or_default().push(v.trim());
                }
            }
        }
        for (name, values) in ms_headers {
            out.push_str(&format!("{}:{}\n", name, values.join(",")));
        }

        out.push('/');
        out.push_str(&self.account);
        out.push_str(request.url().path());

        let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in request.url().query_pairs() {
            params.entry(name.to_lowercase()).or_default().push(value.into_owned());
        }
        for (name, mut values) in params {
            values.sort();
            out.push_str(&format!("\n{}:{}", name, values.join(",")));
        }
        out
    }

    /// Add the `Authorization` header / 签名请求
    pub fn sign(&self, request: &mut Request) -> Result<()> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| BlobError::Authentication(format!("invalid account key: {}", e)))?;
        mac.update(self.string_to_sign(request).as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());
        let value = HeaderValue::from_str(&format!("SharedKey {}:{}", self.account, signature))
            .map_err(|e| BlobError::Authentication(format!("invalid account name: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}
