//! Azure block blob upload session / Azure块上传会话

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};

use crate::context::CallContext;
use crate::error::{BlobError, Result};
use crate::storage::{PartUpload, UploadSession};

use super::driver::AzureClient;

/// `x-ms-meta-*` headers, validated up front / 元数据请求头
pub(super) fn metadata_headers(metadata: &HashMap<String, String>) -> Result<Vec<(String, String)>> {
    let mut headers = Vec::with_capacity(metadata.len());
    for (name, value) in metadata {
        // names must be C# identifiers
        let valid_name = name
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
            && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
        let valid_value = value.bytes().all(|b| b == b'\t' || (0x20..0x7f).contains(&b));
        if !valid_name || !valid_value {
            return Err(BlobError::InvalidArgument(format!(
                "metadata {:?} cannot be sent as an Azure header",
                name
            )));
        }
        headers.push((format!("x-ms-meta-{}", name.to_ascii_lowercase()), value.clone()));
    }
    Ok(headers)
}

fn with_headers(mut request: RequestBuilder, headers: &[(String, String)]) -> RequestBuilder {
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    request
}

/// Block ids must share one length within a blob / 块ID
fn block_id(session: &str, number: u32) -> String {
    STANDARD.encode(format!("{}-{:06}", session, number))
}

fn block_list_xml(blocks: &[String]) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="utf-8"?><BlockList>"#);
    for id in blocks {
        xml.push_str("<Latest>");
        xml.push_str(id);
        xml.push_str("</Latest>");
    }
    xml.push_str("</BlockList>");
    xml
}

/// Small payloads go out as one Put Blob; larger ones are staged with Put
/// Block and committed by Put Block List. Staged blocks carry a per-session
/// id prefix, so concurrent writers to one key never mix blocks.
pub(super) struct AzureUploadSession {
    client: Arc<AzureClient>,
    key: String,
    content_type: String,
    headers: Vec<(String, String)>,
    session: String,
    blocks: Vec<String>,
    ctx: CallContext,
}

impl AzureUploadSession {
    pub(super) fn new(
        client: Arc<AzureClient>,
        key: &str,
        content_type: String,
        headers: Vec<(String, String)>,
        ctx: &CallContext,
    ) -> Self {
        Self {
            client,
            key: key.to_string(),
            content_type,
            headers,
            session: uuid::Uuid::new_v4().simple().to_string(),
            blocks: Vec::new(),
            ctx: ctx.clone(),
        }
    }
}

#[async_trait]
impl UploadSession for AzureUploadSession {
    async fn upload_part(&mut self, part: PartUpload) -> Result<()> {
        let url = self.client.blob_url(&self.key);
        let data = &part.data;

        if part.is_whole_object() {
            let content_type = self.content_type.as_str();
            let headers = self.headers.as_slice();
            self.client
                .execute(&self.ctx, "azure.put_blob", |c: &Client| {
                    let request = c
                        .put(&url)
                        .header("x-ms-blob-type", "BlockBlob")
                        .header("x-ms-blob-content-type", content_type)
                        .body(data.clone());
                    with_headers(request, headers)
                })
                .await?;
            tracing::debug!("Azure Put Blob: key={}, size={}", self.key, data.len());
            return Ok(());
        }

        let id = block_id(&self.session, part.number);
        tracing::debug!("Azure上传块: key={}, part={}, size={}", self.key, part.number, data.len());
        let block = id.as_str();
        self.client
            .execute(&self.ctx, "azure.put_block", |c: &Client| {
                c.put(&url)
                    .query(&[("comp", "block"), ("blockid", block)])
                    .body(data.clone())
            })
            .await?;
        self.blocks.push(id);
        Ok(())
    }

    async fn complete(&mut self) -> Result<()> {
        // single-part objects were already written by Put Blob
        if self.blocks.is_empty() {
            return Ok(());
        }
        let url = self.client.blob_url(&self.key);
        let body = block_list_xml(&self.blocks);
        let content_type = self.content_type.as_str();
        let headers = self.headers.as_slice();
        self.client
            .execute(&self.ctx, "azure.put_block_list", |c: &Client| {
                let request = c
                    .put(&url)
                    .query(&[("comp", "blocklist")])
                    .header(CONTENT_TYPE, "application/xml")
                    .header("x-ms-blob-content-type", content_type)
                    .body(body.clone());
                with_headers(request, headers)
            })
            .await?;
        tracing::debug!("Azure块上传完成: key={}, blocks={}", self.key, self.blocks.len());
        Ok(())
    }

    async fn abort(&mut self) {
        // uncommitted blocks expire on the service side
        if !self.blocks.is_empty() {
            tracing::debug!("Azure上传取消: key={}, staged blocks={}", self.key, self.blocks.len());
            self.blocks.clear();
        }
    }
}
