use super::{
    ChatReply, ChatRequest, DocumentList, GatewayError, ProgressFn, ServiceGateway, UploadReceipt,
};
use crate::config::ServiceConfig;
use crate::models::UploadFile;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response, Url};
use std::time::Duration;
use tracing::debug;

/// [`ServiceGateway`] over HTTP with one shared connection pool.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    upload_chunk_bytes: usize,
}

impl HttpGateway {
    pub fn new(config: &ServiceConfig) -> Result<Self, GatewayError> {
        let mut builder = Client::builder();
        if config.request_timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.request_timeout_secs));
        }
        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            upload_chunk_bytes: config.upload_chunk_bytes.max(1),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `/api/documents/{id}` with the id percent-encoded as one path segment.
    fn document_url(&self, document_id: &str) -> Result<Url, GatewayError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| GatewayError::InvalidRequest(format!("bad base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidRequest(format!("bad base URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "documents", document_id]);
        Ok(url)
    }
}

/// Turn a non-2xx response into a [`GatewayError::Service`].
async fn ensure_success(resp: Response) -> Result<Response, GatewayError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    debug!(status, body = %text, "service returned an error status");
    Err(GatewayError::Service {
        status,
        detail: extract_detail(&text),
    })
}

/// Pull the `detail` message out of an error body. Structured details (such
/// as validation error lists) are not user-facing and are ignored.
pub(crate) fn extract_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(detail) if !detail.trim().is_empty() => Some(detail.clone()),
        _ => None,
    }
}

#[async_trait]
impl ServiceGateway for HttpGateway {
    async fn post_chat(&self, request: &ChatRequest) -> Result<ChatReply, GatewayError> {
        let resp = self
            .client
            .post(self.url("/api/chat/"))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;
        Ok(resp.json().await?)
    }

    async fn upload_document(
        &self,
        file: &UploadFile,
        progress: ProgressFn,
    ) -> Result<UploadReceipt, GatewayError> {
        let total = file.len();
        let chunks: Vec<Vec<u8>> = file
            .bytes
            .chunks(self.upload_chunk_bytes)
            .map(<[u8]>::to_vec)
            .collect();

        // Progress is counted as each chunk is handed to the connection.
        let mut sent = 0u64;
        let stream = futures::stream::iter(chunks).map(move |chunk| {
            sent += chunk.len() as u64;
            progress(sent, total);
            Ok::<_, std::io::Error>(chunk)
        });

        let part = Part::stream_with_length(Body::wrap_stream(stream), total)
            .file_name(file.filename.clone())
            .mime_str(&file.media_type)?;
        let form = Form::new().part("file", part);

        let resp = self
            .client
            .post(self.url("/api/documents/upload"))
            .multipart(form)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;
        Ok(resp.json().await?)
    }

    async fn list_documents(&self) -> Result<DocumentList, GatewayError> {
        let resp = self.client.get(self.url("/api/documents/")).send().await?;
        let resp = ensure_success(resp).await?;
        Ok(resp.json().await?)
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), GatewayError> {
        let resp = self.client.delete(self.document_url(document_id)?).send().await?;
        ensure_success(resp).await?;
        Ok(())
    }
}
