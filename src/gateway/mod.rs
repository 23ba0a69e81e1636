pub mod http;

use crate::models::{Document, Source, UploadFile};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use http::HttpGateway;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatRequest {
    pub query: String,
    /// Serialized as `null` until the service has assigned one.
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatReply {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UploadReceipt {
    pub filename: String,
    pub chunks_created: u32,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DocumentList {
    pub documents: Vec<Document>,
    #[serde(default)]
    pub total_count: Option<usize>,
}

/// Upload progress sink, called with `(bytes_sent, bytes_total)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Transport to the RAG service. Implementations carry no state and apply no
/// retries; every failure is reported once as a [`GatewayError`].
#[async_trait]
pub trait ServiceGateway: Send + Sync {
    async fn post_chat(&self, request: &ChatRequest) -> Result<ChatReply, GatewayError>;

    async fn upload_document(
        &self,
        file: &UploadFile,
        progress: ProgressFn,
    ) -> Result<UploadReceipt, GatewayError>;

    async fn list_documents(&self) -> Result<DocumentList, GatewayError>;

    async fn delete_document(&self, document_id: &str) -> Result<(), GatewayError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Service error: {status}{}", detail_suffix(.detail))]
    Service { status: u16, detail: Option<String> },
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|d| format!(" - {d}"))
        .unwrap_or_default()
}

impl GatewayError {
    /// The service-supplied detail when there is one, otherwise `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            GatewayError::Service {
                detail: Some(detail),
                ..
            } if !detail.trim().is_empty() => detail.clone(),
            _ => fallback.to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GatewayError::Decode(e.to_string())
        } else if e.is_builder() {
            GatewayError::InvalidRequest(e.to_string())
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

impl Serialize for GatewayError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
