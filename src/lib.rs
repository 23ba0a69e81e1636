pub mod config;
pub mod confirm;
pub mod gateway;
pub mod ingest;
pub mod models;
pub mod registry;
pub mod session;
pub mod telemetry;

#[cfg(test)]
mod testing;

use config::AssistantConfig;
use confirm::ConfirmationPort;
use gateway::{GatewayError, HttpGateway, ServiceGateway};
use ingest::DocumentIngestionPipeline;
use registry::DocumentRegistry;
use session::ConversationSession;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub use models::{Document, Role, Source, Turn, UploadFile};

/// The three client components wired to one service. Successful uploads
/// refresh the registry.
///
/// Must be created inside a tokio runtime.
pub struct Assistant {
    pub session: ConversationSession,
    pub pipeline: DocumentIngestionPipeline,
    pub registry: DocumentRegistry,
    follower: JoinHandle<()>,
}

impl Assistant {
    pub fn new(gateway: Arc<dyn ServiceGateway>, confirmation: Arc<dyn ConfirmationPort>) -> Self {
        let session = ConversationSession::new(gateway.clone());
        let pipeline = DocumentIngestionPipeline::new(gateway.clone());
        let registry = DocumentRegistry::new(gateway, confirmation);
        let follower = registry.follow_ingestions(pipeline.events());
        Self {
            session,
            pipeline,
            registry,
            follower,
        }
    }

    pub fn from_config(
        config: &AssistantConfig,
        confirmation: Arc<dyn ConfirmationPort>,
    ) -> Result<Self, GatewayError> {
        let gateway = HttpGateway::new(&config.service)?;
        tracing::info!(base_url = gateway.base_url(), "RAG assistant client ready");
        Ok(Self::new(Arc::new(gateway), confirmation))
    }
}

impl Drop for Assistant {
    fn drop(&mut self) {
        self.follower.abort();
    }
}
