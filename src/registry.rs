//! The list of ingested documents, kept as a verbatim copy of the service's
//! list. Every mutation is followed by a full re-read; the local list is never
//! patched.

use crate::confirm::ConfirmationPort;
use crate::gateway::{GatewayError, ServiceGateway};
use crate::ingest::UploadEvent;
use crate::models::Document;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DELETE_FAILED_MESSAGE: &str = "Failed to delete document";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistryState {
    pub documents: Vec<Document>,
    /// Ids with a delete in flight.
    pub busy: BTreeSet<String>,
    pub refreshes_in_flight: usize,
}

impl RegistryState {
    pub fn is_loading(&self) -> bool {
        self.refreshes_in_flight > 0
    }

    pub fn is_busy(&self, document_id: &str) -> bool {
        self.busy.contains(document_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteOutcome {
    Declined,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("document {0} is already being deleted")]
    Busy(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl Serialize for RegistryError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Clone)]
pub struct DocumentRegistry {
    gateway: Arc<dyn ServiceGateway>,
    confirmation: Arc<dyn ConfirmationPort>,
    state: Arc<watch::Sender<RegistryState>>,
}

impl DocumentRegistry {
    pub fn new(gateway: Arc<dyn ServiceGateway>, confirmation: Arc<dyn ConfirmationPort>) -> Self {
        let (state, _) = watch::channel(RegistryState::default());
        Self {
            gateway,
            confirmation,
            state: Arc::new(state),
        }
    }

    pub fn snapshot(&self) -> RegistryState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RegistryState> {
        self.state.subscribe()
    }

    pub fn documents(&self) -> Vec<Document> {
        self.state.borrow().documents.clone()
    }

    /// Replace the local list with the service's current list.
    ///
    /// Overlapping refreshes are not serialized: whichever response arrives
    /// last is the list that stays. On failure the list is left as it was.
    pub async fn refresh(&self) -> Result<Vec<Document>, RegistryError> {
        self.state.send_modify(|s| s.refreshes_in_flight += 1);
        let _loading = LoadingGuard { state: &self.state };

        match self.gateway.list_documents().await {
            Ok(list) => {
                debug!(count = list.documents.len(), "document list refreshed");
                let documents = list.documents;
                self.state.send_modify(|s| s.documents = documents.clone());
                Ok(documents)
            }
            Err(e) => {
                error!(error = %e, "failed to fetch documents");
                Err(e.into())
            }
        }
    }

    /// Delete a document after the user confirms.
    ///
    /// Nothing is sent if the user declines. Only `document_id` is marked
    /// busy; a second delete of the same id while busy is rejected. A
    /// successful delete is followed by a full [`refresh`](Self::refresh).
    pub async fn request_delete(
        &self,
        document_id: &str,
        filename: &str,
    ) -> Result<DeleteOutcome, RegistryError> {
        let already_busy = self.state.borrow().is_busy(document_id);
        if already_busy {
            return Err(RegistryError::Busy(document_id.to_string()));
        }

        let prompt = format!("Delete \"{}\"?", filename);
        if !self.confirmation.confirm(&prompt).await {
            info!(document_id, "delete declined");
            return Ok(DeleteOutcome::Declined);
        }

        let claimed = self
            .state
            .send_if_modified(|s| s.busy.insert(document_id.to_string()));
        if !claimed {
            return Err(RegistryError::Busy(document_id.to_string()));
        }
        let _busy = BusyGuard {
            state: &self.state,
            document_id,
        };

        if let Err(e) = self.gateway.delete_document(document_id).await {
            error!(document_id, error = %e, "failed to delete document");
            self.confirmation.notify(&e.user_message(DELETE_FAILED_MESSAGE));
            return Err(e.into());
        }
        info!(document_id, "document deleted");

        if let Err(e) = self.refresh().await {
            warn!(document_id, error = %e, "document deleted but the list could not be reloaded");
        }
        Ok(DeleteOutcome::Deleted)
    }

    /// Refresh whenever `events` reports a finished upload. The task ends when
    /// every sender of `events` is gone.
    pub fn follow_ingestions(
        &self,
        mut events: broadcast::Receiver<UploadEvent>,
    ) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(UploadEvent::Succeeded { task_id, .. }) => {
                        debug!(task_id = %task_id, "upload finished, refreshing documents");
                        let _ = registry.refresh().await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "upload events lagged, refreshing documents");
                        let _ = registry.refresh().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

struct LoadingGuard<'a> {
    state: &'a watch::Sender<RegistryState>,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.state
            .send_modify(|s| s.refreshes_in_flight = s.refreshes_in_flight.saturating_sub(1));
    }
}

struct BusyGuard<'a> {
    state: &'a watch::Sender<RegistryState>,
    document_id: &'a str,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.state
            .send_if_modified(|s| s.busy.remove(self.document_id));
    }
}
