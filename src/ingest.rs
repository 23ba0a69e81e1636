//! Document upload: candidate validation, streamed upload with progress, and
//! a terminal outcome per task.
//!
//! Lifecycle of one [`UploadTask`]:
//! validating -> idle -> uploading -> succeeded | failed
//!
//! A terminal task is never restarted; the next upload starts from a fresh
//! [`DocumentIngestionPipeline::select_candidate`].

use crate::gateway::{GatewayError, ProgressFn, ServiceGateway, UploadReceipt};
use crate::models::UploadFile;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const PDF: &str = "application/pdf";
pub const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const DOC: &str = "application/msword";
pub const PLAIN_TEXT: &str = "text/plain";

pub const ALLOWED_MEDIA_TYPES: &[&str] = &[PDF, DOCX, DOC, PLAIN_TEXT];

pub const UPLOAD_FAILED_MESSAGE: &str = "Upload failed";

/// Highest percentage reported before the service confirms the upload.
const IN_FLIGHT_CEILING: u8 = 99;

pub(crate) const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValidationErrorKind {
    UnsupportedType,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Only PDF, DOCX, and TXT files are supported")]
    UnsupportedType { media_type: String },
}

impl ValidationError {
    pub fn kind(&self) -> ValidationErrorKind {
        match self {
            ValidationError::UnsupportedType { .. } => ValidationErrorKind::UnsupportedType,
        }
    }
}

/// Check the declared media type against the allow-list. The payload itself
/// is not inspected.
pub fn validate(file: &UploadFile) -> Result<(), ValidationError> {
    let essence = file
        .media_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    if ALLOWED_MEDIA_TYPES.contains(&essence.as_str()) {
        Ok(())
    } else {
        Err(ValidationError::UnsupportedType {
            media_type: file.media_type.clone(),
        })
    }
}

/// `floor(sent * 100 / total)`, clamped to `0..=100`.
pub fn transfer_percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (u128::from(sent.min(total)) * 100 / u128::from(total)) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Idle,
    Validating,
    Uploading,
    Succeeded,
    Failed,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Succeeded | UploadStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadTask {
    pub id: Uuid,
    pub filename: String,
    pub media_type: String,
    pub size_bytes: u64,
    #[serde(skip)]
    file: UploadFile,
    pub progress_percent: u8,
    pub status: UploadStatus,
    /// Set only when `status` is `Failed`.
    pub error_message: Option<String>,
}

impl UploadTask {
    fn new(file: UploadFile) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: file.filename.clone(),
            media_type: file.media_type.clone(),
            size_bytes: file.len(),
            file,
            progress_percent: 0,
            status: UploadStatus::Validating,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineState {
    pub task: Option<UploadTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReceipt {
    pub filename: String,
    pub chunks_created: u32,
    pub document_id: Option<String>,
}

impl IngestReceipt {
    pub fn summary(&self) -> String {
        format!(
            "Successfully uploaded {}. Created {} chunks.",
            self.filename, self.chunks_created
        )
    }
}

impl From<UploadReceipt> for IngestReceipt {
    fn from(receipt: UploadReceipt) -> Self {
        Self {
            filename: receipt.filename,
            chunks_created: receipt.chunks_created,
            document_id: receipt.document_id,
        }
    }
}

/// Per-task notifications. Each attempt emits non-decreasing `Progress`
/// events and ends with exactly one `Succeeded` or `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadEvent {
    Progress { task_id: Uuid, percent: u8 },
    Succeeded { task_id: Uuid, receipt: IngestReceipt },
    Failed { task_id: Uuid, message: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestError {
    #[error("no file selected")]
    NoCandidate,
    #[error("an upload is already in progress")]
    Busy,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{message}")]
    Upload { message: String },
}

impl Serialize for IngestError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Clone)]
pub struct DocumentIngestionPipeline {
    gateway: Arc<dyn ServiceGateway>,
    state: Arc<watch::Sender<PipelineState>>,
    events: broadcast::Sender<UploadEvent>,
}

impl DocumentIngestionPipeline {
    pub fn new(gateway: Arc<dyn ServiceGateway>) -> Self {
        let (state, _) = watch::channel(PipelineState::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            gateway,
            state: Arc::new(state),
            events,
        }
    }

    pub fn snapshot(&self) -> PipelineState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    /// Validate `file` and make it the next upload. A rejected file leaves
    /// the current state untouched.
    pub fn select_candidate(&self, file: UploadFile) -> Result<(), IngestError> {
        let mut task = UploadTask::new(file);
        if let Err(e) = validate(&task.file) {
            warn!(
                filename = %task.filename,
                media_type = %task.media_type,
                "rejected upload candidate"
            );
            return Err(e.into());
        }
        task.status = UploadStatus::Idle;

        let mut busy = false;
        let task_id = task.id;
        self.state.send_if_modified(|s| {
            if matches!(&s.task, Some(t) if t.status == UploadStatus::Uploading) {
                busy = true;
                return false;
            }
            s.task = Some(task);
            true
        });
        if busy {
            return Err(IngestError::Busy);
        }
        debug!(task_id = %task_id, "upload candidate selected");
        Ok(())
    }

    /// Drop the selected task unless it is uploading. Returns whether a task
    /// was removed.
    pub fn clear_candidate(&self) -> bool {
        self.state.send_if_modified(|s| {
            let removable = matches!(&s.task, Some(t) if t.status != UploadStatus::Uploading);
            if removable {
                s.task = None;
            }
            removable
        })
    }

    /// Upload the selected candidate.
    ///
    /// Progress is published on [`events`](Self::events) and in the state
    /// snapshot; 100 is reported only once the service has accepted the
    /// document.
    pub async fn ingest(&self) -> Result<IngestReceipt, IngestError> {
        let mut claim = Err(IngestError::NoCandidate);
        self.state.send_if_modified(|s| match s.task.as_mut() {
            Some(t) if t.status == UploadStatus::Idle => {
                t.status = UploadStatus::Uploading;
                t.progress_percent = 0;
                claim = Ok((t.id, t.file.clone()));
                true
            }
            Some(t) if t.status == UploadStatus::Uploading => {
                claim = Err(IngestError::Busy);
                false
            }
            _ => false,
        });
        let (task_id, file) = claim?;

        let mut guard = UploadGuard {
            pipeline: self,
            task_id,
            armed: true,
        };
        info!(
            task_id = %task_id,
            filename = %file.filename,
            size_bytes = file.len(),
            "uploading document"
        );
        let result = self
            .gateway
            .upload_document(&file, self.progress_sink(task_id))
            .await;
        guard.armed = false;

        match result {
            Ok(receipt) => {
                let receipt = IngestReceipt::from(receipt);
                self.finish_success(task_id, &receipt);
                Ok(receipt)
            }
            Err(error) => {
                let message = error.user_message(UPLOAD_FAILED_MESSAGE);
                self.finish_failure(task_id, &error, &message);
                Err(IngestError::Upload { message })
            }
        }
    }

    fn progress_sink(&self, task_id: Uuid) -> ProgressFn {
        let state = self.state.clone();
        let events = self.events.clone();
        Arc::new(move |sent: u64, total: u64| {
            let percent = transfer_percent(sent, total).min(IN_FLIGHT_CEILING);
            let advanced = state.send_if_modified(|s| match s.task.as_mut() {
                Some(t)
                    if t.id == task_id
                        && t.status == UploadStatus::Uploading
                        && percent > t.progress_percent =>
                {
                    t.progress_percent = percent;
                    true
                }
                _ => false,
            });
            if advanced {
                let _ = events.send(UploadEvent::Progress { task_id, percent });
            }
        })
    }

    fn finish_success(&self, task_id: Uuid, receipt: &IngestReceipt) {
        let updated = self.state.send_if_modified(|s| match s.task.as_mut() {
            Some(t) if t.id == task_id => {
                t.status = UploadStatus::Succeeded;
                t.progress_percent = 100;
                true
            }
            _ => false,
        });
        if updated {
            let _ = self.events.send(UploadEvent::Progress {
                task_id,
                percent: 100,
            });
        }
        info!(
            task_id = %task_id,
            filename = %receipt.filename,
            chunks_created = receipt.chunks_created,
            "document ingested"
        );
        let _ = self.events.send(UploadEvent::Succeeded {
            task_id,
            receipt: receipt.clone(),
        });
    }

    fn finish_failure(&self, task_id: Uuid, error: &GatewayError, message: &str) {
        self.mark_failed(task_id, message);
        warn!(task_id = %task_id, error = %error, "document upload failed");
    }

    fn mark_failed(&self, task_id: Uuid, message: &str) {
        self.state.send_if_modified(|s| match s.task.as_mut() {
            Some(t) if t.id == task_id && t.status == UploadStatus::Uploading => {
                t.status = UploadStatus::Failed;
                t.error_message = Some(message.to_string());
                true
            }
            _ => false,
        });
        let _ = self.events.send(UploadEvent::Failed {
            task_id,
            message: message.to_string(),
        });
    }
}

/// Fails the task if an `ingest` future is dropped mid-upload.
struct UploadGuard<'a> {
    pipeline: &'a DocumentIngestionPipeline,
    task_id: Uuid,
    armed: bool,
}

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(task_id = %self.task_id, "upload abandoned before it resolved");
            self.pipeline.mark_failed(self.task_id, UPLOAD_FAILED_MESSAGE);
        }
    }
}
