//! In-memory service and confirmation doubles shared by the unit tests.

use crate::confirm::ConfirmationPort;
use crate::gateway::{
    ChatReply, ChatRequest, DocumentList, GatewayError, ProgressFn, ServiceGateway, UploadReceipt,
};
use crate::models::{Document, Source, UploadFile};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::oneshot;

#[derive(Default)]
struct FakeState {
    chat_requests: Vec<ChatRequest>,
    chat_replies: VecDeque<Result<ChatReply, GatewayError>>,
    chat_gates: VecDeque<oneshot::Receiver<()>>,
    documents: Vec<Document>,
    list_calls: usize,
    list_failure: Option<GatewayError>,
    list_gates: VecDeque<oneshot::Receiver<()>>,
    uploads: Vec<String>,
    upload_chunks: Option<u32>,
    upload_failure: Option<GatewayError>,
    upload_gates: VecDeque<oneshot::Receiver<()>>,
    deletes: Vec<String>,
    delete_failures: HashMap<String, GatewayError>,
    delete_gates: HashMap<String, oneshot::Receiver<()>>,
    next_document: u32,
}

/// Scripted RAG service. Gates hold a response until the returned sender
/// fires (or is dropped).
#[derive(Default)]
pub(crate) struct FakeGateway {
    state: Mutex<FakeState>,
}

pub(crate) fn reply(answer: &str, conversation_id: Option<&str>) -> ChatReply {
    ChatReply {
        answer: answer.to_string(),
        sources: vec![Source {
            document_name: "policy.pdf".into(),
            relevance_score: 0.91,
            page: Some(2),
            chunk_id: Some("chunk-1".into()),
        }],
        timestamp: Some("2026-10-16T09:30:00".into()),
        conversation_id: conversation_id.map(str::to_string),
    }
}

pub(crate) fn document(id: &str, filename: &str, chunks: u32) -> Document {
    Document {
        document_id: id.to_string(),
        filename: filename.to_string(),
        file_size_bytes: 4096,
        upload_date: "2026-10-16T10:00:00".into(),
        chunk_count: chunks,
    }
}

pub(crate) fn service_error(status: u16, detail: Option<&str>) -> GatewayError {
    GatewayError::Service {
        status,
        detail: detail.map(str::to_string),
    }
}

impl FakeGateway {
    pub fn push_chat_reply(&self, reply: Result<ChatReply, GatewayError>) {
        self.state.lock().unwrap().chat_replies.push_back(reply);
    }

    pub fn hold_next_chat(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().unwrap().chat_gates.push_back(rx);
        tx
    }

    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        self.state.lock().unwrap().chat_requests.clone()
    }

    pub fn set_documents(&self, documents: Vec<Document>) {
        self.state.lock().unwrap().documents = documents;
    }

    pub fn fail_lists_with(&self, error: Option<GatewayError>) {
        self.state.lock().unwrap().list_failure = error;
    }

    pub fn hold_next_list(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().unwrap().list_gates.push_back(rx);
        tx
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn set_upload_chunks(&self, chunks: u32) {
        self.state.lock().unwrap().upload_chunks = Some(chunks);
    }

    pub fn fail_next_upload(&self, error: GatewayError) {
        self.state.lock().unwrap().upload_failure = Some(error);
    }

    pub fn hold_next_upload(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().unwrap().upload_gates.push_back(rx);
        tx
    }

    pub fn uploads(&self) -> Vec<String> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn fail_delete(&self, document_id: &str, error: GatewayError) {
        self.state
            .lock()
            .unwrap()
            .delete_failures
            .insert(document_id.to_string(), error);
    }

    pub fn hold_delete(&self, document_id: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state
            .lock()
            .unwrap()
            .delete_gates
            .insert(document_id.to_string(), rx);
        tx
    }

    pub fn deletes(&self) -> Vec<String> {
        self.state.lock().unwrap().deletes.clone()
    }

    pub fn total_calls(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.chat_requests.len() + state.list_calls + state.uploads.len() + state.deletes.len()
    }
}

async fn pass(gate: Option<oneshot::Receiver<()>>) {
    if let Some(gate) = gate {
        let _ = gate.await;
    }
}

#[async_trait]
impl ServiceGateway for FakeGateway {
    async fn post_chat(&self, request: &ChatRequest) -> Result<ChatReply, GatewayError> {
        let (gate, scripted) = {
            let mut state = self.state.lock().unwrap();
            state.chat_requests.push(request.clone());
            (state.chat_gates.pop_front(), state.chat_replies.pop_front())
        };
        pass(gate).await;
        scripted.unwrap_or_else(|| Ok(reply("No scripted answer.", None)))
    }

    async fn upload_document(
        &self,
        file: &UploadFile,
        progress: ProgressFn,
    ) -> Result<UploadReceipt, GatewayError> {
        let (gate, failure) = {
            let mut state = self.state.lock().unwrap();
            state.uploads.push(file.filename.clone());
            (state.upload_gates.pop_front(), state.upload_failure.take())
        };
        let total = file.len();
        let quarter = total / 4;

        if let Some(error) = failure {
            progress(quarter * 2, total);
            pass(gate).await;
            return Err(error);
        }

        for step in 1..=3 {
            progress(quarter * step, total);
        }
        pass(gate).await;
        progress(total, total);

        let mut state = self.state.lock().unwrap();
        state.next_document += 1;
        let chunks = state.upload_chunks.unwrap_or(1);
        let document_id = format!("d-{}", state.next_document);
        state.documents.push(Document {
            document_id: document_id.clone(),
            filename: file.filename.clone(),
            file_size_bytes: total,
            upload_date: "2026-10-16T10:00:00".into(),
            chunk_count: chunks,
        });
        Ok(UploadReceipt {
            filename: file.filename.clone(),
            chunks_created: chunks,
            document_id: Some(document_id),
            status: Some("success".into()),
            message: None,
        })
    }

    async fn list_documents(&self) -> Result<DocumentList, GatewayError> {
        let (gate, snapshot) = {
            let mut state = self.state.lock().unwrap();
            state.list_calls += 1;
            let snapshot = match &state.list_failure {
                Some(error) => Err(error.clone()),
                None => Ok(state.documents.clone()),
            };
            (state.list_gates.pop_front(), snapshot)
        };
        pass(gate).await;
        let documents = snapshot?;
        Ok(DocumentList {
            total_count: Some(documents.len()),
            documents,
        })
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), GatewayError> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            state.deletes.push(document_id.to_string());
            state.delete_gates.remove(document_id)
        };
        pass(gate).await;
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.delete_failures.get(document_id) {
            return Err(error.clone());
        }
        state.documents.retain(|d| d.document_id != document_id);
        Ok(())
    }
}

/// Confirmation port with a fixed answer that records what it was asked.
pub(crate) struct ScriptedConfirmation {
    answer: bool,
    prompts: Mutex<Vec<String>>,
    notices: Mutex<Vec<String>>,
}

impl ScriptedConfirmation {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            prompts: Mutex::new(Vec::new()),
            notices: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfirmationPort for ScriptedConfirmation {
    async fn confirm(&self, prompt: &str) -> bool {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answer
    }

    fn notify(&self, message: &str) {
        self.notices.lock().unwrap().push(message.to_string());
    }
}
