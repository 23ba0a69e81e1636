//! Conversation turn sequencing against the chat endpoint.
//!
//! A session allows one request in flight. The user turn is appended as soon
//! as a query is accepted; the assistant turn (or an error placeholder) is
//! appended when the request resolves. The conversation id the service hands
//! back on the first answer is kept for the rest of the session and echoed on
//! every later request.

use crate::gateway::{ChatReply, ChatRequest, GatewayError, ServiceGateway};
use crate::models::{parse_timestamp, Turn};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Content of the assistant turn shown when a request fails.
pub const ERROR_REPLY: &str = "Sorry, I encountered an error processing your request.";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConversationState {
    /// Identifies this session instance; changes on [`ConversationSession::reset`].
    pub session_id: Uuid,
    pub conversation_id: Option<String>,
    pub turns: Vec<Turn>,
    pub pending: bool,
}

impl ConversationState {
    fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            conversation_id: None,
            turns: Vec::new(),
            pending: false,
        }
    }

    fn next_turn_id(&self) -> u64 {
        self.turns.last().map(|t| t.id + 1).unwrap_or(1)
    }

    fn adopt_conversation_id(&mut self, offered: Option<&str>) {
        let Some(offered) = offered.filter(|id| !id.is_empty()) else {
            return;
        };
        match &self.conversation_id {
            None => {
                info!(conversation_id = offered, "conversation id assigned");
                self.conversation_id = Some(offered.to_string());
            }
            Some(current) if current != offered => {
                debug!(
                    conversation_id = %current,
                    offered,
                    "ignoring different conversation id from service"
                );
            }
            Some(_) => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Answered(Turn),
    /// The request failed; `turn` is the error placeholder that was appended.
    Failed { turn: Turn, error: GatewayError },
    /// The session was reset while the request was in flight; the response
    /// was dropped.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("message cannot be empty")]
    EmptyQuery,
    #[error("a request is already in flight")]
    Pending,
}

/// One conversation with the assistant. Clones share the same session.
#[derive(Clone)]
pub struct ConversationSession {
    gateway: Arc<dyn ServiceGateway>,
    state: Arc<watch::Sender<ConversationState>>,
}

impl ConversationSession {
    pub fn new(gateway: Arc<dyn ServiceGateway>) -> Self {
        let (state, _) = watch::channel(ConversationState::new());
        Self {
            gateway,
            state: Arc::new(state),
        }
    }

    pub fn snapshot(&self) -> ConversationState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.state.subscribe()
    }

    pub fn is_pending(&self) -> bool {
        self.state.borrow().pending
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.state.borrow().conversation_id.clone()
    }

    /// Start a new conversation. A response still in flight for the old one
    /// is dropped when it arrives.
    pub fn reset(&self) {
        self.state.send_modify(|s| *s = ConversationState::new());
        info!("conversation reset");
    }

    /// Send `text` as the next user turn and wait for the answer.
    ///
    /// Rejected with [`SubmitError::Pending`] while another request is in
    /// flight. Service failures are not errors here: they resolve to
    /// [`SubmitOutcome::Failed`] after the placeholder turn is appended.
    pub async fn submit(&self, text: &str) -> Result<SubmitOutcome, SubmitError> {
        if text.trim().is_empty() {
            return Err(SubmitError::EmptyQuery);
        }

        let mut accepted = None;
        self.state.send_if_modified(|s| {
            if s.pending {
                return false;
            }
            let id = s.next_turn_id();
            s.turns.push(Turn::user(id, text));
            s.pending = true;
            accepted = Some((
                s.session_id,
                ChatRequest {
                    query: text.to_string(),
                    conversation_id: s.conversation_id.clone(),
                },
            ));
            true
        });
        let Some((session_id, request)) = accepted else {
            debug!("submit rejected: request already in flight");
            return Err(SubmitError::Pending);
        };

        let mut guard = PendingGuard {
            state: &self.state,
            session_id,
            armed: true,
        };
        debug!(
            session_id = %session_id,
            conversation_id = ?request.conversation_id,
            "dispatching chat request"
        );
        let result = self.gateway.post_chat(&request).await;
        guard.armed = false;

        Ok(self.resolve(session_id, result))
    }

    fn resolve(
        &self,
        session_id: Uuid,
        result: Result<ChatReply, GatewayError>,
    ) -> SubmitOutcome {
        let mut outcome = SubmitOutcome::Discarded;
        self.state.send_if_modified(|s| {
            if s.session_id != session_id {
                debug!(session_id = %session_id, "dropping response for a reset session");
                return false;
            }
            let id = s.next_turn_id();
            outcome = match result {
                Ok(reply) => {
                    s.adopt_conversation_id(reply.conversation_id.as_deref());
                    let created_at = reply
                        .timestamp
                        .as_deref()
                        .and_then(parse_timestamp)
                        .unwrap_or_else(Utc::now);
                    let turn = Turn::assistant(id, reply.answer, reply.sources, created_at);
                    s.turns.push(turn.clone());
                    SubmitOutcome::Answered(turn)
                }
                Err(error) => {
                    warn!(error = %error, "chat request failed");
                    let turn = Turn::failure(id, ERROR_REPLY);
                    s.turns.push(turn.clone());
                    SubmitOutcome::Failed { turn, error }
                }
            };
            s.pending = false;
            true
        });
        outcome
    }
}

/// Releases `pending` if a submit future is dropped before it resolves,
/// closing the orphaned user turn with an error placeholder.
struct PendingGuard<'a> {
    state: &'a watch::Sender<ConversationState>,
    session_id: Uuid,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.state.send_if_modified(|s| {
            if s.session_id != self.session_id || !s.pending {
                return false;
            }
            warn!("chat request abandoned before it resolved");
            let id = s.next_turn_id();
            s.turns.push(Turn::failure(id, ERROR_REPLY));
            s.pending = false;
            true
        });
    }
}
