//! User confirmation port.
//!
//! Destructive intents ask the host UI before touching the network. The host
//! supplies the dialog; the core only sees a yes/no answer.

use async_trait::async_trait;

#[async_trait]
pub trait ConfirmationPort: Send + Sync {
    /// Ask the user to approve `prompt`. `false` means declined.
    async fn confirm(&self, prompt: &str) -> bool;

    /// Show a message that needs no answer, e.g. a failed deletion.
    fn notify(&self, message: &str);
}

/// Approves everything. For headless hosts that confirm upstream.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoConfirm;

#[async_trait]
impl ConfirmationPort for AutoConfirm {
    async fn confirm(&self, _prompt: &str) -> bool {
        true
    }

    fn notify(&self, message: &str) {
        tracing::warn!("{}", message);
    }
}
