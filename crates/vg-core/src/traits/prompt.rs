//! User prompts raised while connecting

use async_trait::async_trait;

use crate::types::Credentials;

/// Outcome of asking whether to retry without the transport trust check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsecureDecision {
    /// Retry insecurely; `remember` persists the approval for future attempts
    Approved { remember: bool },
    /// Do not retry
    Declined,
}

/// Asks for a username and secret
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    /// Returns `None` when the user cancels
    async fn ask(&self, display_name: &str) -> Option<Credentials>;
}

/// Asks whether to retry a connection without the trust check
#[async_trait]
pub trait InsecureRetryPrompt: Send + Sync {
    async fn ask(&self, display_name: &str) -> InsecureDecision;
}
