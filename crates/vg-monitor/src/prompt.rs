//! Prompt implementations for the daemon
//!
//! [`TerminalPrompt`] asks on the controlling terminal. Questions are
//! serialized so concurrent connect attempts never interleave on screen.
//! [`NonInteractivePrompt`] answers every question with "no", which turns
//! reconnection off for targets that need credentials or an insecure retry.

use std::sync::Arc;

use async_trait::async_trait;
use dialoguer::{Input, Password, Select};
use tokio::sync::Mutex;

use vg_core::traits::{CredentialPrompt, InsecureDecision, InsecureRetryPrompt};
use vg_core::Credentials;

const INSECURE_CHOICES: [&str; 3] = ["No", "Yes, this time", "Yes, always for this target"];

/// Prompts on the terminal from a blocking thread
#[derive(Debug, Default, Clone)]
pub struct TerminalPrompt {
    turn: Arc<Mutex<()>>,
}

impl TerminalPrompt {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read_credentials(display_name: &str) -> std::io::Result<Option<Credentials>> {
    let username: String = Input::new()
        .with_prompt(format!("Username for {} (empty to cancel)", display_name))
        .allow_empty(true)
        .interact_text()
        .map_err(std::io::Error::other)?;
    if username.trim().is_empty() {
        return Ok(None);
    }

    let secret = Password::new()
        .with_prompt(format!("Password for {}@{}", username.trim(), display_name))
        .allow_empty_password(true)
        .interact()
        .map_err(std::io::Error::other)?;

    Ok(Some(Credentials::new(username.trim(), secret)))
}

fn read_insecure_decision(display_name: &str) -> std::io::Result<InsecureDecision> {
    let choice = Select::new()
        .with_prompt(format!(
            "Secure connection to {} failed. Retry without the trust check?",
            display_name
        ))
        .items(&INSECURE_CHOICES)
        .default(0)
        .interact_opt()
        .map_err(std::io::Error::other)?;

    Ok(match choice {
        Some(1) => InsecureDecision::Approved { remember: false },
        Some(2) => InsecureDecision::Approved { remember: true },
        _ => InsecureDecision::Declined,
    })
}

#[async_trait]
impl CredentialPrompt for TerminalPrompt {
    async fn ask(&self, display_name: &str) -> Option<Credentials> {
        let _turn = self.turn.lock().await;
        let name = display_name.to_string();

        match tokio::task::spawn_blocking(move || read_credentials(&name)).await {
            Ok(Ok(credentials)) => credentials,
            Ok(Err(e)) => {
                tracing::warn!("Credential prompt for {} failed: {}", display_name, e);
                None
            }
            Err(e) => {
                tracing::warn!("Credential prompt task panicked: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl InsecureRetryPrompt for TerminalPrompt {
    async fn ask(&self, display_name: &str) -> InsecureDecision {
        let _turn = self.turn.lock().await;
        let name = display_name.to_string();

        match tokio::task::spawn_blocking(move || read_insecure_decision(&name)).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                tracing::warn!("Insecure retry prompt for {} failed: {}", display_name, e);
                InsecureDecision::Declined
            }
            Err(e) => {
                tracing::warn!("Insecure retry prompt task panicked: {}", e);
                InsecureDecision::Declined
            }
        }
    }
}

/// Declines every prompt, for daemons without a terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct NonInteractivePrompt;

#[async_trait]
impl CredentialPrompt for NonInteractivePrompt {
    async fn ask(&self, display_name: &str) -> Option<Credentials> {
        tracing::warn!(
            "{} requires credentials; configure them or run with --interactive",
            display_name
        );
        None
    }
}

#[async_trait]
impl InsecureRetryPrompt for NonInteractivePrompt {
    async fn ask(&self, display_name: &str) -> InsecureDecision {
        tracing::warn!(
            "{} failed the transport trust check; set allow_insecure to retry insecurely",
            display_name
        );
        InsecureDecision::Declined
    }
}
