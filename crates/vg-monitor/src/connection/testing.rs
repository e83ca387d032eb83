//! Scripted collaborators for unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use vg_core::settings::MemorySettings;
use vg_core::traits::{
    ConnectEnv, CredentialPrompt, InsecureDecision, InsecureRetryPrompt, RawConnection,
    TargetDescriptor,
};
use vg_core::{ConnectError, Credentials, TargetAddress};

use super::ConnectContext;
use crate::events::EventBus;

/// Raw connection whose loss is triggered by the test
#[derive(Default)]
pub struct FakeRaw {
    lost: CancellationToken,
    closes: AtomicUsize,
}

impl FakeRaw {
    pub fn drop_connection(&self) {
        self.lost.cancel();
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RawConnection for FakeRaw {
    async fn closed(&self) {
        self.lost.cancelled().await;
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    async fn process_id(&self) -> Option<u32> {
        Some(4242)
    }
}

/// Fails with the scripted errors in order, then succeeds
pub struct ScriptedDescriptor {
    script: Mutex<VecDeque<Result<(), ConnectError>>>,
    envs: Mutex<Vec<ConnectEnv>>,
    last: Mutex<Option<Arc<FakeRaw>>>,
    short_lived: bool,
}

impl ScriptedDescriptor {
    pub fn new(script: Vec<Result<(), ConnectError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            envs: Mutex::new(Vec::new()),
            last: Mutex::new(None),
            short_lived: false,
        }
    }

    /// Hand out connections that are already lost when returned
    pub fn short_lived(mut self) -> Self {
        self.short_lived = true;
        self
    }

    pub fn attempts(&self) -> usize {
        self.envs.lock().unwrap().len()
    }

    pub fn envs(&self) -> Vec<ConnectEnv> {
        self.envs.lock().unwrap().clone()
    }

    pub fn last_raw(&self) -> Option<Arc<FakeRaw>> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl TargetDescriptor for ScriptedDescriptor {
    async fn open_connection(
        &self,
        _address: &TargetAddress,
        env: &ConnectEnv,
    ) -> Result<Arc<dyn RawConnection>, ConnectError> {
        self.envs.lock().unwrap().push(env.clone());
        let next = self.script.lock().unwrap().pop_front();
        if let Some(Err(e)) = next {
            return Err(e);
        }
        let raw = Arc::new(FakeRaw::default());
        if self.short_lived {
            raw.drop_connection();
        }
        *self.last.lock().unwrap() = Some(Arc::clone(&raw));
        Ok(raw)
    }
}

/// Answers both prompts with fixed responses and counts the questions
pub struct ScriptedPrompt {
    credentials: Option<Credentials>,
    insecure: InsecureDecision,
    gate: Option<CancellationToken>,
    credential_asks: AtomicUsize,
    insecure_asks: AtomicUsize,
}

impl ScriptedPrompt {
    pub fn cancelling() -> Self {
        Self {
            credentials: None,
            insecure: InsecureDecision::Declined,
            gate: None,
            credential_asks: AtomicUsize::new(0),
            insecure_asks: AtomicUsize::new(0),
        }
    }

    pub fn supplying(credentials: Credentials) -> Self {
        Self {
            credentials: Some(credentials),
            ..Self::cancelling()
        }
    }

    pub fn approving_insecure(mut self, remember: bool) -> Self {
        self.insecure = InsecureDecision::Approved { remember };
        self
    }

    /// Hold every answer until `gate` is cancelled
    pub fn gated(mut self, gate: CancellationToken) -> Self {
        self.gate = Some(gate);
        self
    }

    async fn wait_for_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.cancelled().await;
        }
    }

    pub fn credential_asks(&self) -> usize {
        self.credential_asks.load(Ordering::SeqCst)
    }

    pub fn insecure_asks(&self) -> usize {
        self.insecure_asks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialPrompt for ScriptedPrompt {
    async fn ask(&self, _display_name: &str) -> Option<Credentials> {
        self.credential_asks.fetch_add(1, Ordering::SeqCst);
        self.wait_for_gate().await;
        self.credentials.clone()
    }
}

#[async_trait]
impl InsecureRetryPrompt for ScriptedPrompt {
    async fn ask(&self, _display_name: &str) -> InsecureDecision {
        self.insecure_asks.fetch_add(1, Ordering::SeqCst);
        self.wait_for_gate().await;
        self.insecure
    }
}

pub fn context(
    prompt: Arc<ScriptedPrompt>,
    settings: Arc<MemorySettings>,
    events: EventBus,
) -> ConnectContext {
    ConnectContext {
        credential_prompt: Arc::clone(&prompt) as Arc<dyn CredentialPrompt>,
        insecure_prompt: prompt,
        settings,
        events,
    }
}
