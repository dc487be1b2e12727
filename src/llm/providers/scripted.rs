//! Scripted provider: canned reply, per-attempt latency, call recording.
//!
//! Only the most recent [`MAX_RECORDED`] requests are kept, so a scripted
//! backend configured for a long-running console stays bounded.
//!
//! Used by demos and tests to drive timeouts and retries deterministically.
//! The reply may contain `{sources}`, replaced with the comma-joined source
//! ids of the passages it received.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::llm::{LlmResponse, ProviderError};
use crate::model::GenerationRequest;

pub const MAX_RECORDED: usize = 32;

#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    reply: Arc<str>,
    /// Delay per call index; calls past the end use no delay.
    delays: Arc<[Duration]>,
    failure: Option<Arc<str>>,
    calls: Arc<AtomicU32>,
    requests: Arc<Mutex<VecDeque<GenerationRequest>>>,
}

impl ScriptedProvider {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: Arc::from(reply),
            delays: Arc::from(Vec::new()),
            failure: None,
            calls: Arc::new(AtomicU32::new(0)),
            requests: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_RECORDED))),
        }
    }

    /// Every call fails with `message`.
    pub fn failing(message: &str) -> Self {
        let mut p = Self::new("");
        p.failure = Some(Arc::from(message));
        p
    }

    pub fn with_delays(mut self, delays: impl Into<Vec<Duration>>) -> Self {
        self.delays = Arc::from(delays.into());
        self
    }

    /// Number of calls started so far, across clones.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Recently received requests, oldest first.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        let guard = self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.iter().cloned().collect()
    }

    pub async fn complete(&self, request: &GenerationRequest) -> Result<LlmResponse, ProviderError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        {
            let mut guard = self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if guard.len() == MAX_RECORDED {
                guard.pop_front();
            }
            guard.push_back(request.clone());
        }

        if let Some(delay) = self.delays.get(index) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(ProviderError::Request(message.to_string()));
        }

        let sources: Vec<&str> = request.passages.iter().map(|p| p.source_id.as_str()).collect();
        Ok(LlmResponse { text: self.reply.replace("{sources}", &sources.join(", ")), usage: None })
    }
}
