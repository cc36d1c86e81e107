//! In-process completion backends for dispatcher tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use providers::{CompletionBackend, CompletionRequest, CompletionResponse};
use std::collections::VecDeque;

/// Replays canned responses in order and records every request.
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<Result<CompletionResponse, String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedBackend {
    pub fn new(responses: impl IntoIterator<Item = Result<CompletionResponse, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn last_request(&self) -> CompletionRequest {
        self.requests
            .lock()
            .last()
            .cloned()
            .expect("backend was never called")
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.requests.lock().push(request);
        match self.responses.lock().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted response left")),
        }
    }
}

/// Never answers; used for timeout and cancellation paths.
pub struct PendingBackend;

#[async_trait]
impl CompletionBackend for PendingBackend {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
        std::future::pending().await
    }
}
