//! Shared mock providers for agent tests.

use std::sync::Mutex;

use carebridge_core::error::ProviderError;
use carebridge_core::provider::{Provider, ProviderRequest, ProviderResponse};

/// Replays scripted replies in order and records every request.
/// Once the script runs out it answers with an API error.
pub struct ScriptedProvider {
    replies: Mutex<Vec<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            return Err(ProviderError::ApiError {
                status_code: 500,
                message: "no scripted reply left".into(),
            });
        }
        replies.remove(0).map(|text| ProviderResponse::text(text, model))
    }
}

type Reply = Box<dyn Fn(&ProviderRequest) -> Result<String, ProviderError> + Send + Sync>;

/// Answers every request through a closure, for tests where several
/// components share one provider and call order is not fixed.
pub struct FnProvider {
    reply: Reply,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl FnProvider {
    pub fn new(
        reply: impl Fn(&ProviderRequest) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            reply: Box::new(reply),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests_for(&self, model: &str) -> Vec<ProviderRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.model == model)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl Provider for FnProvider {
    fn name(&self) -> &str {
        "fn_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let result = (self.reply)(&request);
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        result.map(|text| ProviderResponse::text(text, model))
    }
}
