//! Scripted provider and gateway builders shared by unit tests.

use super::{
    GenerationGateway,
    providers::{CompletionProvider, ProviderError, ProviderKind},
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Replies with `reply`, or fails with HTTP 503 when it is `None`.
pub(crate) struct FakeProvider {
    kind: ProviderKind,
    configured: bool,
    reply: Option<String>,
    pub(crate) calls: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub(crate) fn new(kind: ProviderKind, reply: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            configured: true,
            reply: reply.map(str::to_string),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn unconfigured(kind: ProviderKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            configured: false,
            reply: None,
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CompletionProvider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn complete(&self, model: &str, _prompt: &str) -> Result<String, ProviderError> {
        if !self.configured {
            return Err(ProviderError::NotConfigured(self.kind));
        }
        self.calls.lock().unwrap().push(model.to_string());
        self.reply.clone().ok_or_else(|| ProviderError::Status {
            provider: self.kind,
            status: 503,
            body: "overloaded".into(),
        })
    }
}

/// Gateway whose Gemini side always answers `reply`; OpenRouter is unconfigured.
pub(crate) fn gemini_answering(reply: &str) -> GenerationGateway {
    GenerationGateway::new(
        FakeProvider::new(ProviderKind::Gemini, Some(reply)),
        FakeProvider::unconfigured(ProviderKind::OpenRouter),
    )
}

/// Gateway with no provider keys at all.
pub(crate) fn unconfigured() -> GenerationGateway {
    GenerationGateway::new(
        FakeProvider::unconfigured(ProviderKind::Gemini),
        FakeProvider::unconfigured(ProviderKind::OpenRouter),
    )
}
