//! Scripted provider used by unit tests across the crate.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{future, stream};

use super::{
    Credential, LlmError, LlmProvider, LlmRequest, Provider, ProviderFactory, TextStream,
};

/// One scripted streaming reply: fragments, then optionally a terminal error.
pub struct ScriptedStream {
    pub fragments: Vec<String>,
    pub error: Option<LlmError>,
}

impl ScriptedStream {
    pub fn ok(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            error: None,
        }
    }

    pub fn broken(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            error: Some(LlmError::StreamInterrupted),
        }
    }
}

/// Replies are consumed in order; an exhausted script fails the call. A `None`
/// generation never completes.
#[derive(Default)]
pub struct ScriptedProvider {
    generations: Mutex<VecDeque<Option<Result<String, LlmError>>>>,
    streams: Mutex<VecDeque<Result<ScriptedStream, LlmError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_generation(&self, reply: Result<String, LlmError>) {
        self.generations.lock().unwrap().push_back(Some(reply));
    }

    /// The next `generate` call waits forever, until its caller drops it.
    pub fn push_hanging_generation(&self) {
        self.generations.lock().unwrap().push_back(None);
    }

    pub fn push_stream(&self, reply: Result<ScriptedStream, LlmError>) {
        self.streams.lock().unwrap().push_back(reply);
    }

    /// Every user prompt seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    async fn generate(&self, request: &LlmRequest<'_>) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(request.prompt.to_string());
        let next = self.generations.lock().unwrap().pop_front();
        match next {
            Some(Some(reply)) => reply,
            Some(None) => future::pending().await,
            None => Err(LlmError::EmptyContent),
        }
    }

    async fn stream(&self, request: &LlmRequest<'_>) -> Result<TextStream, LlmError> {
        self.prompts.lock().unwrap().push(request.prompt.to_string());
        let script = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyContent))?;

        let mut items: Vec<Result<String, LlmError>> =
            script.fragments.into_iter().map(Ok).collect();
        if let Some(error) = script.error {
            items.push(Err(error));
        }
        Ok(Box::pin(stream::iter(items)))
    }
}

/// Hands out the same scripted provider for every credential.
pub struct ScriptedFactory(pub Arc<ScriptedProvider>);

impl ProviderFactory for ScriptedFactory {
    fn connect(&self, _credential: &Credential) -> Arc<dyn LlmProvider> {
        self.0.clone()
    }
}

pub fn test_credential() -> Credential {
    Credential::new(Provider::OpenAi, "sk-test").unwrap()
}
