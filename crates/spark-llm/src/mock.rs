use std::collections::VecDeque;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use spark_core::{ChatMessage, ChunkStream, CompletionError, CompletionProvider};

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Yield each chunk, then end.
    Chunks(Vec<String>),
    /// Yield each chunk, then a mid-stream error.
    ChunksThenError(Vec<String>, CompletionError),
    /// Fail the `stream()` call itself.
    Error(CompletionError),
    /// Yield each chunk, then never finish.
    Stall(Vec<String>),
}

impl MockResponse {
    pub fn text(chunks: &[&str]) -> Self {
        Self::Chunks(chunks.iter().map(|c| (*c).to_owned()).collect())
    }
}

/// Mock provider that returns pre-programmed responses in sequence and
/// records the conversation window of every call.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Messages passed to each `stream()` call, oldest call first.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<ChunkStream, CompletionError> {
        self.calls.lock().push(messages.to_vec());
        let next = self.responses.lock().pop_front();
        let Some(response) = next else {
            return Err(CompletionError::InvalidRequest(format!(
                "MockProvider: no response configured for call {}",
                self.call_count() - 1
            )));
        };

        match response {
            MockResponse::Error(e) => Err(e),
            MockResponse::Chunks(chunks) => Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))),
            MockResponse::ChunksThenError(chunks, err) => {
                let items = chunks.into_iter().map(Ok).chain(std::iter::once(Err(err)));
                Ok(Box::pin(futures::stream::iter(items)))
            }
            MockResponse::Stall(chunks) => {
                let stream = futures::stream::iter(chunks.into_iter().map(Ok)).chain(futures::stream::pending());
                Ok(Box::pin(stream))
            }
        }
    }
}
