use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::CompletionError;
use crate::messages::ChatMessage;

/// Ordered text fragments of one assistant reply. Ends after the last chunk,
/// or after the first `Err` item.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

/// Source of streamed assistant replies (a hosted model API, a canned demo, a test double).
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    /// Start a completion for `messages` (oldest first). Errors returned here
    /// mean no chunk was produced.
    async fn stream(&self, messages: &[ChatMessage]) -> Result<ChunkStream, CompletionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    struct Echo;

    #[async_trait]
    impl CompletionProvider for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn model(&self) -> &str {
            "echo-1"
        }

        async fn stream(&self, messages: &[ChatMessage]) -> Result<ChunkStream, CompletionError> {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(Box::pin(futures::stream::iter(vec![Ok(last)])))
        }
    }

    #[tokio::test]
    async fn trait_object_streams_chunks() {
        let provider: Box<dyn CompletionProvider> = Box::new(Echo);
        let stream = provider.stream(&[ChatMessage::user("ping")]).await.unwrap();
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap(), "ping");
    }
}
