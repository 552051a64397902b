use std::time::Duration;

use async_trait::async_trait;
use spark_core::{ChatMessage, ChunkStream, CompletionError, CompletionProvider};

pub const DEMO_REPLY: &str = "I'm a demo AI assistant. To get real AI responses, please configure a valid KIMI_API_KEY in your environment variables. You can get an API key from https://platform.moonshot.cn/";

const WORD_INTERVAL: Duration = Duration::from_millis(50);

/// Keys that select the demo source instead of the hosted API.
pub fn is_demo_key(key: &str) -> bool {
    key.is_empty() || key == "demo_key"
}

/// Offline source that types out a fixed reply one word at a time.
pub struct DemoProvider {
    interval: Duration,
}

impl DemoProvider {
    pub fn new() -> Self {
        Self {
            interval: WORD_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Default for DemoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionProvider for DemoProvider {
    fn name(&self) -> &str {
        "demo"
    }

    fn model(&self) -> &str {
        "demo"
    }

    async fn stream(&self, _messages: &[ChatMessage]) -> Result<ChunkStream, CompletionError> {
        let words: Vec<String> = DEMO_REPLY.split(' ').map(|w| format!("{w} ")).collect();
        let interval = self.interval;
        let stream = futures::stream::unfold((words.into_iter(), true), move |(mut words, first)| async move {
            let word = words.next()?;
            if !first {
                tokio::time::sleep(interval).await;
            }
            Some((Ok(word), (words, false)))
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn demo_key_detection() {
        assert!(is_demo_key(""));
        assert!(is_demo_key("demo_key"));
        assert!(!is_demo_key("sk-live"));
    }

    #[tokio::test(start_paused = true)]
    async fn types_out_reply_word_by_word() {
        let provider = DemoProvider::new();
        let chunks: Vec<String> = provider
            .stream(&[ChatMessage::user("hi")])
            .await
            .unwrap()
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(chunks.len(), DEMO_REPLY.split(' ').count());
        assert!(chunks.iter().all(|c| c.ends_with(' ')));
        assert_eq!(chunks.concat().trim_end(), DEMO_REPLY);
    }

    #[tokio::test(start_paused = true)]
    async fn words_are_paced() {
        let provider = DemoProvider::new().with_interval(Duration::from_secs(1));
        let start = tokio::time::Instant::now();
        let mut stream = provider.stream(&[]).await.unwrap();
        let _ = stream.next().await;
        let _ = stream.next().await;
        assert!(start.elapsed() >= Duration::from_secs(1));
    }
}
