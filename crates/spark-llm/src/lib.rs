//! # spark-llm
//!
//! Completion sources behind [`spark_core::CompletionProvider`]:
//! - [`kimi`]: hosted Kimi chat-completions API, streamed over SSE
//! - [`demo`]: offline canned reply, selected when no real key is configured
//! - [`mock`]: scripted responses for tests

#![deny(unsafe_code)]

pub mod demo;
pub mod kimi;
pub mod mock;
pub mod sse;

use std::sync::Arc;

use secrecy::ExposeSecret;
use spark_core::{CompletionError, CompletionProvider};
use tracing::{info, warn};

pub use demo::{DemoProvider, is_demo_key};
pub use kimi::{KimiConfig, KimiProvider};
pub use mock::{MockProvider, MockResponse};

/// Pick the completion source for a configured key: demo for an empty or
/// placeholder key, the hosted API otherwise.
pub fn provider_from_config(config: KimiConfig) -> Result<Arc<dyn CompletionProvider>, CompletionError> {
    if is_demo_key(config.api_key.expose_secret()) {
        warn!("No Kimi API key configured, using demo completion source");
        return Ok(Arc::new(DemoProvider::new()));
    }
    info!(model = %config.model, base_url = %config.base_url, "Using Kimi completion source");
    Ok(Arc::new(KimiProvider::new(config)?))
}
