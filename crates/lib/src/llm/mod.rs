//! Model client abstraction and the Gemini client.
//!
//! The coordinator only needs one call: send the parts of a message and receive
//! the reply as a sequence of text fragments.

mod gemini;
mod sse;

use crate::media::Part;
use async_trait::async_trait;

pub use gemini::{Content, GeminiClient, GeminiModel, InlineData, WirePart};
pub use sse::SseDecoder;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("model api error: {0}")]
    Api(String),
    #[error("model stream event could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A chat session with a streaming model endpoint.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send one user turn. Calls `on_chunk` for each text fragment in receive order and
    /// returns the accumulated reply. Fragments already delivered are not retracted on error.
    async fn send_message_stream(
        &self,
        parts: Vec<Part>,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, LlmError>;
}
