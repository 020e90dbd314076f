//! Speech-to-text for inbound voice messages.

use async_trait::async_trait;

use crate::error::UpstreamError;

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an encoded audio file. May return an empty string when
    /// nothing intelligible was heard.
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String, UpstreamError>;
}
