//! Messaging-platform seam: what the pipeline consumes and what it sends back.

use async_trait::async_trait;

use crate::error::UpstreamError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    /// Voice message; bytes are fetched on demand by id.
    Audio { message_id: String },
    /// Anything else (image, sticker, video, ...), by platform type name.
    Unsupported(String),
}

/// One inbound user message that can be replied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub reply_token: String,
    pub user_id: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplySegment {
    Text(String),
    Audio { url: String, duration_ms: u64 },
}

#[async_trait]
pub trait MessagingPlatform: Send + Sync {
    /// Download the binary content of a user's message.
    async fn fetch_media(&self, message_id: &str) -> Result<Vec<u8>, UpstreamError>;

    /// Send the reply set for one event, in order.
    async fn reply(
        &self,
        reply_token: &str,
        segments: &[ReplySegment],
    ) -> Result<(), UpstreamError>;
}
