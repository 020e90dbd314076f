use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::LineConfig;
use crate::error::{check_status, UpstreamError};
use crate::platform::{MessagingPlatform, ReplySegment};
use crate::text::truncate_chars;

const SERVICE: &str = "line";

/// LINE rejects text messages longer than this.
const MAX_TEXT_CHARS: usize = 5_000;

/// LINE accepts at most five messages per reply token.
const MAX_REPLY_MESSAGES: usize = 5;

pub struct LineClient {
    client: Client,
    api_base: String,
    data_api_base: String,
    access_token: String,
}

impl LineClient {
    pub fn new(config: &LineConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(UpstreamError::request(SERVICE))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            data_api_base: config.data_api_base.trim_end_matches('/').to_string(),
            access_token: config.channel_access_token.clone(),
        })
    }
}

fn message_json(segment: &ReplySegment) -> Value {
    match segment {
        ReplySegment::Text(text) => json!({
            "type": "text",
            "text": truncate_chars(text, MAX_TEXT_CHARS),
        }),
        ReplySegment::Audio { url, duration_ms } => json!({
            "type": "audio",
            "originalContentUrl": url,
            "duration": duration_ms,
        }),
    }
}

#[async_trait]
impl MessagingPlatform for LineClient {
    async fn fetch_media(&self, message_id: &str) -> Result<Vec<u8>, UpstreamError> {
        let url = format!("{}/v2/bot/message/{message_id}/content", self.data_api_base);
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(UpstreamError::request(SERVICE))?;

        let bytes = check_status(SERVICE, resp)
            .await?
            .bytes()
            .await
            .map_err(UpstreamError::request(SERVICE))?;
        debug!("Fetched {} bytes for message {message_id}", bytes.len());
        Ok(bytes.to_vec())
    }

    async fn reply(
        &self,
        reply_token: &str,
        segments: &[ReplySegment],
    ) -> Result<(), UpstreamError> {
        let messages: Vec<Value> = segments
            .iter()
            .take(MAX_REPLY_MESSAGES)
            .map(message_json)
            .collect();
        let body = json!({
            "replyToken": reply_token,
            "messages": messages,
        });

        let resp = self
            .client
            .post(format!("{}/v2/bot/message/reply", self.api_base))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(UpstreamError::request(SERVICE))?;
        check_status(SERVICE, resp).await?;

        info!("Replied with {} message(s)", messages.len());
        Ok(())
    }
}
