//! OpenAI-compatible API client: chat completions, speech and transcription.
//!
//! One HTTP client serves all three endpoints. Any server speaking the same
//! protocol can be used by pointing `openai.base_url` at it.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info};

use crate::config::OpenAiConfig;
use crate::error::{check_status, UpstreamError};
use crate::persona::VoiceParams;
use crate::reply::{ChatMessage, ChatModel};
use crate::text::preview;
use crate::transcribe::Transcriber;
use crate::voice::SpeechModel;

const CHAT: &str = "openai-chat";
const SPEECH: &str = "openai-speech";
const TRANSCRIPTION: &str = "openai-transcription";

pub struct OpenAiClient {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(UpstreamError::request(CHAT))?;

        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, UpstreamError> {
        let body = json!({
            "model": self.config.chat_model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        let t0 = Instant::now();
        let resp = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(UpstreamError::request(CHAT))?;

        let data: serde_json::Value = check_status(CHAT, resp)
            .await?
            .json()
            .await
            .map_err(|e| UpstreamError::invalid(CHAT, e.to_string()))?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| UpstreamError::invalid(CHAT, "missing choices[0].message.content"))?
            .trim()
            .to_string();

        info!(
            "Chat completion from {} in {}ms ({} chars)",
            self.config.chat_model,
            t0.elapsed().as_millis(),
            content.chars().count()
        );
        debug!("Chat output: \"{}\"", preview(&content, 80));
        Ok(content)
    }
}

#[async_trait]
impl SpeechModel for OpenAiClient {
    async fn speak(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>, UpstreamError> {
        let mut body = json!({
            "model": self.config.speech_model,
            "voice": voice.voice,
            "input": text,
            "speed": voice.speed,
            "response_format": "mp3",
        });
        if !voice.instructions.is_empty() {
            body["instructions"] = json!(voice.instructions);
        }

        let resp = self
            .client
            .post(self.endpoint("audio/speech"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(UpstreamError::request(SPEECH))?;

        let bytes = check_status(SPEECH, resp)
            .await?
            .bytes()
            .await
            .map_err(UpstreamError::request(SPEECH))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Transcriber for OpenAiClient {
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String, UpstreamError> {
        let audio_len = audio.len();
        let form = Form::new()
            .text("model", self.config.transcription_model.clone())
            .part("file", Part::bytes(audio).file_name(file_name.to_string()));

        let t0 = Instant::now();
        let resp = self
            .client
            .post(self.endpoint("audio/transcriptions"))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(UpstreamError::request(TRANSCRIPTION))?;

        let data: serde_json::Value = check_status(TRANSCRIPTION, resp)
            .await?
            .json()
            .await
            .map_err(|e| UpstreamError::invalid(TRANSCRIPTION, e.to_string()))?;

        let text = data["text"].as_str().unwrap_or("").trim().to_string();
        info!(
            "Transcribed {audio_len} bytes in {}ms: \"{}\"",
            t0.elapsed().as_millis(),
            preview(&text, 80)
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OpenAiClient {
        OpenAiClient::new(OpenAiConfig {
            api_key: "sk-test".into(),
            base_url: format!("{}/v1", server.uri()),
            ..OpenAiConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn chat_completion_returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "be nice"},
                    {"role": "user", "content": "hi"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": " EN: Hi!\nJP: やあ！ "}}]
            })))
            .mount(&server)
            .await;

        let messages = [ChatMessage::system("be nice"), ChatMessage::user("hi")];
        let content = client(&server).complete(&messages).await.unwrap();
        assert_eq!(content, "EN: Hi!\nJP: やあ！");
    }

    #[tokio::test]
    async fn chat_rate_limit_is_a_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = client(&server)
            .complete(&[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UpstreamError::Status { status, ref body, .. }
                if status.as_u16() == 429 && body == "slow down"
        ));
    }

    #[tokio::test]
    async fn malformed_chat_response_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = client(&server)
            .complete(&[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn speech_sends_persona_voice_and_returns_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .and(body_partial_json(json!({
                "voice": "onyx",
                "input": "Hello there",
                "response_format": "mp3",
                "instructions": "casual"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3audio".to_vec()))
            .mount(&server)
            .await;

        let voice = VoiceParams {
            voice: "onyx".into(),
            speed: 1.0,
            instructions: "casual".into(),
        };
        let audio = client(&server).speak("Hello there", &voice).await.unwrap();
        assert_eq!(audio, b"ID3audio");
    }

    #[tokio::test]
    async fn transcription_uploads_multipart_file() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .and(body_string_contains("whisper-1"))
            .and(body_string_contains("filename=\"voice.m4a\""))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"text": " How are you today? "})),
            )
            .mount(&server)
            .await;

        let text = client(&server)
            .transcribe(b"fake-m4a".to_vec(), "voice.m4a")
            .await
            .unwrap();
        assert_eq!(text, "How are you today?");
    }

    #[tokio::test]
    async fn transcription_without_text_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let text = client(&server).transcribe(vec![0; 4], "voice.m4a").await.unwrap();
        assert!(text.is_empty());
    }
}
