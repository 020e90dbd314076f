//! Voice synthesis for the English half of a reply.
//!
//! Input is capped before it reaches the speech model, so a long reply is
//! only voiced up to the cap. Voice, speed and style come from the persona.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::UpstreamError;
use crate::persona::VoiceParams;
use crate::text::truncate_chars;

/// MIME type of the clips produced by [`SpeechModel`] implementations.
pub const AUDIO_CONTENT_TYPE: &str = "audio/mpeg";

/// A speech-generation backend returning encoded MP3 bytes.
#[async_trait]
pub trait SpeechModel: Send + Sync {
    async fn speak(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>, UpstreamError>;
}

pub struct VoiceSynthesizer {
    model: Arc<dyn SpeechModel>,
    voice: VoiceParams,
    max_chars: usize,
}

impl VoiceSynthesizer {
    pub fn new(model: Arc<dyn SpeechModel>, voice: VoiceParams, max_chars: usize) -> Self {
        Self {
            model,
            voice,
            max_chars,
        }
    }

    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>, UpstreamError> {
        let input = truncate_chars(text.trim(), self.max_chars);
        if input.len() < text.trim().len() {
            debug!(
                "Speech input capped at {} of {} chars",
                self.max_chars,
                text.trim().chars().count()
            );
        }

        let t0 = Instant::now();
        let audio = self.model.speak(input, &self.voice).await?;
        if audio.is_empty() {
            return Err(UpstreamError::invalid("speech", "empty audio payload"));
        }
        info!(
            "Synthesized {} chars → {} bytes in {}ms (voice: {})",
            input.chars().count(),
            audio.len(),
            t0.elapsed().as_millis(),
            self.voice.voice
        );
        Ok(audio)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Speech model that echoes a fixed clip and records its inputs.
    pub struct RecordingSpeech {
        pub inputs: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingSpeech {
        pub fn new() -> Self {
            Self {
                inputs: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        pub fn failing() -> Self {
            Self {
                inputs: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn calls(&self) -> usize {
            self.inputs.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SpeechModel for RecordingSpeech {
        async fn speak(&self, text: &str, _voice: &VoiceParams) -> Result<Vec<u8>, UpstreamError> {
            self.inputs.lock().unwrap().push(text.to_string());
            if self.fail {
                return Err(UpstreamError::invalid("speech", "simulated failure"));
            }
            Ok(b"ID3fake-mp3".to_vec())
        }
    }
}
