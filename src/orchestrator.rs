//! Turn orchestration: one inbound message in, one reply set out.
//!
//! RECEIVED → (TRANSCRIBING) → LOADING-CONTEXT → GENERATING → PERSISTING
//! → SYNTHESIZING → PUBLISHING → REPLYING → DONE

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{GenerationError, PublishError, UpstreamError};
use crate::history::{HistoryLog, HistoryStore, NewTurn, TurnKind};
use crate::persona::PersonaConfig;
use crate::platform::{InboundEvent, MessageContent, MessagingPlatform, ReplySegment};
use crate::reply::{ChatModel, ReplyGenerator};
use crate::storage::{AudioPublisher, ObjectStore};
use crate::text::{preview, truncate_chars};
use crate::transcribe::Transcriber;
use crate::voice::{SpeechModel, VoiceSynthesizer};

/// Shown in place of a missing Japanese translation.
pub const JAPANESE_FALLBACK: &str = "（日本語訳を用意できませんでした）";

pub const APOLOGY: &str = "Sorry, something went wrong on my side. Please try again in a moment.\n\
すみません、エラーが発生しました。少し時間をおいてもう一度お試しください。";

pub const NOT_UNDERSTOOD: &str = "Sorry, I couldn't catch that. Could you send your voice message again?\n\
うまく聞き取れませんでした。もう一度音声を送ってください。";

pub const UNSUPPORTED: &str = "I can only read text and voice messages for now.\n\
今はテキストと音声メッセージにだけ返信できます。";

/// File name handed to the transcriber; LINE voice messages are m4a.
const VOICE_FILE_NAME: &str = "voice.m4a";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Transcribing,
    LoadingContext,
    Generating,
    Persisting,
    Synthesizing,
    Publishing,
    Replying,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "RECEIVED"),
            Self::Transcribing => write!(f, "TRANSCRIBING"),
            Self::LoadingContext => write!(f, "LOADING-CONTEXT"),
            Self::Generating => write!(f, "GENERATING"),
            Self::Persisting => write!(f, "PERSISTING"),
            Self::Synthesizing => write!(f, "SYNTHESIZING"),
            Self::Publishing => write!(f, "PUBLISHING"),
            Self::Replying => write!(f, "REPLYING"),
            Self::Done => write!(f, "DONE"),
        }
    }
}

/// Stage tracker for one exchange.
struct Progress<'a> {
    user_id: &'a str,
    stage: Stage,
}

impl<'a> Progress<'a> {
    fn new(user_id: &'a str) -> Self {
        Self {
            user_id,
            stage: Stage::Received,
        }
    }

    fn advance(&mut self, next: Stage) {
        debug!("[{}] Stage: {} → {}", self.user_id, self.stage, next);
        self.stage = next;
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("voice message could not be understood")]
    NotUnderstood,

    #[error("unsupported message type {0:?}")]
    Unsupported(String),

    #[error("fetching voice message failed: {0}")]
    Media(#[source] UpstreamError),

    #[error("reply generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("speech synthesis failed: {0}")]
    Synthesis(#[source] UpstreamError),

    #[error("audio publishing failed: {0}")]
    Publish(#[from] PublishError),
}

/// Injected collaborators, built once at startup.
pub struct Services {
    pub chat: Arc<dyn ChatModel>,
    pub speech: Arc<dyn SpeechModel>,
    pub transcriber: Arc<dyn Transcriber>,
    pub objects: Arc<dyn ObjectStore>,
    pub history: Arc<dyn HistoryStore>,
    pub platform: Arc<dyn MessagingPlatform>,
}

pub struct TurnOrchestrator {
    persona: PersonaConfig,
    history: HistoryLog,
    generator: ReplyGenerator,
    synthesizer: VoiceSynthesizer,
    publisher: AudioPublisher,
    transcriber: Arc<dyn Transcriber>,
    platform: Arc<dyn MessagingPlatform>,
    history_limit: usize,
    max_input_chars: usize,
}

impl TurnOrchestrator {
    pub fn new(persona: PersonaConfig, pipeline: &PipelineConfig, services: Services) -> Self {
        let synthesizer = VoiceSynthesizer::new(
            services.speech,
            persona.voice.clone(),
            pipeline.max_speech_chars,
        );
        Self {
            history: HistoryLog::new(services.history),
            generator: ReplyGenerator::new(services.chat, pipeline.max_input_chars),
            synthesizer,
            publisher: AudioPublisher::new(services.objects),
            transcriber: services.transcriber,
            platform: services.platform,
            history_limit: pipeline.history_limit,
            max_input_chars: pipeline.max_input_chars,
            persona,
        }
    }

    pub fn persona(&self) -> &PersonaConfig {
        &self.persona
    }

    /// Handle each event on its own task. Events are not ordered relative
    /// to one another, even for the same user.
    pub fn dispatch(self: &Arc<Self>, events: Vec<InboundEvent>) -> Vec<JoinHandle<()>> {
        events
            .into_iter()
            .map(|event| {
                let orchestrator = Arc::clone(self);
                tokio::spawn(async move { orchestrator.handle(event).await })
            })
            .collect()
    }

    /// Run one exchange end to end and send the reply.
    pub async fn handle(&self, event: InboundEvent) {
        let t0 = Instant::now();
        let mut progress = Progress::new(&event.user_id);
        let segments = self.respond(&event, &mut progress).await;

        progress.advance(Stage::Replying);
        if let Err(e) = self.platform.reply(&event.reply_token, &segments).await {
            warn!("[{}] Reply failed: {e}", event.user_id);
        }
        progress.advance(Stage::Done);
        info!(
            "[{}] Exchange finished in {}ms ({} segment(s))",
            event.user_id,
            t0.elapsed().as_millis(),
            segments.len()
        );
    }

    /// Compute the reply set for an event without sending it.
    #[cfg(test)]
    pub async fn reply_for(&self, event: &InboundEvent) -> Vec<ReplySegment> {
        let mut progress = Progress::new(&event.user_id);
        self.respond(event, &mut progress).await
    }

    async fn respond(
        &self,
        event: &InboundEvent,
        progress: &mut Progress<'_>,
    ) -> Vec<ReplySegment> {
        match self.run(event, progress).await {
            Ok(segments) => segments,
            Err(PipelineError::NotUnderstood) => {
                info!("[{}] Voice message not understood", event.user_id);
                vec![ReplySegment::Text(NOT_UNDERSTOOD.to_string())]
            }
            Err(PipelineError::Unsupported(kind)) => {
                info!("[{}] Unsupported {kind} message", event.user_id);
                vec![ReplySegment::Text(UNSUPPORTED.to_string())]
            }
            Err(e) => {
                warn!("[{}] Exchange failed during {}: {e}", event.user_id, progress.stage);
                vec![ReplySegment::Text(APOLOGY.to_string())]
            }
        }
    }

    async fn run(
        &self,
        event: &InboundEvent,
        progress: &mut Progress<'_>,
    ) -> Result<Vec<ReplySegment>, PipelineError> {
        let user_id = event.user_id.as_str();

        let (user_text, kind) = match &event.content {
            MessageContent::Text(text) => (text.trim().to_string(), TurnKind::Text),
            MessageContent::Audio { message_id } => {
                progress.advance(Stage::Transcribing);
                (self.transcribe(message_id).await?, TurnKind::Audio)
            }
            MessageContent::Unsupported(kind) => {
                return Err(PipelineError::Unsupported(kind.clone()));
            }
        };
        let user_text = truncate_chars(&user_text, self.max_input_chars);
        info!("[{user_id}] {} message: \"{}\"", kind.as_str(), preview(user_text, 80));

        progress.advance(Stage::LoadingContext);
        let context = self.history.context(user_id, self.history_limit).await;

        progress.advance(Stage::Generating);
        let reply = self
            .generator
            .generate(&self.persona, &context, user_text)
            .await?;

        progress.advance(Stage::Persisting);
        self.history.record(NewTurn::user(user_id, user_text, kind)).await;
        self.history
            .record(NewTurn::assistant(user_id, &reply.english, &reply.japanese))
            .await;

        progress.advance(Stage::Synthesizing);
        let audio = self
            .synthesizer
            .synthesize(&reply.english)
            .await
            .map_err(PipelineError::Synthesis)?;

        progress.advance(Stage::Publishing);
        let published = self.publisher.publish(user_id, audio).await?;

        let japanese = if reply.japanese.is_empty() {
            JAPANESE_FALLBACK.to_string()
        } else {
            reply.japanese
        };
        Ok(vec![
            ReplySegment::Text(reply.english),
            ReplySegment::Text(japanese),
            ReplySegment::Audio {
                url: published.url,
                duration_ms: published.duration_ms,
            },
        ])
    }

    async fn transcribe(&self, message_id: &str) -> Result<String, PipelineError> {
        let audio = self
            .platform
            .fetch_media(message_id)
            .await
            .map_err(PipelineError::Media)?;

        match self.transcriber.transcribe(audio, VOICE_FILE_NAME).await {
            Ok(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            Ok(_) => Err(PipelineError::NotUnderstood),
            Err(e) => {
                warn!("Transcription of {message_id} failed: {e}");
                Err(PipelineError::NotUnderstood)
            }
        }
    }
}
