//! Reply generation: persona prompt + bounded history + new message → bilingual reply.
//!
//! The model is told to answer as
//!
//! ```text
//! EN: <english>
//! JP: <japanese>
//! ```
//!
//! and [`parse_bilingual`] pulls the two fields back out, degrading
//! gracefully when the model ignores the format.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::error::{GenerationError, UpstreamError};
use crate::history::{ConversationTurn, Role};
use crate::persona::PersonaConfig;
use crate::text::{preview, truncate_chars};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: content.into(),
        }
    }
}

/// A text-generation backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Complete a conversation and return the raw reply text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, UpstreamError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BilingualReply {
    pub english: String,
    /// Empty when the model left out the `JP:` field.
    pub japanese: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    En,
    Jp,
}

const OPENERS: &[char] = &['(', '[', '（', '【', '「'];
const CLOSERS: &[char] = &[')', ']', '）', '】', '」'];

/// Find every `EN:`/`JP:` tag that starts the text or follows a
/// non-alphanumeric character (whitespace, punctuation, markdown).
/// Returns `(tag, tag_start, content_start)` in order of appearance.
fn find_tags(raw: &str) -> Vec<(Tag, usize, usize)> {
    let mut tags = Vec::new();
    let mut prev: Option<char> = None;

    for (idx, ch) in raw.char_indices() {
        let at_boundary = prev.map_or(true, |p| !p.is_alphanumeric());
        prev = Some(ch);
        if !at_boundary || !(ch == 'E' || ch == 'J') {
            continue;
        }

        let rest = &raw[idx..];
        let tag = if rest.starts_with("EN") {
            Tag::En
        } else if rest.starts_with("JP") {
            Tag::Jp
        } else {
            continue;
        };

        let after = &rest[2..];
        let colon_len = if after.starts_with(':') {
            1
        } else if after.starts_with('：') {
            '：'.len_utf8()
        } else {
            continue;
        };
        tags.push((tag, idx, idx + 2 + colon_len));
    }

    tags
}

/// Strip the markup a tag drags along: surrounding whitespace and `*`, an
/// opening bracket left in front of the next tag, and a closing bracket
/// whose opener belonged to the tag.
fn clean_field(text: &str) -> &str {
    let mut field = text;
    loop {
        let before = field.len();
        field = field.trim_matches(|c: char| c.is_whitespace() || c == '*');
        if let Some(rest) = field.strip_suffix(OPENERS) {
            field = rest;
        }
        if !field.contains(OPENERS) {
            if let Some(rest) = field.strip_suffix(CLOSERS) {
                field = rest;
            }
        }
        if field.len() == before {
            return field;
        }
    }
}

/// Text of the first `wanted` field, up to the tag that follows it.
fn field<'a>(raw: &'a str, tags: &[(Tag, usize, usize)], wanted: Tag) -> Option<&'a str> {
    let pos = tags.iter().position(|(t, _, _)| *t == wanted)?;
    let start = tags[pos].2;
    let end = tags
        .get(pos + 1)
        .map_or(raw.len(), |(_, tag_start, _)| *tag_start);
    Some(clean_field(&raw[start..end]))
}

/// Split raw model output into English and Japanese fields.
///
/// Grammar: an `EN` field and an optional `JP` field, each introduced by its
/// tag and running until the next tag or the end of input. The first
/// occurrence of each tag wins.
///
/// Degraded output:
/// - no `EN:` tag: English is the text before `JP:`, not the entire raw
///   output, so a present `JP:` field is never voiced as English. With no
///   `JP:` either, English is the whole output.
/// - an empty `EN:` field: English falls back to the whole trimmed output,
///   which then includes any `JP:` text.
pub fn parse_bilingual(raw: &str) -> BilingualReply {
    let tags = find_tags(raw);

    let japanese = field(raw, &tags, Tag::Jp).unwrap_or_default().to_string();
    let english = match field(raw, &tags, Tag::En) {
        Some(en) => en,
        None => match tags.iter().find(|(t, _, _)| *t == Tag::Jp) {
            Some((_, jp_start, _)) => clean_field(&raw[..*jp_start]),
            None => raw.trim(),
        },
    };
    let english = if english.is_empty() {
        raw.trim()
    } else {
        english
    };

    BilingualReply {
        english: english.to_string(),
        japanese,
    }
}

pub struct ReplyGenerator {
    model: Arc<dyn ChatModel>,
    max_input_chars: usize,
}

impl ReplyGenerator {
    pub fn new(model: Arc<dyn ChatModel>, max_input_chars: usize) -> Self {
        Self {
            model,
            max_input_chars,
        }
    }

    /// Build the request messages: persona, history in order, then the new text.
    pub fn build_messages(
        &self,
        persona: &PersonaConfig,
        history: &[ConversationTurn],
        user_text: &str,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(persona.system_prompt()));
        for turn in history {
            messages.push(match turn.role {
                Role::User => ChatMessage::user(turn.content.as_str()),
                Role::Assistant => ChatMessage::assistant(turn.content.as_str()),
            });
        }
        messages.push(ChatMessage::user(truncate_chars(user_text, self.max_input_chars)));
        messages
    }

    pub async fn generate(
        &self,
        persona: &PersonaConfig,
        history: &[ConversationTurn],
        user_text: &str,
    ) -> Result<BilingualReply, GenerationError> {
        let messages = self.build_messages(persona, history, user_text);
        debug!(
            "Requesting reply from model ({} history turns): \"{}\"",
            history.len(),
            preview(user_text, 80)
        );

        let raw = self.model.complete(&messages).await?;
        if raw.trim().is_empty() {
            return Err(GenerationError::EmptyReply);
        }

        let reply = parse_bilingual(&raw);
        if reply.japanese.is_empty() {
            debug!("Model reply had no JP field: \"{}\"", preview(&raw, 80));
        }
        Ok(reply)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Canned chat model that records every request.
    pub struct ScriptedChat {
        reply: Result<String, String>,
        pub requests: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedChat {
        pub fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(reason: &str) -> Self {
            Self {
                reply: Err(reason.to_string()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, UpstreamError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            self.reply
                .clone()
                .map_err(|reason| UpstreamError::invalid("chat", reason))
        }
    }
}
