//! Bot personas: tone, voice and history table for one bot identity.
//!
//! A persona is plain data handed to the pipeline; every bot runs the same
//! code with a different `PersonaConfig`.

use serde::Deserialize;

/// Output contract appended to every persona prompt. The reply parser
/// depends on these tags.
const FORMAT_INSTRUCTIONS: &str = r#"

Always answer in exactly this format, with nothing before or after it:
EN: <your reply in English>
JP: <a natural Japanese translation of your English reply>"#;

const EMMA_PROMPT: &str = r#"You are {name}, a warm and patient English conversation partner chatting with a Japanese learner on LINE.
- Keep every reply to 2-3 short sentences of natural, everyday English.
- Ask a simple follow-up question so the conversation keeps going.
- If the learner makes a mistake, gently model the correct phrasing in your reply instead of lecturing.
- Never use lists, markdown or emoji."#;

const JACK_PROMPT: &str = r#"You are {name}, a relaxed, funny friend from California who loves food, travel and movies, chatting with a Japanese learner on LINE.
- Reply in 2-3 short, casual sentences, the way friends text each other.
- Use common idioms now and then, but keep the vocabulary easy.
- Show curiosity about the learner's day and opinions.
- Never use lists, markdown or emoji."#;

/// Speech parameters fixed for a persona.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VoiceParams {
    pub voice: String,
    pub speed: f32,
    /// Speaking-style instructions for models that accept them.
    pub instructions: String,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            voice: "nova".into(),
            speed: 1.0,
            instructions: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PersonaConfig {
    pub name: String,
    /// System prompt; `{name}` is replaced by the persona name.
    pub prompt: String,
    #[serde(default)]
    pub voice: VoiceParams,
    #[serde(default = "default_history_table")]
    pub history_table: String,
}

fn default_history_table() -> String {
    "conversation_turns".to_string()
}

impl PersonaConfig {
    /// Full system instruction sent to the text model.
    pub fn system_prompt(&self) -> String {
        let mut prompt = self.prompt.replace("{name}", &self.name);
        prompt.push_str(FORMAT_INSTRUCTIONS);
        prompt
    }

    /// Look up one of the personas that ship with the bot.
    pub fn builtin(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "emma" => Some(Self {
                name: "Emma".into(),
                prompt: EMMA_PROMPT.into(),
                voice: VoiceParams {
                    voice: "nova".into(),
                    speed: 0.95,
                    instructions: "Speak warmly and clearly, at a slightly slow pace for a language learner."
                        .into(),
                },
                history_table: "emma_turns".into(),
            }),
            "jack" => Some(Self {
                name: "Jack".into(),
                prompt: JACK_PROMPT.into(),
                voice: VoiceParams {
                    voice: "onyx".into(),
                    speed: 1.0,
                    instructions: "Sound upbeat and casual, like chatting with a good friend.".into(),
                },
                history_table: "jack_turns".into(),
            }),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn builtin_names() -> &'static [&'static str] {
        &["emma", "jack"]
    }
}
