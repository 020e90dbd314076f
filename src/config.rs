//! Configuration management for line-voice-tutor.
//!
//! Loads config from YAML files in standard locations. Secrets can be left
//! out of the file and supplied through environment variables instead.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::ConfigError;
use crate::persona::PersonaConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub webhook_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            webhook_path: "/callback".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LineConfig {
    pub channel_secret: String,
    pub channel_access_token: String,
    pub api_base: String,
    pub data_api_base: String,
    pub timeout_secs: u64,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            channel_secret: String::new(),
            channel_access_token: String::new(),
            api_base: "https://api.line.me".into(),
            data_api_base: "https://api-data.line.me".into(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub speech_model: String,
    pub transcription_model: String,
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".into(),
            chat_model: "gpt-4o-mini".into(),
            temperature: 0.8,
            max_tokens: 300,
            speech_model: "gpt-4o-mini-tts".into(),
            transcription_model: "whisper-1".into(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_key: String,
    pub audio_bucket: String,
    pub timeout_secs: u64,
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            service_key: String::new(),
            audio_bucket: "voice-replies".into(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    #[default]
    Sqlite,
    Supabase,
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub backend: HistoryBackend,
    /// Empty means `<data dir>/line-voice-tutor/history.db`.
    pub sqlite_path: String,
}

impl HistoryConfig {
    pub fn resolved_sqlite_path(&self) -> PathBuf {
        if !self.sqlite_path.is_empty() {
            return PathBuf::from(&self.sqlite_path);
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("line-voice-tutor/history.db")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub history_limit: usize,
    pub max_input_chars: usize,
    pub max_speech_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_limit: 10,
            max_input_chars: 400,
            max_speech_chars: 800,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub line: LineConfig,
    pub openai: OpenAiConfig,
    pub supabase: SupabaseConfig,
    pub history: HistoryConfig,
    pub pipeline: PipelineConfig,
    /// Name of the active persona: a built-in or one from `personas`.
    pub persona: String,
    pub personas: Vec<PersonaConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            line: LineConfig::default(),
            openai: OpenAiConfig::default(),
            supabase: SupabaseConfig::default(),
            history: HistoryConfig::default(),
            pipeline: PipelineConfig::default(),
            persona: "emma".into(),
            personas: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/line-voice-tutor/config.yaml
    /// 3. /etc/line-voice-tutor/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/line-voice-tutor/config.yaml")),
                Some(PathBuf::from("/etc/line-voice-tutor/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match serde_yml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse {}: {e}, using defaults",
                        config_path.display()
                    );
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    /// Override secrets from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let targets: [(&str, &mut String); 5] = [
            ("LINE_CHANNEL_SECRET", &mut self.line.channel_secret),
            ("LINE_CHANNEL_ACCESS_TOKEN", &mut self.line.channel_access_token),
            ("OPENAI_API_KEY", &mut self.openai.api_key),
            ("SUPABASE_URL", &mut self.supabase.url),
            ("SUPABASE_SERVICE_KEY", &mut self.supabase.service_key),
        ];
        for (key, slot) in targets {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = value.trim().to_string();
            }
        }
    }

    /// Check that everything the service needs at runtime is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("line.channel_secret", &self.line.channel_secret),
            ("line.channel_access_token", &self.line.channel_access_token),
            ("openai.api_key", &self.openai.api_key),
            ("supabase.url", &self.supabase.url),
            ("supabase.service_key", &self.supabase.service_key),
        ];
        if let Some((name, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(ConfigError::Missing(*name));
        }
        if !self.server.webhook_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                field: "server.webhook_path",
                reason: "must start with '/'".into(),
            });
        }
        if self.pipeline.history_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "pipeline.history_limit",
                reason: "must be at least 1".into(),
            });
        }
        self.resolve_persona().map(|_| ())
    }

    /// Resolve the active persona; custom entries shadow built-ins.
    pub fn resolve_persona(&self) -> Result<PersonaConfig, ConfigError> {
        self.personas
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(&self.persona))
            .cloned()
            .or_else(|| PersonaConfig::builtin(&self.persona))
            .ok_or_else(|| ConfigError::UnknownPersona(self.persona.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn complete() -> Config {
        let mut config = Config::default();
        config.line.channel_secret = "secret".into();
        config.line.channel_access_token = "token".into();
        config.openai.api_key = "sk-test".into();
        config.supabase.url = "https://proj.supabase.co".into();
        config.supabase.service_key = "service".into();
        config
    }

    #[test]
    fn defaults_match_pipeline_caps() {
        let config = Config::default();
        assert_eq!(config.pipeline.history_limit, 10);
        assert_eq!(config.pipeline.max_input_chars, 400);
        assert_eq!(config.pipeline.max_speech_chars, 800);
        assert_eq!(config.history.backend, HistoryBackend::Sqlite);
        assert_eq!(config.persona, "emma");
    }

    #[test]
    fn loads_partial_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "server:\n  port: 9100\nhistory:\n  backend: memory\npersona: mika\npersonas:\n  - name: Mika\n    prompt: You are {{name}}.\n    voice:\n      voice: shimmer\n"
        )
        .unwrap();

        let config = Config::load(Some(file.path()));
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.history.backend, HistoryBackend::Memory);

        let persona = config.resolve_persona().unwrap();
        assert_eq!(persona.name, "Mika");
        assert_eq!(persona.voice.voice, "shimmer");
        assert_eq!(persona.voice.speed, 1.0);
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "server: [not, a, map").unwrap();
        let config = Config::load(Some(file.path()));
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn env_overrides_secrets() {
        let env: HashMap<&str, &str> = [
            ("LINE_CHANNEL_SECRET", "from-env"),
            ("OPENAI_API_KEY", "  sk-env  "),
            ("SUPABASE_URL", ""),
        ]
        .into_iter()
        .collect();

        let mut config = complete();
        config.apply_env_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.line.channel_secret, "from-env");
        assert_eq!(config.openai.api_key, "sk-env");
        assert_eq!(config.supabase.url, "https://proj.supabase.co");
    }

    #[test]
    fn validate_reports_first_missing_secret() {
        assert!(complete().validate().is_ok());

        let mut config = complete();
        config.openai.api_key.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("openai.api_key"))
        ));
    }

    #[test]
    fn validate_rejects_unknown_persona() {
        let mut config = complete();
        config.persona = "ghost".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownPersona(name)) if name == "ghost"
        ));
    }

    #[test]
    fn explicit_sqlite_path_wins() {
        let history = HistoryConfig {
            backend: HistoryBackend::Sqlite,
            sqlite_path: "/tmp/turns.db".into(),
        };
        assert_eq!(history.resolved_sqlite_path(), PathBuf::from("/tmp/turns.db"));
    }
}
