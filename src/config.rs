//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_SESSION_VOICE_ID, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use crate::session::SessionSettings;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub client: ClientConfig,
    pub performance: PerformanceConfig,
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Inference parameters for every AI session this gateway opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_tokens: u32,
    pub top_p: f32,
    pub temperature: f32,
    pub voice_id: String,
    /// Telephone frame interval. 20 ms is the standard media cadence.
    pub frame_ms: u64,
    /// When non-empty, replaces the client's base prompt file.
    pub system_prompt: String,
}

/// Which client's prompt assets and audio files this deployment serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Selects `{prompts_dir}/{client_id}/` for prompts and contexts.
    pub client_id: String,
    pub prompts_dir: String,
    /// Directory holding greeting/error WAV files (8 kHz mono PCM16).
    pub audio_dir: String,
    pub greeting_file: String,
    pub error_file: String,
    /// Where call traces are flushed at call end.
    pub trace_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_calls: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Dump decoded AI speech to `{dump_dir}/{call_id}-ai.pcm`.
    pub dump_ai_audio: bool,
    pub dump_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            session: SessionConfig {
                max_tokens: 1024,
                top_p: 0.9,
                temperature: 0.7,
                voice_id: "en_us_matthew".to_string(),
                frame_ms: 20,
                system_prompt: String::new(),
            },
            client: ClientConfig {
                client_id: "default-client".to_string(),
                prompts_dir: "prompts".to_string(),
                audio_dir: "audio".to_string(),
                greeting_file: "hello-how.wav".to_string(),
                error_file: "error.wav".to_string(),
                trace_dir: "logs/traces".to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_calls: 10,
            },
            debug: DebugConfig {
                dump_ai_audio: false,
                dump_dir: "logs/audio".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration: defaults, then config.toml, then APP_* environment
    /// variables, plus the bare HOST/PORT overrides deployment platforms set.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a working call.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }
        if self.performance.max_concurrent_calls == 0 {
            return Err(anyhow::anyhow!("Max concurrent calls must be greater than 0"));
        }
        if self.session.frame_ms == 0 {
            return Err(anyhow::anyhow!("Frame interval must be greater than 0"));
        }
        if self.session.max_tokens == 0 {
            return Err(anyhow::anyhow!("Max tokens must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.session.top_p) {
            return Err(anyhow::anyhow!("top_p must be within [0, 1]"));
        }
        if self.session.temperature <= 0.0 {
            return Err(anyhow::anyhow!("Temperature must be positive"));
        }
        Ok(())
    }

    /// Apply a partial update from a JSON document, validating the result.
    ///
    /// Only session and performance settings may change at runtime; client
    /// assets and the bind address are fixed for the process lifetime.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(session) = partial.get("session") {
            if let Some(max_tokens) = session.get("max_tokens").and_then(|v| v.as_u64()) {
                self.session.max_tokens = max_tokens as u32;
            }
            if let Some(top_p) = session.get("top_p").and_then(|v| v.as_f64()) {
                self.session.top_p = top_p as f32;
            }
            if let Some(temperature) = session.get("temperature").and_then(|v| v.as_f64()) {
                self.session.temperature = temperature as f32;
            }
            if let Some(voice) = session.get("voice_id").and_then(|v| v.as_str()) {
                self.session.voice_id = voice.to_string();
            }
            if let Some(prompt) = session.get("system_prompt").and_then(|v| v.as_str()) {
                self.session.system_prompt = prompt.to_string();
            }
        }

        if let Some(performance) = partial.get("performance") {
            if let Some(calls) = performance
                .get("max_concurrent_calls")
                .and_then(|v| v.as_u64())
            {
                self.performance.max_concurrent_calls = calls as usize;
            }
        }

        if let Some(debug) = partial.get("debug") {
            if let Some(dump) = debug.get("dump_ai_audio").and_then(|v| v.as_bool()) {
                self.debug.dump_ai_audio = dump;
            }
        }

        self.validate()?;
        Ok(())
    }

    /// The system prompt for a call: the configured override when set,
    /// otherwise the client's base prompt from the catalog.
    pub fn system_prompt<'a>(&'a self, catalog_prompt: &'a str) -> &'a str {
        match self.session.system_prompt.trim() {
            "" => catalog_prompt,
            configured => configured,
        }
    }

    /// PCM16 bytes per telephone frame: 8000 Hz * 2 bytes * frame_ms.
    pub fn frame_size(&self) -> usize {
        (8000 * 2 * self.session.frame_ms as usize) / 1000
    }

    /// Resolve per-session settings for one call.
    pub fn session_settings(&self, call_id: &str) -> SessionSettings {
        let audio_dir = PathBuf::from(&self.client.audio_dir);
        SessionSettings {
            max_tokens: self.session.max_tokens,
            top_p: self.session.top_p,
            temperature: self.session.temperature,
            voice_id: self.session.voice_id.clone(),
            frame_size: self.frame_size(),
            pop_timeout: Duration::from_millis(self.session.frame_ms),
            greeting_file: non_empty(&self.client.greeting_file)
                .map(|f| audio_dir.join(f)),
            error_file: non_empty(&self.client.error_file).map(|f| audio_dir.join(f)),
            ai_audio_dump: self.debug.dump_ai_audio.then(|| {
                PathBuf::from(&self.debug.dump_dir).join(format!("{}-ai.pcm", call_id))
            }),
        }
    }
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.session.voice_id, "en_us_matthew");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.top_p = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_update() {
        let mut config = AppConfig::default();
        let json = r#"{"session": {"voice_id": "es_mx_lupe", "temperature": 0.5}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.session.voice_id, "es_mx_lupe");
        assert!((config.session.temperature - 0.5).abs() < f32::EPSILON);
        // Untouched fields keep their values.
        assert_eq!(config.session.max_tokens, 1024);
    }

    #[test]
    fn test_invalid_update_rejected() {
        let mut config = AppConfig::default();
        let json = r#"{"session": {"max_tokens": 0}}"#;
        assert!(config.update_from_json(json).is_err());
    }

    #[test]
    fn test_system_prompt_override_wins() {
        let mut config = AppConfig::default();
        assert_eq!(config.system_prompt("from catalog"), "from catalog");
        config.session.system_prompt = "Eres un asistente.".to_string();
        assert_eq!(config.system_prompt("from catalog"), "Eres un asistente.");
    }

    #[test]
    fn test_frame_size_matches_media_cadence() {
        let config = AppConfig::default();
        // 20 ms at 8 kHz PCM16.
        assert_eq!(config.frame_size(), 320);
    }

    #[test]
    fn test_session_settings_resolve_paths() {
        let config = AppConfig::default();
        let settings = config.session_settings("call-1");
        assert_eq!(
            settings.greeting_file,
            Some(PathBuf::from("audio").join("hello-how.wav"))
        );
        // Dumps are off by default.
        assert!(settings.ai_audio_dump.is_none());
    }
}
