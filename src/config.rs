use crate::defaults;
use crate::error::{CallrelayError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub pipeline: PipelineSettings,
    pub call: CallConfig,
}

/// HTTP / WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Host name the telephony provider should connect back to.
    /// Falls back to the `Host` header of the incoming-call request.
    pub public_host: Option<String>,
}

/// Reply generator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub system_prompt: String,
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtsConfig {
    pub url: String,
    /// Defaults to `llm.api_key` when unset.
    pub api_key: Option<String>,
    pub voice: String,
    pub format: String,
}

/// Ordering pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub segment_marker: char,
    pub max_concurrent_synthesis: usize,
    pub synthesis_timeout_ms: u64,
    pub flush_grace_ms: u64,
    pub channel_buffer_size: usize,
}

/// Per-call behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CallConfig {
    pub greeting: String,
    /// Spoken out-of-band as soon as the media stream starts.
    pub announcement: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: defaults::HOST.to_string(),
            port: defaults::PORT,
            public_host: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::LLM_BASE_URL.to_string(),
            model: defaults::LLM_MODEL.to_string(),
            api_key: None,
            system_prompt: defaults::SYSTEM_PROMPT.to_string(),
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            url: defaults::TTS_URL.to_string(),
            api_key: None,
            voice: defaults::TTS_VOICE.to_string(),
            format: defaults::TTS_FORMAT.to_string(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            segment_marker: defaults::SEGMENT_MARKER,
            max_concurrent_synthesis: defaults::MAX_CONCURRENT_SYNTHESIS,
            synthesis_timeout_ms: defaults::SYNTHESIS_TIMEOUT_MS,
            flush_grace_ms: defaults::FLUSH_GRACE_MS,
            channel_buffer_size: defaults::CHANNEL_BUFFER_SIZE,
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            greeting: defaults::GREETING.to_string(),
            announcement: None,
        }
    }
}

impl PipelineSettings {
    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }

    pub fn flush_grace(&self) -> Duration {
        Duration::from_millis(self.flush_grace_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - CALLRELAY_PORT → server.port
    /// - CALLRELAY_PUBLIC_HOST → server.public_host
    /// - CALLRELAY_OPENAI_API_KEY, then OPENAI_API_KEY → llm.api_key
    /// - CALLRELAY_LLM_MODEL → llm.model
    /// - CALLRELAY_TTS_URL → tts.url
    /// - CALLRELAY_ANNOUNCEMENT → call.announcement
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(port) = std::env::var("CALLRELAY_PORT")
            && let Ok(port) = port.parse::<u16>()
        {
            self.server.port = port;
        }

        if let Ok(host) = std::env::var("CALLRELAY_PUBLIC_HOST")
            && !host.is_empty()
        {
            self.server.public_host = Some(host);
        }

        let api_key = std::env::var("CALLRELAY_OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()));
        if let Some(key) = api_key {
            self.llm.api_key = Some(key);
        }

        if let Ok(model) = std::env::var("CALLRELAY_LLM_MODEL")
            && !model.is_empty()
        {
            self.llm.model = model;
        }

        if let Ok(url) = std::env::var("CALLRELAY_TTS_URL")
            && !url.is_empty()
        {
            self.tts.url = url;
        }

        if let Ok(announcement) = std::env::var("CALLRELAY_ANNOUNCEMENT")
            && !announcement.is_empty()
        {
            self.call.announcement = Some(announcement);
        }

        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_concurrent_synthesis == 0 {
            return Err(CallrelayError::ConfigInvalidValue {
                key: "pipeline.max_concurrent_synthesis".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.pipeline.channel_buffer_size == 0 {
            return Err(CallrelayError::ConfigInvalidValue {
                key: "pipeline.channel_buffer_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.pipeline.segment_marker.is_whitespace() {
            return Err(CallrelayError::ConfigInvalidValue {
                key: "pipeline.segment_marker".to_string(),
                message: "must not be whitespace".to_string(),
            });
        }
        if self.pipeline.synthesis_timeout_ms == 0 {
            return Err(CallrelayError::ConfigInvalidValue {
                key: "pipeline.synthesis_timeout_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// API key for the synthesizer, falling back to the LLM key.
    pub fn tts_api_key(&self) -> Option<&str> {
        self.tts.api_key.as_deref().or(self.llm.api_key.as_deref())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/callrelay/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("callrelay")
            .join("config.toml")
    }
}
