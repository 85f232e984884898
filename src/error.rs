//! Error types for callrelay.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CallrelayError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Reply generation errors
    #[error("Reply generation failed: {message}")]
    Generation { message: String },

    // Speech synthesis errors
    #[error("Speech synthesis failed: {message}")]
    Synthesis { message: String },

    #[error("Speech synthesis timed out after {timeout_ms}ms")]
    SynthesisTimeout { timeout_ms: u64 },

    // Outbound transport errors
    #[error("Transport failure: {message}")]
    Transport { message: String },

    // Media stream protocol errors
    #[error("Media stream protocol error: {message}")]
    Protocol { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl CallrelayError {
    /// Whether this error ends the call rather than a single turn or segment.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CallrelayError::Transport { .. })
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, CallrelayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_file_not_found_display() {
        let error = CallrelayError::ConfigFileNotFound {
            path: "/path/to/config.toml".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Configuration file not found at /path/to/config.toml"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = CallrelayError::ConfigInvalidValue {
            key: "pipeline.max_concurrent_synthesis".to_string(),
            message: "must be at least 1".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for pipeline.max_concurrent_synthesis: must be at least 1"
        );
    }

    #[test]
    fn test_generation_display() {
        let error = CallrelayError::Generation {
            message: "API returned 500".to_string(),
        };
        assert_eq!(error.to_string(), "Reply generation failed: API returned 500");
    }

    #[test]
    fn test_synthesis_display() {
        let error = CallrelayError::Synthesis {
            message: "connection reset".to_string(),
        };
        assert_eq!(error.to_string(), "Speech synthesis failed: connection reset");
    }

    #[test]
    fn test_synthesis_timeout_display() {
        let error = CallrelayError::SynthesisTimeout { timeout_ms: 10000 };
        assert_eq!(
            error.to_string(),
            "Speech synthesis timed out after 10000ms"
        );
    }

    #[test]
    fn test_transport_display() {
        let error = CallrelayError::Transport {
            message: "websocket closed".to_string(),
        };
        assert_eq!(error.to_string(), "Transport failure: websocket closed");
    }

    #[test]
    fn test_protocol_display() {
        let error = CallrelayError::Protocol {
            message: "missing event tag".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Media stream protocol error: missing event tag"
        );
    }

    #[test]
    fn test_only_transport_errors_are_fatal() {
        assert!(
            CallrelayError::Transport {
                message: "closed".to_string()
            }
            .is_fatal()
        );
        assert!(
            !CallrelayError::Synthesis {
                message: "503".to_string()
            }
            .is_fatal()
        );
        assert!(
            !CallrelayError::Generation {
                message: "timeout".to_string()
            }
            .is_fatal()
        );
        assert!(!CallrelayError::SynthesisTimeout { timeout_ms: 1 }.is_fatal());
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: CallrelayError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_str = "invalid = toml = syntax";
        let toml_error = toml::from_str::<toml::Value>(toml_str).unwrap_err();
        let error: CallrelayError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: CallrelayError = json_error.into();
        assert!(error.to_string().starts_with("JSON error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: CallrelayError = io_error.into();

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<CallrelayError>();
        assert_sync::<CallrelayError>();
    }
}
