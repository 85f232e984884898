//! callrelay - phone-call media stream bridge
//!
//! Caller speech is transcribed, a reply is generated, split into segments
//! and synthesized concurrently, and the audio is streamed back to the caller
//! in the original order.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod backend;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod transport;

// Collaborator traits (transcript → generator → synthesizer → sink)
pub use backend::{ReplyGenerator, SpeechSynthesizer, TranscriptSource};
pub use pipeline::sink::{CollectorSink, MediaStreamSink, OutboundSink};

// Pipeline
pub use pipeline::orchestrator::{CallHandle, CallPipeline, CallPipelineConfig};
pub use pipeline::{ReorderBuffer, Segmenter, SequencerStation, SynthesisDispatcher};

// Error handling
pub use error::{CallrelayError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_has_hash_suffix_only_with_git_hash() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            let hash_part = ver.split('+').nth(1).unwrap_or("");
            assert_eq!(hash_part.len(), 7, "Git hash should be 7 chars, got: {}", ver);
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
