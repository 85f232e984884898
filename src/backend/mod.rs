//! External collaborators of the call pipeline.
//!
//! Each backend is a trait with a mock for tests and, behind the
//! `http-backends` feature, an HTTP client.

pub mod generator;
pub mod synthesizer;
pub mod transcript;

pub use generator::{ChatMessage, Conversation, MockReplyGenerator, ReplyGenerator, Role};
pub use synthesizer::{MockSynthesizer, SpeechSynthesizer};
pub use transcript::{
    NullTranscriptSource, ScriptedTranscriptSource, TranscriptSource, TranscriptSourceFactory,
};

#[cfg(feature = "http-backends")]
pub use generator::OpenAiReplyGenerator;
#[cfg(feature = "http-backends")]
pub use synthesizer::HttpSynthesizer;
