//! Default configuration constants for callrelay.
//!
//! Shared by the config file, the CLI and the pipeline builders so every entry
//! point agrees on the same values.

/// Boundary marker the reply generator places between speakable segments.
///
/// A bullet is not expected in normal spoken prose, so splitting on it never
/// cuts a sentence the model did not intend to cut.
pub const SEGMENT_MARKER: char = '•';

/// Maximum number of synthesis requests in flight per call.
pub const MAX_CONCURRENT_SYNTHESIS: usize = 4;

/// Upper bound for a single synthesis request, in milliseconds.
pub const SYNTHESIS_TIMEOUT_MS: u64 = 10_000;

/// How long the sequencer waits after a turn completes before skipping gaps.
///
/// Audio still arriving inside this window is delivered in order; anything
/// missing after it is treated as terminally failed.
pub const FLUSH_GRACE_MS: u64 = 500;

/// Capacity of the channel between synthesis tasks and the sequencer.
pub const CHANNEL_BUFFER_SIZE: usize = 64;

/// Default listening address.
pub const HOST: &str = "0.0.0.0";

/// Default listening port.
pub const PORT: u16 = 5050;

/// Default chat-completions endpoint root.
pub const LLM_BASE_URL: &str = "https://api.openai.com/v1";

/// Default chat model.
pub const LLM_MODEL: &str = "gpt-4o";

/// Default system prompt. Asks the model to mark segment boundaries.
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant on a phone call. \
Keep answers short and conversational. Insert a '•' symbol between sentences \
so each part can be spoken as soon as it is ready.";

/// Default speech synthesis endpoint.
pub const TTS_URL: &str = "https://api.openai.com/v1/audio/tts";

/// Default synthesis voice.
pub const TTS_VOICE: &str = "openai-voice-sample";

/// Audio format requested from the synthesizer.
///
/// 8kHz mu-law is what the phone media stream plays back without transcoding.
pub const TTS_FORMAT: &str = "mulaw-8000";

/// Greeting spoken by the telephony provider before the media stream connects.
pub const GREETING: &str = "Hello, you are connected to an AI assistant. Please hold on.";

/// Path of the media stream WebSocket endpoint.
pub const MEDIA_STREAM_PATH: &str = "/media-stream";
