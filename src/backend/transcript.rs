//! Transcript sources: caller audio in, finalized utterances out.
//!
//! Speech recognition itself lives behind [`TranscriptSource`]. The call
//! pipeline only cares about finalized transcripts, one per utterance.

use crate::error::Result;
use std::collections::VecDeque;
use std::sync::Arc;

/// Incremental speech-to-text over one call's inbound audio.
pub trait TranscriptSource: Send {
    /// Feed one chunk of caller audio; returns transcripts finalized by it.
    fn push_audio(&mut self, audio: &[u8]) -> Result<Vec<String>>;

    /// Source name for logging.
    fn name(&self) -> &str;
}

/// Creates a fresh transcript source for each call.
pub type TranscriptSourceFactory = Arc<dyn Fn() -> Box<dyn TranscriptSource> + Send + Sync>;

/// Source that never produces a transcript.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTranscriptSource;

impl TranscriptSource for NullTranscriptSource {
    fn push_audio(&mut self, _audio: &[u8]) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Source replaying a fixed script of utterances.
///
/// Each utterance is released after `frames_per_utterance` audio chunks,
/// which stands in for the caller speaking and then pausing.
#[derive(Debug, Clone)]
pub struct ScriptedTranscriptSource {
    script: VecDeque<String>,
    frames_per_utterance: usize,
    frames_seen: usize,
}

impl ScriptedTranscriptSource {
    pub fn new<I, S>(script: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: script.into_iter().map(Into::into).collect(),
            frames_per_utterance: 1,
            frames_seen: 0,
        }
    }

    pub fn with_frames_per_utterance(mut self, frames: usize) -> Self {
        self.frames_per_utterance = frames.max(1);
        self
    }

    /// Utterances not yet released.
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl TranscriptSource for ScriptedTranscriptSource {
    fn push_audio(&mut self, _audio: &[u8]) -> Result<Vec<String>> {
        if self.script.is_empty() {
            return Ok(Vec::new());
        }

        self.frames_seen += 1;
        if self.frames_seen < self.frames_per_utterance {
            return Ok(Vec::new());
        }

        self.frames_seen = 0;
        Ok(self.script.pop_front().into_iter().collect())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
