//! Frame types for the call pipeline.
//!
//! Defines the data structures that flow between pipeline stations.

use bytes::Bytes;

/// Identifier of one transcript-to-reply cycle within a call.
///
/// Allocated per call, starting at 1 and increasing with every finalized
/// transcript.
pub type TurnId = u64;

/// One ordered chunk of reply text slated for independent synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Turn this segment belongs to.
    pub turn: TurnId,
    /// Position within the turn, starting at 0.
    pub sequence: u64,
    /// Trimmed, non-empty text to speak.
    pub text: String,
}

/// Result of synthesizing a [`Segment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    /// Turn inherited from the segment.
    pub turn: TurnId,
    /// Sequence number inherited from the segment.
    pub sequence: u64,
    /// Encoded audio, opaque to the sequencer.
    pub payload: Bytes,
    /// Text the audio was generated from (diagnostics only).
    pub source_text: String,
}

impl SynthesizedAudio {
    /// Creates the audio result for a segment.
    pub fn for_segment(segment: &Segment, payload: Bytes) -> Self {
        Self {
            turn: segment.turn,
            sequence: segment.sequence,
            payload,
            source_text: segment.text.clone(),
        }
    }
}

/// Events consumed by the sequencer station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerEvent {
    /// A new turn begins; any unfinished previous turn is abandoned.
    TurnStarted(TurnId),
    /// Synthesized audio for a segment, in completion order.
    Audio(SynthesizedAudio),
    /// Audio emitted immediately, outside of any ordering domain.
    OutOfBand(Bytes),
    /// Every synthesis task of the turn has settled.
    TurnComplete { turn: TurnId, segment_count: u64 },
}

impl SequencerEvent {
    /// Returns the turn this event is scoped to, if any.
    pub fn turn(&self) -> Option<TurnId> {
        match self {
            SequencerEvent::TurnStarted(turn) => Some(*turn),
            SequencerEvent::Audio(audio) => Some(audio.turn),
            SequencerEvent::TurnComplete { turn, .. } => Some(*turn),
            SequencerEvent::OutOfBand(_) => None,
        }
    }
}

/// Lifecycle phase of the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    /// No turn in progress.
    #[default]
    Idle,
    /// Waiting for the reply generator.
    Generating,
    /// Splitting the reply into segments.
    Segmenting,
    /// One or more synthesis requests outstanding.
    Synthesizing,
    /// All synthesis settled; the sequencer is emitting the buffered tail.
    Draining,
}

/// Observable state of a call: which turn is current and where it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TurnStatus {
    pub turn: Option<TurnId>,
    pub phase: TurnPhase,
}

impl TurnStatus {
    /// Whether the given turn has run to completion.
    pub fn is_finished(&self, turn: TurnId) -> bool {
        self.turn.is_some_and(|current| current > turn)
            || (self.turn == Some(turn) && self.phase == TurnPhase::Idle)
    }
}
